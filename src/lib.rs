//! formsync: local form catalog mirror
//!
//! Keeps a local copy of a remote catalog of versioned form definitions and
//! their attached media consistent and minimal, downloading only what changed.

pub mod cli;
pub mod core;
