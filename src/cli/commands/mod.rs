//! CLI command implementations

pub mod completions;
pub mod delete;
pub mod init;
pub mod list;
pub mod preview;
pub mod status;
pub mod sync;
