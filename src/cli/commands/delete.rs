//! `formsync delete` command - Soft-delete downloaded forms
//!
//! Deleted versions stop counting as current, so the next sync downloads the
//! form again, but their files stay on disk for media reuse.

use console::style;
use miette::Result;

use crate::cli::helpers::{open_project, print_json};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::config::Config;
use crate::core::coordinator::{DeleteOutcome, SyncCoordinator};

#[derive(clap::Args, Debug)]
#[command(disable_version_flag = true)]
pub struct DeleteArgs {
    /// Form id to delete
    pub id: String,

    /// Only delete this version
    #[arg(long)]
    pub version: Option<String>,
}

pub fn run(args: DeleteArgs, global: &GlobalOpts) -> Result<()> {
    let project = open_project(global)?;
    let config = Config::load_for(Some(&project));
    let coordinator = SyncCoordinator::new(config.download_options());

    let outcome = coordinator
        .delete_form(&project, &args.id, args.version.as_deref())
        .map_err(|e| miette::miette!("{}", e))?;

    let deleted = match outcome {
        DeleteOutcome::Deleted(n) => n,
        DeleteOutcome::LockSkipped => {
            return Err(miette::miette!(
                "Project is being synced; try again when the sync finishes"
            ))
        }
    };

    if global.format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "id": args.id,
            "version": args.version,
            "deleted": deleted,
        }));
    }

    if deleted == 0 {
        return Err(miette::miette!(
            "No active form '{}'{} to delete",
            args.id,
            args.version
                .as_deref()
                .map(|v| format!(" version '{}'", v))
                .unwrap_or_default()
        ));
    }

    if !global.quiet {
        println!(
            "{} Deleted {} version(s) of {}",
            style("✓").green(),
            style(deleted).cyan(),
            style(&args.id).cyan()
        );
    }
    Ok(())
}
