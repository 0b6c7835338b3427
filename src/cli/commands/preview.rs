//! `formsync preview` command - Dry-run classification of the catalog

use console::style;
use miette::Result;

use crate::cli::helpers::{
    catalog_source, open_project, print_json, print_rows, resolve_catalog_url, truncate_str,
};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::config::Config;
use crate::core::coordinator::SyncCoordinator;
use crate::core::reconcile::{count_by_status, EntryStatus};

#[derive(clap::Args, Debug)]
pub struct PreviewArgs {
    /// Catalog listing URL or path (default: catalog_url from config)
    #[arg(long, short = 'c')]
    pub catalog: Option<String>,

    /// Only show entries that would be downloaded
    #[arg(long)]
    pub pending: bool,
}

pub fn run(args: PreviewArgs, global: &GlobalOpts) -> Result<()> {
    let project = open_project(global)?;
    let config = Config::load_for(Some(&project));
    let url = resolve_catalog_url(args.catalog.as_deref(), &config)?;
    let (fetcher, listing) = catalog_source(&url)?;

    let coordinator = SyncCoordinator::new(config.download_options());
    let classified = coordinator
        .preview_catalog(&project, &listing, &fetcher)
        .map_err(|e| miette::miette!("{}", e))?;

    let shown: Vec<_> = classified
        .iter()
        .filter(|c| !args.pending || c.needs_download())
        .collect();

    if global.format == OutputFormat::Json {
        return print_json(&serde_json::to_value(&shown).map_err(|e| miette::miette!("{}", e))?);
    }

    let rows: Vec<Vec<String>> = shown
        .iter()
        .map(|c| {
            vec![
                c.entry.id.clone(),
                c.entry.version_label().to_string(),
                truncate_str(c.entry.display_name(), 40),
                c.status.to_string(),
            ]
        })
        .collect();

    if rows.is_empty() {
        if !global.quiet {
            println!("No catalog entries to show.");
        }
        return Ok(());
    }

    print_rows(&["ID", "VERSION", "NAME", "STATUS"], &rows, global.format);

    if !global.quiet && global.format == OutputFormat::Auto {
        let counts = count_by_status(&classified);
        let count = |status: EntryStatus| counts.get(&status).copied().unwrap_or(0);
        println!();
        println!(
            "{} to download ({} new, {} changed), {} up to date",
            style(count(EntryStatus::Absent) + count(EntryStatus::Stale)).cyan(),
            count(EntryStatus::Absent),
            count(EntryStatus::Stale),
            count(EntryStatus::Current)
        );
    }

    Ok(())
}
