//! `formsync sync` command - Bring the mirror up to date with the catalog

use console::style;
use miette::Result;
use std::cell::Cell;

use crate::cli::helpers::{catalog_source, open_project, print_json, resolve_catalog_url};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::config::Config;
use crate::core::coordinator::{ProgressEvent, SyncCoordinator, SyncOutcome, SyncReport};

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// Catalog listing URL or path (default: catalog_url from config)
    #[arg(long, short = 'c')]
    pub catalog: Option<String>,

    /// Stop after this many downloads; the rest are picked up by the next sync
    #[arg(long)]
    pub max_downloads: Option<usize>,
}

pub fn run(args: SyncArgs, global: &GlobalOpts) -> Result<()> {
    let project = open_project(global)?;
    let config = Config::load_for(Some(&project));
    let url = resolve_catalog_url(args.catalog.as_deref(), &config)?;
    let (fetcher, listing) = catalog_source(&url)?;
    let coordinator = SyncCoordinator::new(config.download_options());

    let show = !global.quiet && global.format != OutputFormat::Json;
    let downloaded = Cell::new(0usize);
    let cancelled = || {
        args.max_downloads
            .is_some_and(|max| downloaded.get() >= max)
    };

    let mut progress = |event: ProgressEvent<'_>| match event {
        ProgressEvent::Classified {
            absent,
            stale,
            current,
        } => {
            if show {
                println!(
                    "{} {} new, {} changed, {} up to date",
                    style("→").blue(),
                    style(absent).cyan(),
                    style(stale).yellow(),
                    current
                );
            }
        }
        ProgressEvent::Started { .. } => {}
        ProgressEvent::Finished {
            index,
            total,
            form_id,
            media_changed,
        } => {
            downloaded.set(downloaded.get() + 1);
            if show {
                println!(
                    "  {} [{}/{}] {}{}",
                    style("✓").green(),
                    index + 1,
                    total,
                    form_id,
                    if media_changed {
                        style(" (media updated)").dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
        }
        ProgressEvent::Failed {
            index,
            total,
            form_id,
            error,
        } => {
            if show {
                println!(
                    "  {} [{}/{}] {}: {}",
                    style("✗").red(),
                    index + 1,
                    total,
                    form_id,
                    error
                );
            }
        }
    };

    let report =
        coordinator.sync_with_catalog(&project, &listing, &fetcher, &cancelled, &mut progress);

    if global.format == OutputFormat::Json {
        print_json(&report_json(&report))?;
    } else if !global.quiet {
        print_summary(&report);
    }

    match report.outcome {
        SyncOutcome::Failed(e) => Err(miette::miette!("{}", e)),
        _ => Ok(()),
    }
}

fn print_summary(report: &SyncReport) {
    match &report.outcome {
        SyncOutcome::Completed if report.completed.is_empty() => {
            println!("{} Everything is up to date", style("✓").green());
        }
        SyncOutcome::Completed => {
            println!(
                "{} Sync complete: {} form(s) downloaded",
                style("✓").green(),
                style(report.completed.len()).cyan()
            );
        }
        SyncOutcome::PartiallyCompleted => {
            println!(
                "{} Sync stopped early: {} downloaded, {} left for the next sync",
                style("!").yellow(),
                style(report.completed.len()).cyan(),
                style(report.not_started.len()).yellow()
            );
        }
        SyncOutcome::Failed(_) => {
            if !report.completed.is_empty() || !report.not_started.is_empty() {
                println!(
                    "{} Sync failed: {} downloaded, {} not downloaded",
                    style("✗").red(),
                    report.completed.len(),
                    report.not_started.len()
                );
            }
        }
        SyncOutcome::LockSkipped => {
            println!(
                "{} Another sync of this project is running; skipped",
                style("!").yellow()
            );
        }
    }
}

fn report_json(report: &SyncReport) -> serde_json::Value {
    let completed: Vec<_> = report
        .completed
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.download.form.form_id,
                "version": c.download.form.version,
                "status": c.entry.status,
                "media_changed": c.download.media_changed(),
                "draft_carried": c.download.draft_carried,
                "fetched": c.download.media.fetched,
                "reused": c.download.media.reused,
                "skipped": c.download.media.skipped,
            })
        })
        .collect();

    let not_started: Vec<_> = report
        .not_started
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.entry.id,
                "version": c.entry.version,
                "status": c.status,
            })
        })
        .collect();

    let up_to_date: Vec<_> = report.up_to_date.iter().map(|c| c.entry.id.as_str()).collect();

    serde_json::json!({
        "outcome": report.outcome.as_str(),
        "error": report.error().map(|e| e.to_string()),
        "completed": completed,
        "not_started": not_started,
        "up_to_date": up_to_date,
    })
}
