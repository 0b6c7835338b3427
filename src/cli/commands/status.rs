//! `formsync status` command - Catalog statistics

use console::style;
use miette::Result;

use crate::cli::helpers::{open_project, print_json, print_rows};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::config::Config;
use crate::core::store::{LocalCatalogStore, CATALOG_FILE};

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Also list imported shared resources
    #[arg(long)]
    pub detailed: bool,
}

pub fn run(args: StatusArgs, global: &GlobalOpts) -> Result<()> {
    let project = open_project(global)?;
    let config = Config::load_for(Some(&project));
    let store = LocalCatalogStore::open(project.root()).map_err(|e| miette::miette!("{}", e))?;

    let stats = store.statistics().map_err(|e| miette::miette!("{}", e))?;
    let shared = store
        .shared_resources()
        .map_err(|e| miette::miette!("{}", e))?;
    let leftover_staging = project.stale_staging_dirs().len();

    if global.format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "project": project.root(),
            "catalog_url": config.catalog_url,
            "statistics": stats,
            "shared_resources": shared,
            "leftover_staging_dirs": leftover_staging,
        }));
    }

    println!("{}", style("formsync Status").bold());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Project:           {}", project.root().display());
    println!(
        "  Catalog:           {}",
        config.catalog_url.as_deref().unwrap_or("(not configured)")
    );
    println!(
        "  Database:          {}",
        project.root().join(CATALOG_FILE).display()
    );
    println!("  Active versions:   {}", style(stats.active_forms).cyan());
    println!("  Deleted versions:  {}", style(stats.deleted_forms).dim());
    println!("  Form ids:          {}", style(stats.distinct_form_ids).cyan());
    println!("  Shared resources:  {}", style(stats.shared_resources).cyan());
    println!("  Entities:          {}", style(stats.entities).cyan());
    println!(
        "  Database size:     {} KB",
        style(stats.db_size_bytes / 1024).cyan()
    );

    if leftover_staging > 0 {
        println!();
        println!(
            "{} {} leftover staging director{} in .formsync/staging from interrupted syncs",
            style("!").yellow(),
            leftover_staging,
            if leftover_staging == 1 { "y" } else { "ies" }
        );
    }

    if args.detailed && !shared.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = shared
            .iter()
            .map(|r| {
                vec![
                    r.key.name.clone(),
                    r.key.version.to_string(),
                    r.entity_count.to_string(),
                    r.materialized_at.format("%Y-%m-%d %H:%M").to_string(),
                ]
            })
            .collect();
        print_rows(&["RESOURCE", "VERSION", "ENTITIES", "IMPORTED"], &rows, OutputFormat::Auto);
    }

    Ok(())
}
