//! `formsync init` command - Initialize a new formsync project

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::Path;

use crate::cli::GlobalOpts;
use crate::core::project::{Project, ProjectError, FORMS_DIR, PROJECT_DIR};
use crate::core::store::LocalCatalogStore;

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: std::path::PathBuf,

    /// Catalog listing to record in the project config
    #[arg(long)]
    pub catalog: Option<String>,

    /// Force initialization even if .formsync/ already exists
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let path = if args.path.as_os_str() == "." {
        std::env::current_dir().into_diagnostic()?
    } else {
        args.path.clone()
    };

    let project = match (&args.catalog, args.force) {
        (_, true) => Project::init_force(&path),
        (Some(url), false) => Project::init_with_catalog(&path, url),
        (None, false) => Project::init(&path),
    };

    match project {
        Ok(project) => {
            // Create the catalog database up front so `status` works immediately
            LocalCatalogStore::open(project.root()).map_err(|e| miette::miette!("{}", e))?;

            if global.quiet {
                return Ok(());
            }
            println!(
                "{} Initialized formsync project at {}",
                style("✓").green(),
                style(project.root().display()).cyan()
            );
            println!();
            println!("Created project structure:");
            print_structure(project.root());
            println!();
            println!("Next steps:");
            if args.catalog.is_none() {
                println!(
                    "  {} Point the project at a catalog",
                    style("edit .formsync/config.yaml").yellow()
                );
            }
            println!(
                "  {} See what would be downloaded",
                style("formsync preview").yellow()
            );
            println!("  {} Download it", style("formsync sync").yellow());
            Ok(())
        }
        Err(ProjectError::AlreadyExists(path)) => {
            println!(
                "{} formsync project already exists at {}",
                style("!").yellow(),
                style(path.display()).cyan()
            );
            println!();
            println!(
                "Use {} to reinitialize",
                style("formsync init --force").yellow()
            );
            Ok(())
        }
        Err(e) => Err(miette::miette!("{}", e)),
    }
}

fn print_structure(root: &Path) {
    let entries = [
        format!("{}/", PROJECT_DIR),
        format!("{}/config.yaml", PROJECT_DIR),
        format!("{}/catalog.db", PROJECT_DIR),
        format!("{}/", FORMS_DIR),
    ];

    for entry in &entries {
        if root.join(entry).exists() {
            println!("  {}", style(entry).dim());
        }
    }
}
