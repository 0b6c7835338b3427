//! `formsync list` command - Downloaded form versions

use miette::Result;

use crate::cli::helpers::{open_project, print_json, print_rows, short_hash, truncate_str};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::coordinator::SyncCoordinator;

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Include soft-deleted versions
    #[arg(long, short = 'a')]
    pub all: bool,

    /// Only show versions of this form id
    #[arg(long)]
    pub id: Option<String>,
}

pub fn run(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let project = open_project(global)?;
    let forms = SyncCoordinator::default()
        .list_forms(&project, args.all)
        .map_err(|e| miette::miette!("{}", e))?;

    let forms: Vec<_> = forms
        .into_iter()
        .filter(|f| args.id.as_deref().map_or(true, |id| f.form_id == id))
        .collect();

    if global.format == OutputFormat::Json {
        return print_json(&serde_json::to_value(&forms).map_err(|e| miette::miette!("{}", e))?);
    }

    if forms.is_empty() {
        if !global.quiet {
            println!("No forms downloaded yet.");
        }
        return Ok(());
    }

    let mut headers = vec!["ID", "VERSION", "NAME", "HASH", "DOWNLOADED"];
    if args.all {
        headers.push("DELETED");
    }

    let rows: Vec<Vec<String>> = forms
        .iter()
        .map(|f| {
            let mut row = vec![
                f.form_id.clone(),
                f.version_label().to_string(),
                truncate_str(&f.display_name, 40),
                short_hash(&f.content_hash),
                f.downloaded_at.format("%Y-%m-%d %H:%M").to_string(),
            ];
            if args.all {
                row.push(if f.deleted { "yes" } else { "" }.to_string());
            }
            row
        })
        .collect();

    print_rows(&headers, &rows, global.format);

    if !global.quiet && global.format == OutputFormat::Auto {
        println!();
        println!("{} version(s) found", forms.len());
    }

    Ok(())
}
