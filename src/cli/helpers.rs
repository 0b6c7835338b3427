//! Helpers shared by the formsync commands: project and catalog lookup,
//! plus row and JSON printing for each `--format`.

use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use tabled::{builder::Builder, settings::Style};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::config::Config;
use crate::core::fetcher::LocalDirFetcher;
use crate::core::hashing::ContentHash;
use crate::core::project::Project;

/// Find the project named by `--project`, or discover one from the current directory
pub fn open_project(global: &GlobalOpts) -> Result<Project> {
    let project = match &global.project {
        Some(path) => Project::discover_from(path),
        None => Project::discover(),
    };
    project.map_err(|e| miette::miette!("{}", e))
}

/// Pick the catalog URL from the command line, falling back to configuration
pub fn resolve_catalog_url(arg: Option<&str>, config: &Config) -> Result<String> {
    arg.map(str::to_string)
        .or_else(|| config.catalog_url.clone())
        .ok_or_else(|| {
            miette::miette!(
                "No catalog configured. Pass --catalog or set catalog_url in .formsync/config.yaml"
            )
        })
}

/// Build a fetcher for a catalog location and the listing URL to request from it.
///
/// `file://` URLs and bare paths are served from the directory holding the
/// listing, so relative download URLs inside it resolve against that mirror.
/// Other schemes are passed through and reported as unreachable by the fetcher.
pub fn catalog_source(url: &str) -> Result<(LocalDirFetcher, String)> {
    let raw = match url.strip_prefix("file://") {
        Some(rest) => rest,
        None if url.contains("://") => {
            return Ok((LocalDirFetcher::new(std::env::current_dir().into_diagnostic()?), url.to_string()))
        }
        None => url,
    };

    let listing = absolute(Path::new(raw))?;
    let base = listing
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    Ok((
        LocalDirFetcher::new(base),
        format!("file://{}", listing.display()),
    ))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir().into_diagnostic()?.join(path))
    }
}

/// Print rows in the requested format. `Json` is handled by callers.
///
/// The first column is what `--format id` prints.
pub fn print_rows(headers: &[&str], rows: &[Vec<String>], format: OutputFormat) {
    match format {
        OutputFormat::Tsv => {
            println!("{}", headers.join("\t"));
            for row in rows {
                println!("{}", row.join("\t"));
            }
        }
        OutputFormat::Csv => {
            println!("{}", headers.join(","));
            for row in rows {
                let cells: Vec<String> = row.iter().map(|c| escape_csv(c)).collect();
                println!("{}", cells.join(","));
            }
        }
        OutputFormat::Id => {
            for row in rows {
                if let Some(id) = row.first() {
                    println!("{}", id);
                }
            }
        }
        OutputFormat::Md | OutputFormat::Auto | OutputFormat::Json => {
            let mut builder = Builder::default();
            builder.push_record(headers.iter().copied());
            for row in rows {
                builder.push_record(row.iter().map(String::as_str));
            }
            let mut table = builder.build();
            if format == OutputFormat::Md {
                table.with(Style::markdown());
            } else {
                table.with(Style::rounded());
            }
            println!("{}", table);
        }
    }
}

/// First 12 hex digits of a hash, for tables
pub fn short_hash(hash: &ContentHash) -> String {
    truncate_plain(hash.as_str(), 12)
}

fn truncate_plain(s: &str, len: usize) -> String {
    s.chars().take(len).collect()
}

/// Shorten `s` to at most `max_len` chars, ending in "..." when cut
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Quote a CSV field when it needs it
pub fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Print a JSON value, pretty
pub fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
