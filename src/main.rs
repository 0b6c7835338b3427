use clap::Parser;
use miette::Result;
use formsync::cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Reset SIGPIPE to default behavior (terminate silently) for proper Unix piping.
    // Without this, piping to `head`, `grep -q`, etc. causes a panic on broken pipe.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;

    // Logs go to stderr so stdout stays pipeable
    let default_filter = if global.verbose { "formsync=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init(args) => formsync::cli::commands::init::run(args, &global),
        Commands::Sync(args) => formsync::cli::commands::sync::run(args, &global),
        Commands::Preview(args) => formsync::cli::commands::preview::run(args, &global),
        Commands::List(args) => formsync::cli::commands::list::run(args, &global),
        Commands::Delete(args) => formsync::cli::commands::delete::run(args, &global),
        Commands::Status(args) => formsync::cli::commands::status::run(args, &global),
        Commands::Completions(args) => formsync::cli::commands::completions::run(args),
    }
}
