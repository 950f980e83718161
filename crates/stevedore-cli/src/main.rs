mod cli;
mod cmd;
mod signal;

use clap::Parser;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cancel = signal::install_signal_handlers();

    let result = match cli.command {
        Commands::Init { ref owner } => cmd::init::run(&cli.repo, owner.as_deref()),
        Commands::Blob { ref command } => cmd::blob_gc::run(&cli.repo, command, &cancel),
        Commands::Content { ref command } => cmd::content_rewrite::run(&cli.repo, command, &cancel),
        Commands::Manifest { ref command } => cmd::manifest_list::run(&cli.repo, command),
        Commands::Maintenance { ref command } => {
            cmd::maintenance_run::run(&cli.repo, command, &cancel)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
