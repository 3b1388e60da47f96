use clap::Parser;
use std::process;
use svcs::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = cli.execute() {
        eprintln!("Error: {}", e);

        // Print the full error chain if available
        let mut source = e.source();
        while let Some(err) = source {
            eprintln!("  Caused by: {}", err);
            source = err.source();
        }

        process::exit(1);
    }
}

/// Logging goes to stderr so hook output never pollutes git's stdout.
/// `RUST_LOG` wins; `SVCS_DEBUG` raises the default to debug.
fn init_tracing() {
    let default = if svcs::config::debug_enabled() {
        "svcs=debug"
    } else {
        "svcs=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
