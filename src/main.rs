use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use omni_stream::cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; stdout is reserved for output
    let filter = match (cli.verbose, cli.debug) {
        (0, false) => "warn",
        (0 | 1, true) | (2, _) => "debug",
        (1, false) => "info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    cli.validate()?;
    Ok(omni_stream::core::runner::run(cli).await?)
}
