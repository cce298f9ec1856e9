use clap::Parser;
use courier::cli::CourierCli;
use std::process::ExitCode;

// Tracing may not be initialized when an error is returned, e.g. if the config failed to load,
// so we need to use `eprintln` to report it.
#[allow(clippy::disallowed_macros)]
#[tokio::main]
async fn main() -> ExitCode {
    let cli = CourierCli::parse();

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
