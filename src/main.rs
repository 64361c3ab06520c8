use clap::Parser;
use quorum::cli::{self, Cli};

mod main_runtime;

use main_runtime::{init_logging, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let json_logs = cli.json
        || std::env::var("QUORUM_LOGGING__JSON")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    init_logging(json_logs);

    if let Err(e) = cli::commands::run(cli, shutdown_signal()).await {
        cli::output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
