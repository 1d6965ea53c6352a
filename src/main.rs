use anyhow::Result;
use clap::Parser;

use sheet_agent::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging goes to a file so stdout stays clean for sheet and JSON output.
    if let Err(e) = sheet_agent::logging::init(&sheet_agent::data_dir()) {
        eprintln!("warning: file logging disabled: {e}");
    }

    cli::run(cli).await
}
