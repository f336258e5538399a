mod cli;
mod logging;
mod text_summary;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init_logging(args.log_level.as_deref(), args.log_json)?;
    cli::run(args).await
}
