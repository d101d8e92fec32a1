use clap::Parser;
use html2img::{setup_logging, Cli};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;
    info!("html2img v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = html2img::cli::run(args).await {
        error!("{e}");
        std::process::exit(1);
    }

    Ok(())
}
