use clap::Parser;
use log::{error, info};
use mazeball_link::{init_logging, run, Cli};
use mazeball_link::error::{AppRunError, ConfigError};

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    if let Err(err) = init_logging() {
        eprintln!("Failed to initialize logger: {}", err);
    }
    info!(concat!("mazeball-link ", env!("CARGO_PKG_VERSION")));

    let cli = Cli::parse();

    match run(cli).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
