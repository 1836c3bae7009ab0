use btleplug::api::{Central, Manager as _};
use btleplug::platform::Manager;
use log::{info, warn};

use crate::error::LinkError;

/// Checks whether the platform exposes at least one bluetooth adapter.
pub async fn bluetooth_available() -> Result<bool, LinkError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    for adapter in &adapters {
        match adapter.adapter_info().await {
            Ok(info) => info!("Found bluetooth adapter {}", info),
            Err(err) => warn!("Could not query bluetooth adapter: {:?}", err),
        }
    }

    Ok(!adapters.is_empty())
}
