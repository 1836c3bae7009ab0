pub mod constants;
pub mod manager;
pub mod memory;
#[cfg(feature = "probe")]
pub mod probe;
#[cfg(feature = "rfcomm")]
pub mod rfcomm;
pub mod session;
pub mod transport;
pub mod types;

pub use manager::SessionManager;
