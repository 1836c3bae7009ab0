#[cfg(feature = "rfcomm")]
pub mod console;
pub mod transcript;
