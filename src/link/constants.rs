use uuid::Uuid;

/**
 * Service record names advertised for the two channels.
 */
pub const SECURE_SERVICE_NAME: &str = "BluetoothChatSecure";
pub const INSECURE_SERVICE_NAME: &str = "BluetoothChatInsecure";

/**
 * Size (bytes) of the buffer used for a single read. One read is one received message.
 */
pub const READ_BUFFER_SIZE: usize = 1024;

/**
 * Largest read buffer (bytes) a config may ask for.
 */
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

pub const TOAST_UNAVAILABLE: &str = "Bluetooth is not available";
pub const TOAST_NOT_CONNECTED: &str = "You are not connected to a device";
pub const TOAST_CONNECT_FAILED: &str = "Unable to connect device";
pub const TOAST_CONNECTION_LOST: &str = "Device connection was lost";

pub fn make_secure_service_uuid() -> Uuid {
    Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66)
}

pub fn make_insecure_service_uuid() -> Uuid {
    Uuid::from_u128(0x8ce255c0_200a_11e0_ac64_0800200c9a66)
}
