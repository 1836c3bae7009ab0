use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::link::constants::{
    make_insecure_service_uuid, make_secure_service_uuid, INSECURE_SERVICE_NAME, MAX_READ_BUFFER_SIZE,
    READ_BUFFER_SIZE, SECURE_SERVICE_NAME,
};
use crate::link::types::ChannelKind;
use crate::tilt::constants::TILT_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkConfig {
    pub secure_service_uuid: Uuid,
    pub secure_service_name: String,
    pub insecure_service_uuid: Uuid,
    pub insecure_service_name: String,
    pub read_buffer_size: usize,
}

impl LinkConfig {
    pub fn service_uuid(&self, kind: ChannelKind) -> Uuid {
        match kind {
            ChannelKind::Secure => self.secure_service_uuid,
            ChannelKind::Insecure => self.insecure_service_uuid,
        }
    }

    pub fn service_name(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::Secure => &self.secure_service_name,
            ChannelKind::Insecure => &self.insecure_service_name,
        }
    }

    /// Read buffer size limited to 1..=[`MAX_READ_BUFFER_SIZE`], since every session allocates one.
    pub fn clamped(mut self) -> Self {
        self.read_buffer_size = self.read_buffer_size.clamp(1, MAX_READ_BUFFER_SIZE);
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            secure_service_uuid: make_secure_service_uuid(),
            secure_service_name: SECURE_SERVICE_NAME.to_string(),
            insecure_service_uuid: make_insecure_service_uuid(),
            insecure_service_name: INSECURE_SERVICE_NAME.to_string(),
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

/// Reference calibration for the tilt estimator.
///
/// The sign of each angle depends on how the device is held, so it is a setting rather than
/// a constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TiltConfig {
    pub threshold: f32,
    pub invert_x: bool,
    pub invert_y: bool,
}

impl Default for TiltConfig {
    fn default() -> Self {
        TiltConfig {
            threshold: TILT_THRESHOLD,
            invert_x: false,
            invert_y: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub link: LinkConfig,
    pub tilt: TiltConfig,
}

impl Config {
    pub fn clamped(self) -> Self {
        Config {
            link: self.link.clamped(),
            ..self
        }
    }
}
