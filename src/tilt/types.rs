use std::fmt;

/// One raw accelerometer sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelSample {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        AccelSample { x, y, z }
    }
}

/// A sample that passed the change threshold, with its two tilt angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltReading {
    pub sample: AccelSample,
    pub x_degrees: f32,
    pub y_degrees: f32,
}

impl fmt::Display for TiltReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X: {} Y: {} Z: {} | X degrees: {:.1}\u{b0} Y degrees: {:.1}\u{b0}",
            self.sample.x, self.sample.y, self.sample.z, self.x_degrees, self.y_degrees,
        )
    }
}
