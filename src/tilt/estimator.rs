use log::debug;

use crate::config::types::TiltConfig;
use crate::tilt::types::{AccelSample, TiltReading};

/// Angle (degrees) between the horizontal plane and one axis, given that axis' component of
/// the normalized gravity vector. 0° is level, ±90° is the axis pointing straight down/up.
fn axis_degrees(normalized: f64) -> f64 {
    90.0 - normalized.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Tilt angles of the x and y axes, or `None` for a zero vector, which has no direction.
pub fn tilt_angles(sample: &AccelSample) -> Option<(f32, f32)> {
    let (x, y, z) = (sample.x as f64, sample.y as f64, sample.z as f64);
    let norm = (x * x + y * y + z * z).sqrt();

    if norm == 0.0 || !norm.is_finite() {
        return None;
    }

    Some((axis_degrees(x / norm) as f32, axis_degrees(y / norm) as f32))
}

/// Turns accelerometer samples into tilt readings, skipping samples that moved less than the
/// threshold on every axis.
///
/// Each axis remembers the value it had when it last crossed the threshold; axes that did not
/// cross it keep their old reference, so slow drift on one axis eventually registers.
#[derive(Debug, Clone)]
pub struct TiltEstimator {
    config: TiltConfig,
    last: [f32; 3],
}

impl TiltEstimator {
    pub fn new(config: TiltConfig) -> Self {
        TiltEstimator {
            config,
            last: [0.0; 3],
        }
    }

    pub fn on_sample(&mut self, sample: AccelSample) -> Option<TiltReading> {
        let (x_degrees, y_degrees) = match tilt_angles(&sample) {
            Some(angles) => angles,
            None => {
                debug!("Ignoring accelerometer sample without direction: {:?}", sample);
                return None;
            },
        };

        let mut significant = false;
        for (last, value) in self.last.iter_mut().zip([sample.x, sample.y, sample.z]) {
            if (value - *last).abs() > self.config.threshold {
                *last = value;
                significant = true;
            }
        }

        if !significant {
            return None;
        }

        Some(TiltReading {
            sample,
            x_degrees: if self.config.invert_x { -x_degrees } else { x_degrees },
            y_degrees: if self.config.invert_y { -y_degrees } else { y_degrees },
        })
    }
}

impl Default for TiltEstimator {
    fn default() -> Self {
        Self::new(TiltConfig::default())
    }
}
