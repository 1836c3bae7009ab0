/**
 * Minimum change (raw accelerometer units) on any axis before a new reading is emitted.
 */
pub const TILT_THRESHOLD: f32 = 0.05;
