//! Sample conversion from the f32 capture format to integer PCM.
//!
//! Input is expected in `[-1.0, 1.0]`; anything outside is clamped.

/// Largest positive 24-bit sample value.
pub const I24_MAX: i32 = (1 << 23) - 1;

/// Convert one f32 sample to 16-bit PCM.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// Convert one f32 sample to 24-bit PCM, stored in the low bits of an i32.
pub fn f32_to_i24(sample: f32) -> i32 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped as f64 * I24_MAX as f64) as i32
}

/// Replace NaN with silence; the WAV float format has no use for it.
pub fn sanitize_f32(sample: f32) -> f32 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}
