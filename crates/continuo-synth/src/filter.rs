//! Resonant lowpass used by voices, one biquad per stereo side.

use std::f32::consts::PI;

/// Lowest cutoff the articulation maps to.
pub const FILTER_CUTOFF_MIN: f32 = 100.0;
/// Highest cutoff the articulation maps to.
pub const FILTER_CUTOFF_MAX: f32 = 10_000.0;

/// `ln(min/max)`, the exponent scale of the cutoff mapping curves.
fn cutoff_coeff() -> f32 {
    (FILTER_CUTOFF_MIN / FILTER_CUTOFF_MAX).ln()
}

/// Cutoff from note-on velocity, used when no cutoff controller is
/// assigned. `scale` is the region's velocity-scale byte.
pub fn velocity_cutoff(velocity: u8, scale: u8) -> f32 {
    ((127 - velocity.min(127)) as f32 * scale as f32 * 6.2e-5 * cutoff_coeff()).exp()
        * FILTER_CUTOFF_MAX
}

/// Cutoff from a controller value (0..=127 mapped exponentially across
/// the filter range).
pub fn controller_cutoff(value: u8) -> f32 {
    (value.min(127) as f32 * 0.00787402 * cutoff_coeff()).exp() * FILTER_CUTOFF_MAX
}

/// Normalized resonance (0..=1) to filter Q.
fn resonance_to_q(resonance: f32) -> f32 {
    // 0 -> Butterworth, 1 -> sharply resonant.
    0.707 * 10f32.powf(resonance.clamp(0.0, 1.0) * 1.5)
}

/// Direct form I biquad, configured as an RBJ lowpass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    /// Recomputes lowpass coefficients. `resonance` is normalized
    /// 0..=1; state is preserved so retuning mid-note does not click.
    pub fn set_lowpass(&mut self, cutoff_hz: f32, resonance: f32, sample_rate: f32) {
        let cutoff = cutoff_hz.clamp(FILTER_CUTOFF_MIN, sample_rate * 0.45);
        let q = resonance_to_q(resonance);
        let omega = 2.0 * PI * cutoff / sample_rate;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);

        let a0 = 1.0 + alpha;
        self.b0 = ((1.0 - cos) / 2.0) / a0;
        self.b1 = (1.0 - cos) / a0;
        self.b2 = self.b0;
        self.a1 = (-2.0 * cos) / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_at(filter: &mut Biquad, freq: f32, sample_rate: f32) -> f32 {
        // Feed a sine and measure steady-state peak amplitude.
        let mut peak = 0.0f32;
        for i in 0..4000 {
            let x = (2.0 * PI * freq * i as f32 / sample_rate).sin();
            let y = filter.process(x);
            if i > 2000 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn lowpass_attenuates_above_cutoff() {
        let sr = 48_000.0;
        let mut lp = Biquad::default();
        lp.set_lowpass(1_000.0, 0.0, sr);

        let low = response_at(&mut lp, 100.0, sr);
        lp.reset();
        let high = response_at(&mut lp, 8_000.0, sr);

        assert!(low > 0.9, "passband should be flat, got {low}");
        assert!(high < 0.1, "stopband should be attenuated, got {high}");
    }

    #[test]
    fn resonance_peaks_at_cutoff() {
        let sr = 48_000.0;
        let mut flat = Biquad::default();
        flat.set_lowpass(1_000.0, 0.0, sr);
        let mut peaky = Biquad::default();
        peaky.set_lowpass(1_000.0, 1.0, sr);

        let flat_gain = response_at(&mut flat, 1_000.0, sr);
        let res_gain = response_at(&mut peaky, 1_000.0, sr);
        assert!(res_gain > flat_gain * 2.0);
    }

    #[test]
    fn velocity_cutoff_opens_with_velocity() {
        assert!(velocity_cutoff(127, 64) >= velocity_cutoff(64, 64));
        assert!(velocity_cutoff(64, 64) >= velocity_cutoff(1, 64));
        assert!((velocity_cutoff(127, 64) - FILTER_CUTOFF_MAX).abs() < 1.0);
    }

    #[test]
    fn controller_cutoff_spans_filter_range() {
        assert!((controller_cutoff(0) - FILTER_CUTOFF_MAX).abs() < 1.0);
        assert!(controller_cutoff(127) <= FILTER_CUTOFF_MIN * 1.05);
        assert!(controller_cutoff(64) < controller_cutoff(0));
    }
}
