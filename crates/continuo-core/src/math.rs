//! Pitch math used on the render path.

use std::f64::consts::LN_2;

/// Converts a detune in cents to a frequency (playback speed) ratio.
///
/// 1200 cents are one octave, so the ratio is `2^(cents / 1200)`.
#[inline]
pub fn cents_to_ratio(cents: f64) -> f64 {
    (cents * (LN_2 / 1200.0)).exp()
}

/// Inverse of [`cents_to_ratio`].
#[inline]
pub fn ratio_to_cents(ratio: f64) -> f64 {
    ratio.ln() * (1200.0 / LN_2)
}

/// Deviation from a 1.0 pitch ratio below which resampling is skipped.
///
/// One cent is inaudible as a playback-rate error and lets unison notes
/// take the cheap non-interpolating copy path.
pub const ONE_CENT_TOLERANCE: f64 = 0.000578;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octave_doubles_ratio() {
        assert!((cents_to_ratio(1200.0) - 2.0).abs() < 1e-12);
        assert!((cents_to_ratio(-1200.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_cents_is_unity() {
        assert_eq!(cents_to_ratio(0.0), 1.0);
    }

    #[test]
    fn two_semitones_matches_pitch_bend_range() {
        // full pitch bend = +-200 cents
        let ratio = cents_to_ratio(200.0);
        assert!((ratio - 1.12246).abs() < 1e-4);
    }

    #[test]
    fn cents_round_trip() {
        for cents in [-700.0, -1.0, 0.0, 33.3, 1200.0] {
            let back = ratio_to_cents(cents_to_ratio(cents));
            assert!((back - cents).abs() < 1e-9, "cents={cents} back={back}");
        }
    }

    #[test]
    fn tolerance_matches_one_cent() {
        let one_cent = cents_to_ratio(1.0) - 1.0;
        assert!((ONE_CENT_TOLERANCE - one_cent).abs() < 1e-6);
    }
}
