//! Signal Generator.
//!
//! Each [`SensorKind`] maps to a [`SignalProfile`]: a slow sine or cosine
//! around a centre value plus uniform jitter.  [`sample`] evaluates the
//! profile at an elapsed time and rounds to two decimals.
//!
//! | Kind | Centre | Amplitude | Period divisor | Jitter | Range |
//! |---|---|---|---|---|---|
//! | Temperature | 22.5 °C | 5.5 (sin) | 100 s | ±2 | 15–30 |
//! | Pressure | 1013 hPa | 17 (cos) | 200 s | ±5 | 991–1035 |
//! | CO2 | 500 ppm | 100 (sin) | 150 s | ±20 | 380–620 |
//! | Dissolved oxygen | 8 mg/L | 2 (cos) | 120 s | ±0.5 | 5.5–10.5 |

use envsim_types::SensorKind;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Cosine,
}

/// Parameters of one kind's simulated signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalProfile {
    pub center: f64,
    pub amplitude: f64,
    /// Elapsed seconds are divided by this before entering the waveform.
    pub period_divisor: f64,
    /// Half-width of the uniform perturbation.
    pub jitter: f64,
    pub waveform: Waveform,
}

impl SignalProfile {
    pub fn for_kind(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Temperature => Self {
                center: 22.5,
                amplitude: 5.5,
                period_divisor: 100.0,
                jitter: 2.0,
                waveform: Waveform::Sine,
            },
            SensorKind::Pressure => Self {
                center: 1013.0,
                amplitude: 17.0,
                period_divisor: 200.0,
                jitter: 5.0,
                waveform: Waveform::Cosine,
            },
            SensorKind::Co2 => Self {
                center: 500.0,
                amplitude: 100.0,
                period_divisor: 150.0,
                jitter: 20.0,
                waveform: Waveform::Sine,
            },
            SensorKind::DissolvedOxygen => Self {
                center: 8.0,
                amplitude: 2.0,
                period_divisor: 120.0,
                jitter: 0.5,
                waveform: Waveform::Cosine,
            },
        }
    }

    /// Closed interval every sample of this profile falls in.
    pub fn bounds(&self) -> (f64, f64) {
        let spread = self.amplitude + self.jitter;
        (self.center - spread, self.center + spread)
    }

    fn periodic(&self, t_secs: f64) -> f64 {
        let phase = t_secs / self.period_divisor;
        match self.waveform {
            Waveform::Sine => phase.sin(),
            Waveform::Cosine => phase.cos(),
        }
    }
}

/// Sample `kind`'s signal at `t_secs` seconds of elapsed time.
///
/// The result is finite and lies within [`SignalProfile::bounds`] for any
/// finite, non-negative `t_secs`.
pub fn sample<R: Rng + ?Sized>(kind: SensorKind, t_secs: f64, rng: &mut R) -> f64 {
    let profile = SignalProfile::for_kind(kind);
    let noise = rng.gen_range(-profile.jitter..=profile.jitter);
    let raw = profile.center + profile.amplitude * profile.periodic(t_secs) + noise;
    let (lo, hi) = profile.bounds();
    round2(raw).clamp(lo, hi)
}

/// Round to two decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn samples_stay_within_physical_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let expected = [
            (SensorKind::Temperature, 15.0, 30.0),
            (SensorKind::Pressure, 990.0, 1035.0),
            (SensorKind::Co2, 380.0, 620.0),
            (SensorKind::DissolvedOxygen, 5.5, 10.5),
        ];
        for (kind, lo, hi) in expected {
            let mut t = 0.0;
            for _ in 0..5_000 {
                let v = sample(kind, t, &mut rng);
                assert!(v.is_finite());
                assert!((lo..=hi).contains(&v), "{kind} sample {v} outside {lo}..={hi}");
                t += 0.73;
            }
        }
    }

    #[test]
    fn samples_are_rounded_to_two_decimals() {
        let mut rng = StdRng::seed_from_u64(99);
        for kind in SensorKind::ALL {
            for i in 0..200 {
                let v = sample(kind, f64::from(i) * 3.1, &mut rng);
                let scaled = v * 100.0;
                assert!((scaled - scaled.round()).abs() < 1e-6, "{v} has more than 2 decimals");
            }
        }
    }

    #[test]
    fn periodic_component_follows_waveform() {
        let temp = SignalProfile::for_kind(SensorKind::Temperature);
        assert!(temp.periodic(0.0).abs() < 1e-12);
        let pressure = SignalProfile::for_kind(SensorKind::Pressure);
        assert!((pressure.periodic(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn jitter_free_sample_at_zero_is_center_for_sine() {
        let mut profile = SignalProfile::for_kind(SensorKind::Co2);
        profile.jitter = 0.0;
        assert_eq!(profile.center + profile.amplitude * profile.periodic(0.0), 500.0);
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(-2.344), -2.34);
        assert_eq!(round2(42.5), 42.5);
    }
}
