//! ---
//! rs_section: "11-simulation"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Per-family physics model producing correlated telemetry channels."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
//! Correlated telemetry synthesis.
//!
//! Flux drives temperature and tritium, temperature drives pressure. Anomaly
//! offsets are folded in before the dependants of a channel are derived, then
//! every channel is clamped to its physical range.

use rand::prelude::*;
use rand_distr::StandardNormal;
use reactorsync_common::{Metric, MetricSet, ReactorFamily};

/// Reference thermal power used to scale vibration (MW).
const REFERENCE_POWER_MW: f64 = 3100.0;
/// Noise samples are truncated to this many standard deviations.
const NOISE_CLAMP_SIGMA: f64 = 3.0;
const TEMPERATURE_RANGE: (f64, f64) = (200.0, 400.0);
const PRESSURE_RANGE: (f64, f64) = (8.0, 18.0);
const VIBRATION_RANGE: (f64, f64) = (0.0, 15.0);
const TRITIUM_RANGE: (f64, f64) = (0.0, 2000.0);
const FLUX_CEILING_RATIO: f64 = 1.3;

/// Standard deviations of the per-channel noise terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseProfile {
    /// Relative to base flux.
    pub flux_fraction: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub vibration: f64,
    pub tritium: f64,
}

impl Default for NoiseProfile {
    fn default() -> Self {
        Self {
            flux_fraction: 0.02,
            temperature: 2.0,
            pressure: 0.2,
            vibration: 0.1,
            tritium: 25.0,
        }
    }
}

/// Baseline constants for a reactor family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FamilyProfile {
    pub family: ReactorFamily,
    /// n/cm²/s
    pub base_flux: f64,
    /// °C
    pub base_temperature: f64,
    /// MPa
    pub base_pressure: f64,
    /// MW thermal
    pub thermal_power: f64,
    /// Control rod insertion beyond the nominal critical position, percent.
    pub rod_position: f64,
    pub noise: NoiseProfile,
}

impl FamilyProfile {
    pub fn for_family(family: ReactorFamily) -> Self {
        match family {
            ReactorFamily::Candu => Self {
                family,
                base_flux: 1.2e13,
                base_temperature: 285.0,
                base_pressure: 12.5,
                thermal_power: 3100.0,
                rod_position: 0.0,
                noise: NoiseProfile::default(),
            },
            ReactorFamily::Smr => Self {
                family,
                base_flux: 0.9e13,
                base_temperature: 295.0,
                base_pressure: 11.4,
                thermal_power: 300.0,
                rod_position: 0.0,
                noise: NoiseProfile {
                    flux_fraction: 0.015,
                    temperature: 1.5,
                    pressure: 0.15,
                    vibration: 0.08,
                    tritium: 20.0,
                },
            },
            ReactorFamily::Pwr => Self {
                family,
                base_flux: 1.15e13,
                base_temperature: 300.0,
                base_pressure: 13.5,
                thermal_power: 3400.0,
                rod_position: 2.0,
                noise: NoiseProfile {
                    temperature: 1.8,
                    ..NoiseProfile::default()
                },
            },
            ReactorFamily::Bwr => Self {
                family,
                base_flux: 1.05e13,
                base_temperature: 288.0,
                base_pressure: 11.5,
                thermal_power: 3300.0,
                rod_position: 3.0,
                noise: NoiseProfile {
                    vibration: 0.12,
                    ..NoiseProfile::default()
                },
            },
        }
    }

    pub fn rod_influence(&self) -> f64 {
        (100.0 - self.rod_position) / 100.0
    }

    pub fn max_flux(&self) -> f64 {
        self.base_flux * FLUX_CEILING_RATIO
    }

    /// Inclusive physical range a channel is clamped to for this family.
    pub fn range(&self, metric: Metric) -> (f64, f64) {
        match metric {
            Metric::NeutronFlux => (0.0, self.max_flux()),
            Metric::CoreTemperature => TEMPERATURE_RANGE,
            Metric::Pressure => PRESSURE_RANGE,
            Metric::Vibration => VIBRATION_RANGE,
            Metric::TritiumLevel => TRITIUM_RANGE,
        }
    }
}

/// Additive per-channel offsets applied on top of the baseline.
///
/// The flux entry is a fraction of the family's base flux; every other entry
/// is in the channel's own unit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Perturbation {
    offsets: MetricSet,
}

impl Perturbation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: Metric) -> f64 {
        self.offsets.get(metric)
    }

    pub fn add(&mut self, metric: Metric, offset: f64) {
        let current = self.offsets.get(metric);
        self.offsets.set(metric, current + offset);
    }

    pub fn merge(&mut self, other: &Perturbation) {
        for (metric, offset) in other.offsets.iter() {
            self.add(metric, offset);
        }
    }

    pub fn is_zero(&self) -> bool {
        self.offsets.iter().all(|(_, offset)| offset == 0.0)
    }
}

/// A channel left its physical range after clamping.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{metric} value {value} outside physical range [{min}, {max}]")]
pub struct RangeViolation {
    pub metric: Metric,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Seeded generator for one reactor's telemetry stream.
///
/// Every call draws exactly five noise samples, so the stream for a given seed
/// is identical whether or not perturbations are applied.
#[derive(Debug, Clone)]
pub struct PhysicsModel {
    rng: StdRng,
}

impl PhysicsModel {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derive an independent stream for one reactor from a run-wide seed.
    pub fn for_reactor(seed: u64, reactor_id: u32) -> Self {
        Self::new(seed ^ (reactor_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    pub fn reading(
        &mut self,
        family: ReactorFamily,
        tick: u64,
        perturbation: &Perturbation,
    ) -> Result<MetricSet, RangeViolation> {
        let profile = FamilyProfile::for_family(family);
        self.reading_with_profile(&profile, tick, perturbation)
    }

    pub fn reading_with_profile(
        &mut self,
        profile: &FamilyProfile,
        tick: u64,
        perturbation: &Perturbation,
    ) -> Result<MetricSet, RangeViolation> {
        let t = tick as f64;
        let noise = profile.noise;
        let flux_noise = self.noise(noise.flux_fraction);
        let temperature_noise = self.noise(noise.temperature);
        let pressure_noise = self.noise(noise.pressure);
        let vibration_noise = self.noise(noise.vibration);
        let tritium_noise = self.noise(noise.tritium);

        let drift = 0.05 * (0.1 * t).sin() + 0.02 * (0.03 * t).sin();
        let flux = profile.base_flux * profile.rod_influence() * (1.0 + drift + flux_noise)
            + perturbation.get(Metric::NeutronFlux) * profile.base_flux;
        let flux = clamp(profile, Metric::NeutronFlux, flux);
        let flux_ratio = flux / profile.base_flux;

        let coolant = profile.base_temperature - 25.0 + 5.0 * (0.001 * t).sin();
        let thermal_lag = 0.1 * (0.05 * t).sin();
        let temperature = coolant
            + 25.0 * flux_ratio
            + thermal_lag
            + temperature_noise
            + perturbation.get(Metric::CoreTemperature);
        let temperature = clamp(profile, Metric::CoreTemperature, temperature);

        let thermal_expansion =
            0.1 * profile.base_pressure * (temperature / profile.base_temperature - 1.0);
        let pump_cycle = 0.5 * (0.2 * t).sin();
        let pressure = profile.base_pressure
            + thermal_expansion
            + pump_cycle
            + pressure_noise
            + perturbation.get(Metric::Pressure);
        let pressure = clamp(profile, Metric::Pressure, pressure);

        let vibration = 1.8
            + 0.3 * (profile.thermal_power / REFERENCE_POWER_MW)
            + 0.3 * (0.8 * t).sin()
            + 0.2 * (1.2 * t).sin()
            + vibration_noise
            + perturbation.get(Metric::Vibration);
        let vibration = clamp(profile, Metric::Vibration, vibration);

        let tritium = 450.0 * flux_ratio - 50.0 * (0.05 * t).sin()
            + tritium_noise
            + perturbation.get(Metric::TritiumLevel);
        let tritium = clamp(profile, Metric::TritiumLevel, tritium);

        let metrics = MetricSet {
            neutron_flux: flux,
            core_temperature: temperature,
            pressure,
            vibration,
            tritium_level: tritium,
        };
        check_ranges(profile, &metrics)?;
        Ok(metrics)
    }

    fn noise(&mut self, sigma: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z.clamp(-NOISE_CLAMP_SIGMA, NOISE_CLAMP_SIGMA) * sigma
    }
}

fn clamp(profile: &FamilyProfile, metric: Metric, value: f64) -> f64 {
    let (min, max) = profile.range(metric);
    value.clamp(min, max)
}

fn check_ranges(profile: &FamilyProfile, metrics: &MetricSet) -> Result<(), RangeViolation> {
    for (metric, value) in metrics.iter() {
        let (min, max) = profile.range(metric);
        if !value.is_finite() || value < min || value > max {
            return Err(RangeViolation {
                metric,
                value,
                min,
                max,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn baseline_stays_within_physical_ranges() {
        for family in ReactorFamily::iter() {
            let profile = FamilyProfile::for_family(family);
            let mut model = PhysicsModel::new(7);
            for tick in 0..5_000 {
                let metrics = model
                    .reading(family, tick, &Perturbation::none())
                    .expect("baseline reading");
                for (metric, value) in metrics.iter() {
                    let (min, max) = profile.range(metric);
                    assert!(value >= min && value <= max, "{family} {metric} {value}");
                }
            }
        }
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = PhysicsModel::new(99);
        let mut b = PhysicsModel::new(99);
        for tick in 0..100 {
            let left = a.reading(ReactorFamily::Pwr, tick, &Perturbation::none()).unwrap();
            let right = b.reading(ReactorFamily::Pwr, tick, &Perturbation::none()).unwrap();
            assert_eq!(left, right);
        }
    }

    #[test]
    fn perturbation_does_not_shift_noise_stream() {
        let mut perturbed = PhysicsModel::new(3);
        let mut clean = PhysicsModel::new(3);
        let mut spike = Perturbation::none();
        spike.add(Metric::Vibration, 4.0);
        for tick in 0..5 {
            perturbed.reading(ReactorFamily::Candu, tick, &spike).unwrap();
            clean.reading(ReactorFamily::Candu, tick, &Perturbation::none()).unwrap();
        }
        let after_a = perturbed.reading(ReactorFamily::Candu, 5, &Perturbation::none()).unwrap();
        let after_b = clean.reading(ReactorFamily::Candu, 5, &Perturbation::none()).unwrap();
        assert_eq!(after_a, after_b);
    }

    #[test]
    fn temperature_offset_flows_into_pressure() {
        let mut hot = PhysicsModel::new(11);
        let mut cold = PhysicsModel::new(11);
        let mut spike = Perturbation::none();
        spike.add(Metric::CoreTemperature, 60.0);
        let a = hot.reading(ReactorFamily::Candu, 10, &spike).unwrap();
        let b = cold.reading(ReactorFamily::Candu, 10, &Perturbation::none()).unwrap();
        assert!((a.core_temperature - b.core_temperature - 60.0).abs() < 1e-9);
        let expected = 0.1 * 12.5 * 60.0 / 285.0;
        assert!((a.pressure - b.pressure - expected).abs() < 1e-9);
        assert_eq!(a.vibration, b.vibration);
    }

    #[test]
    fn flux_offset_raises_temperature_and_tritium() {
        let mut unstable = PhysicsModel::new(5);
        let mut steady = PhysicsModel::new(5);
        let mut surge = Perturbation::none();
        surge.add(Metric::NeutronFlux, 0.1);
        let a = unstable.reading(ReactorFamily::Candu, 1, &surge).unwrap();
        let b = steady.reading(ReactorFamily::Candu, 1, &Perturbation::none()).unwrap();
        assert!(a.neutron_flux > b.neutron_flux);
        assert!(a.core_temperature > b.core_temperature);
        assert!(a.tritium_level > b.tritium_level);
    }

    #[test]
    fn extreme_offsets_are_clamped() {
        let mut model = PhysicsModel::new(1);
        let mut extreme = Perturbation::none();
        extreme.add(Metric::CoreTemperature, 10_000.0);
        extreme.add(Metric::Pressure, -100.0);
        extreme.add(Metric::NeutronFlux, 5.0);
        let metrics = model.reading(ReactorFamily::Smr, 0, &extreme).unwrap();
        assert_eq!(metrics.core_temperature, 400.0);
        assert_eq!(metrics.pressure, 8.0);
        assert_eq!(metrics.neutron_flux, 0.9e13 * 1.3);
    }

    #[test]
    fn range_check_rejects_non_finite_values() {
        let profile = FamilyProfile::for_family(ReactorFamily::Candu);
        let metrics = MetricSet {
            neutron_flux: f64::NAN,
            core_temperature: 285.0,
            pressure: 12.5,
            vibration: 2.0,
            tritium_level: 400.0,
        };
        let err = check_ranges(&profile, &metrics).unwrap_err();
        assert_eq!(err.metric, Metric::NeutronFlux);
    }
}
