//! ---
//! rs_section: "11-simulation"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Weighted health scoring, status thresholds, and band classification."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use reactorsync_common::{FaultSeverity, Metric, MetricSet, ReactorStatus};

/// Normal and critical operating envelope for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricBand {
    pub metric: Metric,
    pub normal_low: f64,
    pub normal_high: f64,
    pub critical_low: f64,
    pub critical_high: f64,
    pub weight: f64,
}

impl MetricBand {
    pub fn default_for(metric: Metric) -> Self {
        let (normal_low, normal_high, critical_low, critical_high, weight) = match metric {
            Metric::NeutronFlux => (0.6e13, 1.45e13, 0.4e13, 1.55e13, 0.25),
            Metric::CoreTemperature => (260.0, 320.0, 240.0, 340.0, 0.30),
            Metric::Pressure => (10.0, 15.0, 9.0, 16.0, 0.20),
            Metric::Vibration => (0.0, 5.0, 0.0, 8.0, 0.15),
            Metric::TritiumLevel => (0.0, 1000.0, 0.0, 1500.0, 0.10),
        };
        Self {
            metric,
            normal_low,
            normal_high,
            critical_low,
            critical_high,
            weight,
        }
    }

    pub fn classify(&self, value: f64) -> Band {
        if value < self.critical_low || value > self.critical_high {
            Band::Critical
        } else if value < self.normal_low || value > self.normal_high {
            Band::Advisory
        } else {
            Band::Normal
        }
    }

    /// 100 inside the normal band; otherwise reduced by the relative deviation
    /// from the violated bound, floored at 0.
    pub fn score(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        let (bound, distance) = if value < self.normal_low {
            (self.normal_low, self.normal_low - value)
        } else if value > self.normal_high {
            (self.normal_high, value - self.normal_high)
        } else {
            return 100.0;
        };
        let scale = if bound.abs() > f64::EPSILON {
            bound.abs()
        } else {
            (self.normal_high - self.normal_low).abs().max(f64::EPSILON)
        };
        (100.0 - distance / scale * 100.0).max(0.0)
    }
}

/// Where a value sits relative to a [`MetricBand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Normal,
    Advisory,
    Critical,
}

impl Band {
    pub fn severity(&self) -> Option<FaultSeverity> {
        match self {
            Band::Normal => None,
            Band::Advisory => Some(FaultSeverity::Advisory),
            Band::Critical => Some(FaultSeverity::Critical),
        }
    }
}

/// Health classification for a reading.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthModel {
    bands: Vec<MetricBand>,
    healthy_threshold: f64,
    warning_threshold: f64,
}

impl Default for HealthModel {
    fn default() -> Self {
        Self::new(90.0, 70.0)
    }
}

impl HealthModel {
    pub fn new(healthy_threshold: f64, warning_threshold: f64) -> Self {
        Self {
            bands: Metric::ALL.iter().map(|m| MetricBand::default_for(*m)).collect(),
            healthy_threshold,
            warning_threshold,
        }
    }

    pub fn with_band(mut self, band: MetricBand) -> Self {
        if let Some(slot) = self.bands.iter_mut().find(|b| b.metric == band.metric) {
            *slot = band;
        }
        self
    }

    pub fn band(&self, metric: Metric) -> MetricBand {
        self.bands
            .iter()
            .copied()
            .find(|b| b.metric == metric)
            .unwrap_or_else(|| MetricBand::default_for(metric))
    }

    pub fn healthy_threshold(&self) -> f64 {
        self.healthy_threshold
    }

    pub fn warning_threshold(&self) -> f64 {
        self.warning_threshold
    }

    /// Weighted average of per-channel scores, clamped to [0, 100].
    ///
    /// Accumulated as a weighted deficit so an all-normal reading is exactly 100.
    pub fn score(&self, metrics: &MetricSet) -> f64 {
        let mut deficit = 0.0;
        let mut weight = 0.0;
        for band in &self.bands {
            deficit += (100.0 - band.score(metrics.get(band.metric))) * band.weight;
            weight += band.weight;
        }
        if weight <= 0.0 {
            return 100.0;
        }
        (100.0 - deficit / weight).clamp(0.0, 100.0)
    }

    pub fn status(&self, score: f64) -> ReactorStatus {
        if score >= self.healthy_threshold {
            ReactorStatus::Healthy
        } else if score >= self.warning_threshold {
            ReactorStatus::Warning
        } else {
            ReactorStatus::Unhealthy
        }
    }

    /// Severity for a threshold-derived fault, `None` while healthy.
    pub fn fault_severity(&self, score: f64) -> Option<FaultSeverity> {
        match self.status(score) {
            ReactorStatus::Healthy => None,
            ReactorStatus::Warning => Some(FaultSeverity::Advisory),
            ReactorStatus::Unhealthy => Some(FaultSeverity::Critical),
        }
    }

    pub fn classify(&self, metric: Metric, value: f64) -> Band {
        self.band(metric).classify(value)
    }

    /// First out-of-band channel, checked in a fixed priority order.
    pub fn determine_fault_type(&self, metrics: &MetricSet) -> Option<&'static str> {
        let temperature = self.band(Metric::CoreTemperature);
        let pressure = self.band(Metric::Pressure);
        let vibration = self.band(Metric::Vibration);
        let flux = self.band(Metric::NeutronFlux);
        let tritium = self.band(Metric::TritiumLevel);

        if metrics.core_temperature > temperature.normal_high {
            Some("temperature_spike")
        } else if metrics.pressure < pressure.normal_low {
            Some("pressure_drop")
        } else if metrics.vibration > vibration.normal_high {
            Some("vibration_high")
        } else if metrics.neutron_flux > flux.normal_high {
            Some("flux_instability")
        } else if metrics.tritium_level > tritium.normal_high {
            Some("tritium_high")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{Perturbation, PhysicsModel};
    use reactorsync_common::ReactorFamily;
    use strum::IntoEnumIterator;

    fn nominal() -> MetricSet {
        MetricSet {
            neutron_flux: 1.2e13,
            core_temperature: 285.0,
            pressure: 12.5,
            vibration: 2.0,
            tritium_level: 450.0,
        }
    }

    #[test]
    fn nominal_reading_scores_full_health() {
        let model = HealthModel::default();
        assert_eq!(model.score(&nominal()), 100.0);
        assert_eq!(model.status(100.0), ReactorStatus::Healthy);
        assert_eq!(model.determine_fault_type(&nominal()), None);
    }

    #[test]
    fn baseline_physics_is_healthy_for_every_family() {
        let model = HealthModel::default();
        for family in ReactorFamily::iter() {
            let mut physics = PhysicsModel::new(21);
            for tick in 0..2_000 {
                let metrics = physics
                    .reading(family, tick, &Perturbation::none())
                    .unwrap();
                assert_eq!(model.score(&metrics), 100.0, "{family} tick {tick}: {metrics:?}");
            }
        }
    }

    #[test]
    fn score_is_monotone_in_deviation() {
        let model = HealthModel::default();
        let mut previous = 100.0;
        for step in 0..40 {
            let mut reading = nominal();
            reading.core_temperature = 320.0 + step as f64 * 5.0;
            let score = model.score(&reading);
            assert!(score <= previous);
            assert!((0.0..=100.0).contains(&score));
            previous = score;
        }
        let mut low = nominal();
        low.pressure = 9.0;
        let mut lower = nominal();
        lower.pressure = 7.0;
        assert!(model.score(&lower) < model.score(&low));
    }

    #[test]
    fn status_thresholds_are_configurable() {
        let strict = HealthModel::new(95.0, 80.0);
        assert_eq!(strict.status(94.0), ReactorStatus::Warning);
        assert_eq!(strict.status(79.9), ReactorStatus::Unhealthy);
        let default = HealthModel::default();
        assert_eq!(default.status(90.0), ReactorStatus::Healthy);
        assert_eq!(default.status(70.0), ReactorStatus::Warning);
        assert_eq!(default.status(69.99), ReactorStatus::Unhealthy);
        assert_eq!(default.fault_severity(69.0), Some(FaultSeverity::Critical));
        assert_eq!(default.fault_severity(80.0), Some(FaultSeverity::Advisory));
        assert_eq!(default.fault_severity(95.0), None);
    }

    #[test]
    fn fault_type_follows_priority_order() {
        let model = HealthModel::default();
        let mut reading = nominal();
        reading.pressure = 9.5;
        reading.vibration = 6.0;
        assert_eq!(model.determine_fault_type(&reading), Some("pressure_drop"));
        reading.core_temperature = 330.0;
        assert_eq!(model.determine_fault_type(&reading), Some("temperature_spike"));
        let mut tritium = nominal();
        tritium.tritium_level = 1200.0;
        assert_eq!(model.determine_fault_type(&tritium), Some("tritium_high"));
    }

    #[test]
    fn classify_separates_advisory_and_critical() {
        let band = MetricBand::default_for(Metric::CoreTemperature);
        assert_eq!(band.classify(300.0), Band::Normal);
        assert_eq!(band.classify(330.0), Band::Advisory);
        assert_eq!(band.classify(345.0), Band::Critical);
        assert_eq!(band.classify(235.0), Band::Critical);
        assert_eq!(Band::Critical.severity(), Some(FaultSeverity::Critical));
    }

    #[test]
    fn zero_bound_uses_band_width() {
        let band = MetricBand {
            metric: Metric::Vibration,
            normal_low: 0.0,
            normal_high: 5.0,
            critical_low: 0.0,
            critical_high: 8.0,
            weight: 1.0,
        };
        assert_eq!(band.score(-1.0), 80.0);
        assert_eq!(band.score(f64::NAN), 0.0);
    }
}
