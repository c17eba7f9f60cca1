//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Reactor, telemetry, and fault records shared by every subsystem."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Numeric reactor identifier used as the broker partition key.
pub type ReactorId = u32;

/// Named reactor design class. Each family carries its own baseline constants.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(from = "String", into = "String")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ReactorFamily {
    #[default]
    Candu,
    Smr,
    Pwr,
    Bwr,
}

impl ReactorFamily {
    /// Parse a family name, falling back to CANDU for anything unrecognised.
    pub fn parse_lenient(value: &str) -> Self {
        value.trim().parse().unwrap_or_default()
    }
}

impl From<String> for ReactorFamily {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl From<ReactorFamily> for String {
    fn from(value: ReactorFamily) -> Self {
        value.to_string()
    }
}

/// Operating status derived from the health score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReactorStatus {
    #[default]
    Healthy,
    Warning,
    Unhealthy,
}

/// Registered reactor and its derived health state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reactor {
    pub id: ReactorId,
    pub name: String,
    #[serde(rename = "type")]
    pub family: ReactorFamily,
    pub latitude: f64,
    pub longitude: f64,
    pub status: ReactorStatus,
    pub health_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reactor {
    /// Construct a freshly registered reactor reporting full health.
    pub fn new(
        id: ReactorId,
        name: impl Into<String>,
        family: ReactorFamily,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            family,
            latitude,
            longitude,
            status: ReactorStatus::Healthy,
            health_score: 100.0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Telemetry channels produced for every reactor on every tick.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    NeutronFlux,
    CoreTemperature,
    Pressure,
    Vibration,
    TritiumLevel,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::NeutronFlux,
        Metric::CoreTemperature,
        Metric::Pressure,
        Metric::Vibration,
        Metric::TritiumLevel,
    ];

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::NeutronFlux => "n/cm2/s",
            Metric::CoreTemperature => "degC",
            Metric::Pressure => "MPa",
            Metric::Vibration => "mm/s",
            Metric::TritiumLevel => "pCi/L",
        }
    }
}

/// One value per telemetry channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSet {
    pub neutron_flux: f64,
    pub core_temperature: f64,
    pub pressure: f64,
    pub vibration: f64,
    pub tritium_level: f64,
}

impl MetricSet {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::NeutronFlux => self.neutron_flux,
            Metric::CoreTemperature => self.core_temperature,
            Metric::Pressure => self.pressure,
            Metric::Vibration => self.vibration,
            Metric::TritiumLevel => self.tritium_level,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::NeutronFlux => self.neutron_flux = value,
            Metric::CoreTemperature => self.core_temperature = value,
            Metric::Pressure => self.pressure = value,
            Metric::Vibration => self.vibration = value,
            Metric::TritiumLevel => self.tritium_level = value,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL.into_iter().map(move |metric| (metric, self.get(metric)))
    }
}

/// Reading emitted for one reactor at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub reactor_id: ReactorId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: MetricSet,
}

/// Stored form of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedReading {
    pub id: u64,
    #[serde(flatten)]
    pub reading: TelemetryReading,
    pub created_at: DateTime<Utc>,
}

/// Fault severity. `yellow` and `red` are accepted on the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum FaultSeverity {
    #[default]
    #[serde(alias = "yellow")]
    #[strum(to_string = "advisory", serialize = "yellow")]
    Advisory,
    #[serde(alias = "red")]
    #[strum(to_string = "critical", serialize = "red")]
    Critical,
}

/// Persisted record of a threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub id: u64,
    pub reactor_id: ReactorId,
    pub fault_type: String,
    pub severity: FaultSeverity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Fault awaiting an identifier from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFault {
    pub reactor_id: ReactorId,
    pub fault_type: String,
    pub severity: FaultSeverity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_family_falls_back_to_candu() {
        assert_eq!(ReactorFamily::parse_lenient("smr"), ReactorFamily::Smr);
        assert_eq!(ReactorFamily::parse_lenient(" PWR "), ReactorFamily::Pwr);
        assert_eq!(ReactorFamily::parse_lenient("MAGNOX"), ReactorFamily::Candu);
        let family: ReactorFamily = serde_json::from_str("\"fusion\"").unwrap();
        assert_eq!(family, ReactorFamily::Candu);
        assert_eq!(serde_json::to_string(&ReactorFamily::Bwr).unwrap(), "\"BWR\"");
    }

    #[test]
    fn severity_accepts_colour_aliases() {
        let red: FaultSeverity = serde_json::from_str("\"red\"").unwrap();
        let yellow: FaultSeverity = "yellow".parse().unwrap();
        assert_eq!(red, FaultSeverity::Critical);
        assert_eq!(yellow, FaultSeverity::Advisory);
        assert!(FaultSeverity::Critical > FaultSeverity::Advisory);
        assert_eq!(serde_json::to_string(&red).unwrap(), "\"critical\"");
    }

    #[test]
    fn reading_serialises_flat() {
        let reading = TelemetryReading {
            reactor_id: 7,
            timestamp: Utc::now(),
            metrics: MetricSet {
                neutron_flux: 1.2e13,
                core_temperature: 285.0,
                pressure: 12.5,
                vibration: 2.0,
                tritium_level: 450.0,
            },
        };
        let value = serde_json::to_value(reading).unwrap();
        assert_eq!(value["reactor_id"], 7);
        assert_eq!(value["core_temperature"], 285.0);
        assert!(value.get("metrics").is_none());
    }
}
