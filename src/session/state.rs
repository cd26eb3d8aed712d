//! Streaming lifecycle and scenario state

use std::fmt;

use serde::{Serialize, Serializer};

/// Streaming lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingStatus {
    /// No session running
    #[default]
    Stopped,
    /// Devices and connection being set up
    Waiting,
    /// Audio and frames flowing
    Streaming,
}

impl fmt::Display for StreamingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Waiting => "waiting",
            Self::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Emergency classification asserted by the service
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scenario {
    #[default]
    None,
    Cpr,
    Bleeding,
    Choking,
    Burn,
    Fracture,
    AllergicReaction,
    WoundCare,
    OtherEmergency,
    MinorInjury,
    Resolved,
    /// A value this client does not know
    Other(String),
}

impl Scenario {
    /// Parse a wire value; unknown strings are kept as [`Scenario::Other`]
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "" | "none" => Self::None,
            "cpr" => Self::Cpr,
            "bleeding" => Self::Bleeding,
            "choking" => Self::Choking,
            "burn" => Self::Burn,
            "fracture" => Self::Fracture,
            "allergic_reaction" => Self::AllergicReaction,
            "wound_care" => Self::WoundCare,
            "other_emergency" => Self::OtherEmergency,
            "minor_injury" => Self::MinorInjury,
            "resolved" => Self::Resolved,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire spelling
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Cpr => "cpr",
            Self::Bleeding => "bleeding",
            Self::Choking => "choking",
            Self::Burn => "burn",
            Self::Fracture => "fracture",
            Self::AllergicReaction => "allergic_reaction",
            Self::WoundCare => "wound_care",
            Self::OtherEmergency => "other_emergency",
            Self::MinorInjury => "minor_injury",
            Self::Resolved => "resolved",
            Self::Other(s) => s,
        }
    }

    /// No emergency in progress
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        matches!(self, Self::None | Self::Resolved)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Scenario {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How urgent the scenario is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Minor,
    Moderate,
    Critical,
}

impl Severity {
    /// Parse a wire value; unknown strings are treated as minor
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "critical" => Self::Critical,
            "moderate" => Self::Moderate,
            _ => Self::Minor,
        }
    }

    /// Wire spelling
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Critical => "critical",
        }
    }

    /// Moderate or critical
    #[must_use]
    pub const fn is_emergency(self) -> bool {
        matches!(self, Self::Moderate | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest scenario assessment, replaced wholesale on every update
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ScenarioState {
    pub scenario: Scenario,
    pub severity: Severity,
    pub summary: String,
    pub body_region: String,
}

impl ScenarioState {
    /// Build from the raw fields of a `scenario_update` message
    #[must_use]
    pub fn from_wire(scenario: &str, severity: &str, summary: &str, body_region: &str) -> Self {
        Self {
            scenario: Scenario::parse(scenario),
            severity: Severity::parse(severity),
            summary: summary.trim().to_string(),
            body_region: body_region.trim().to_lowercase(),
        }
    }

    /// What this update means for the activation override
    ///
    /// `Some(false)` clears it, `Some(true)` forces it, `None` leaves it.
    #[must_use]
    pub const fn activation_override(&self) -> Option<bool> {
        if self.scenario.is_quiet() {
            Some(false)
        } else if self.severity.is_emergency() {
            Some(true)
        } else {
            None
        }
    }
}
