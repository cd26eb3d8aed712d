//! Tool commands decoded from the wire
//!
//! Parameter problems never reject a command: a missing or invalid field
//! falls back to its default and is logged.

use serde::Serialize;
use serde_json::Value;

use crate::Error;

/// Tempo used when `bpm` is missing or out of range
pub const DEFAULT_BPM: u32 = 110;

/// Accepted tempo range
pub const BPM_RANGE: std::ops::RangeInclusive<u32> = 20..=300;

/// Countdown used when `seconds` is missing or invalid
pub const DEFAULT_TIMER_SECONDS: u64 = 120;

/// Label used when a timer command carries none
pub const DEFAULT_TIMER_LABEL: &str = "timer";

/// Presentation style of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    #[default]
    Checklist,
    Banner,
    Alert,
}

impl CardKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "checklist" => Some(Self::Checklist),
            "banner" => Some(Self::Banner),
            "alert" => Some(Self::Alert),
            _ => None,
        }
    }
}

/// A locally executed instruction from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    StartMetronome { bpm: u32 },
    StopMetronome,
    StartTimer { label: String, seconds: u64 },
    StopTimer { label: String },
    ShowCard {
        kind: CardKind,
        title: String,
        items: Vec<String>,
    },
}

impl ToolCommand {
    /// Decode a `tool` message
    ///
    /// Returns `None` for tool names this client does not implement.
    #[must_use]
    pub fn from_wire(name: &str, params: &Value) -> Option<Self> {
        let command = match name {
            "start_metronome" => {
                let bpm = match param_u64(params, "bpm") {
                    Some(bpm) => u32::try_from(bpm)
                        .ok()
                        .filter(|b| BPM_RANGE.contains(b))
                        .unwrap_or_else(|| {
                            param_warning(name, &format!("bpm {bpm} out of range"));
                            DEFAULT_BPM
                        }),
                    None => {
                        param_warning(name, "missing bpm");
                        DEFAULT_BPM
                    }
                };
                Self::StartMetronome { bpm }
            }
            "stop_metronome" => Self::StopMetronome,
            "start_timer" => {
                let seconds = param_u64(params, "seconds")
                    .filter(|s| *s > 0)
                    .unwrap_or_else(|| {
                        param_warning(name, "missing or invalid seconds");
                        DEFAULT_TIMER_SECONDS
                    });
                Self::StartTimer {
                    label: timer_label(name, params),
                    seconds,
                }
            }
            "stop_timer" => Self::StopTimer {
                label: timer_label(name, params),
            },
            "show_ui" => {
                let kind = match params.get("card_type").and_then(Value::as_str) {
                    Some(raw) => CardKind::parse(raw).unwrap_or_else(|| {
                        param_warning(name, &format!("unknown card_type {raw}"));
                        CardKind::default()
                    }),
                    None => CardKind::default(),
                };
                let title = params
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                let items = params
                    .get("items")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(item_text).collect())
                    .unwrap_or_default();
                Self::ShowCard { kind, title, items }
            }
            other => {
                tracing::warn!(tool = other, "unknown tool, ignoring");
                return None;
            }
        };

        Some(command)
    }

    /// Wire name of the command
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartMetronome { .. } => "start_metronome",
            Self::StopMetronome => "stop_metronome",
            Self::StartTimer { .. } => "start_timer",
            Self::StopTimer { .. } => "stop_timer",
            Self::ShowCard { .. } => "show_ui",
        }
    }
}

fn param_warning(tool: &str, detail: &str) {
    let error = Error::ToolParam(detail.to_string());
    tracing::warn!(tool, error = %error, "using default");
}

/// Read a non-negative integer, accepting floats and numeric strings
fn param_u64(params: &Value, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let rounded = f.round() as u64;
                    rounded
                })
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn timer_label(tool: &str, params: &Value) -> String {
    params
        .get("label")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map_or_else(
            || {
                param_warning(tool, "missing label");
                DEFAULT_TIMER_LABEL.to_string()
            },
            str::to_string,
        )
}

fn item_text(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
