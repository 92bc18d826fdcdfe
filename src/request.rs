//! Profiling request parameters and their validation.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::{Config, PerfscopeError, PerfscopeResult, ProcessLookup};

pub const MIN_DURATION_SECS: i64 = 1;
pub const MAX_DURATION_SECS: i64 = 300;
pub const MIN_FREQUENCY_HZ: i64 = 1;
pub const MAX_FREQUENCY_HZ: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingEvent {
    CpuClock,
    Cycles,
    Instructions,
    CacheMisses,
}

impl SamplingEvent {
    pub const ALL: [SamplingEvent; 4] = [
        Self::CpuClock,
        Self::Cycles,
        Self::Instructions,
        Self::CacheMisses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuClock => "cpu-clock",
            Self::Cycles => "cycles",
            Self::Instructions => "instructions",
            Self::CacheMisses => "cache-misses",
        }
    }
}

impl fmt::Display for SamplingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingEvent {
    type Err = PerfscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s.trim())
            .ok_or_else(|| {
                PerfscopeError::invalid(
                    "event",
                    format!(
                        "unsupported event {s:?} (expected one of: {})",
                        Self::ALL.map(|e| e.as_str()).join(", ")
                    ),
                )
            })
    }
}

impl clap::ValueEnum for SamplingEvent {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

/// A request as received from the transport layer, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProfileRequest {
    pub pid: i64,
    #[serde(default = "default_duration")]
    pub duration: i64,
    #[serde(default = "default_frequency")]
    pub frequency: i64,
    #[serde(default)]
    pub event: Option<String>,
}

fn default_duration() -> i64 {
    10
}

fn default_frequency() -> i64 {
    99
}

impl RawProfileRequest {
    pub fn new(pid: i64) -> Self {
        Self {
            pid,
            duration: default_duration(),
            frequency: default_frequency(),
            event: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRequest {
    pid: u32,
    duration: u64,
    frequency: u32,
    event: SamplingEvent,
}

impl ProfileRequest {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency
    }

    pub fn event(&self) -> SamplingEvent {
        self.event
    }
}

/// Checks ranges and the event name, then asks `lookup` whether the target is alive.
pub fn validate_request(
    raw: &RawProfileRequest,
    lookup: &dyn ProcessLookup,
    config: &Config,
) -> PerfscopeResult<ProfileRequest> {
    let pid = u32::try_from(raw.pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| PerfscopeError::invalid("pid", format!("invalid pid {}", raw.pid)))?;

    if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&raw.duration) {
        return Err(PerfscopeError::invalid(
            "duration",
            format!(
                "duration must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS} seconds, got {}",
                raw.duration
            ),
        ));
    }

    if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&raw.frequency) {
        return Err(PerfscopeError::invalid(
            "frequency",
            format!(
                "frequency must be between {MIN_FREQUENCY_HZ} and {MAX_FREQUENCY_HZ} Hz, got {}",
                raw.frequency
            ),
        ));
    }

    let event = match raw.event.as_deref() {
        Some(name) if !name.trim().is_empty() => name.parse::<SamplingEvent>()?,
        _ => config.default_event,
    };

    if !lookup.is_running(pid) {
        return Err(PerfscopeError::ProcessNotFound(pid));
    }

    Ok(ProfileRequest {
        pid,
        duration: raw.duration as u64,
        frequency: raw.frequency as u32,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alive(bool);

    impl ProcessLookup for Alive {
        fn is_running(&self, _pid: u32) -> bool {
            self.0
        }
    }

    fn field_of(err: PerfscopeError) -> &'static str {
        match err {
            PerfscopeError::InvalidParameter { field, .. } => field,
            other => panic!("expected invalid parameter, got {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_when_fields_are_omitted() {
        let raw: RawProfileRequest = serde_json::from_str(r#"{"pid": 42}"#).expect("request");
        let req = validate_request(&raw, &Alive(true), &Config::default()).expect("valid");
        assert_eq!(req.pid(), 42);
        assert_eq!(req.duration_secs(), 10);
        assert_eq!(req.frequency_hz(), 99);
        assert_eq!(req.event(), SamplingEvent::CpuClock);
    }

    #[test]
    fn duration_above_bound_names_duration() {
        let mut raw = RawProfileRequest::new(42);
        raw.duration = 301;
        let err = validate_request(&raw, &Alive(true), &Config::default()).unwrap_err();
        assert_eq!(field_of(err), "duration");
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let cfg = Config::default();
        let mut raw = RawProfileRequest::new(0);
        assert_eq!(field_of(validate_request(&raw, &Alive(true), &cfg).unwrap_err()), "pid");

        raw = RawProfileRequest::new(-5);
        assert_eq!(field_of(validate_request(&raw, &Alive(true), &cfg).unwrap_err()), "pid");

        raw = RawProfileRequest::new(1);
        raw.duration = 0;
        assert_eq!(field_of(validate_request(&raw, &Alive(true), &cfg).unwrap_err()), "duration");

        raw = RawProfileRequest::new(1);
        raw.frequency = 10_001;
        assert_eq!(field_of(validate_request(&raw, &Alive(true), &cfg).unwrap_err()), "frequency");

        raw = RawProfileRequest::new(1);
        raw.event = Some("branch-misses".to_string());
        assert_eq!(field_of(validate_request(&raw, &Alive(true), &cfg).unwrap_err()), "event");
    }

    #[test]
    fn bounds_are_inclusive() {
        let mut raw = RawProfileRequest::new(7);
        raw.duration = 300;
        raw.frequency = 10_000;
        raw.event = Some("cache-misses".to_string());
        let req = validate_request(&raw, &Alive(true), &Config::default()).expect("valid");
        assert_eq!(req.duration_secs(), 300);
        assert_eq!(req.frequency_hz(), 10_000);
        assert_eq!(req.event(), SamplingEvent::CacheMisses);
    }

    #[test]
    fn missing_event_uses_configured_default() {
        let cfg = Config {
            default_event: SamplingEvent::Instructions,
            ..Config::default()
        };
        let mut raw = RawProfileRequest::new(7);
        raw.event = Some("  ".to_string());
        let req = validate_request(&raw, &Alive(true), &cfg).expect("valid");
        assert_eq!(req.event(), SamplingEvent::Instructions);
    }

    #[test]
    fn dead_process_is_not_found() {
        let raw = RawProfileRequest::new(99);
        let err = validate_request(&raw, &Alive(false), &Config::default()).unwrap_err();
        assert!(matches!(err, PerfscopeError::ProcessNotFound(99)));
    }

    #[test]
    fn range_errors_win_over_process_lookup() {
        let mut raw = RawProfileRequest::new(99);
        raw.duration = 301;
        let err = validate_request(&raw, &Alive(false), &Config::default()).unwrap_err();
        assert_eq!(field_of(err), "duration");
    }
}
