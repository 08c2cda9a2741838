//! Timeframe codes and bar-boundary alignment.
//!
//! All boundary math runs on UTC epoch seconds. The Unix epoch itself lies
//! on every supported boundary (UTC midnight), so flooring is plain modular
//! arithmetic for every code including 4h and 1d.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Largest bar-start boundary `<= ts`.
    pub fn floor_to_boundary(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let floored = secs - secs.rem_euclid(self.seconds());
        Utc.timestamp_opt(floored, 0).unwrap()
    }

    /// Smallest bar-start boundary strictly greater than `ts`.
    pub fn next_boundary(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.floor_to_boundary(ts) + self.duration()
    }

    /// Whether `ts` lies exactly on a bar-start boundary.
    pub fn is_boundary(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(self.seconds()) == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe code: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_floor_alignment_table() {
        let ts = at("2026-01-15T13:47:23Z");
        assert_eq!(Timeframe::M1.floor_to_boundary(ts), at("2026-01-15T13:47:00Z"));
        assert_eq!(Timeframe::M5.floor_to_boundary(ts), at("2026-01-15T13:45:00Z"));
        assert_eq!(Timeframe::M15.floor_to_boundary(ts), at("2026-01-15T13:45:00Z"));
        assert_eq!(Timeframe::M30.floor_to_boundary(ts), at("2026-01-15T13:30:00Z"));
        assert_eq!(Timeframe::H1.floor_to_boundary(ts), at("2026-01-15T13:00:00Z"));
        assert_eq!(Timeframe::H4.floor_to_boundary(ts), at("2026-01-15T12:00:00Z"));
        assert_eq!(Timeframe::D1.floor_to_boundary(ts), at("2026-01-15T00:00:00Z"));
    }

    #[test]
    fn test_next_boundary_is_strictly_greater() {
        let exact = at("2026-01-15T13:45:00Z");
        assert_eq!(Timeframe::M15.next_boundary(exact), at("2026-01-15T14:00:00Z"));

        let between = at("2026-01-15T13:45:01Z");
        assert_eq!(Timeframe::M15.next_boundary(between), at("2026-01-15T14:00:00Z"));
    }

    #[test]
    fn test_is_boundary() {
        assert!(Timeframe::H4.is_boundary(at("2026-01-15T16:00:00Z")));
        assert!(!Timeframe::H4.is_boundary(at("2026-01-15T17:00:00Z")));
        assert!(Timeframe::D1.is_boundary(at("2026-01-15T00:00:00Z")));
        assert!(!Timeframe::D1.is_boundary(at("2026-01-15T00:00:01Z")));
    }

    #[test]
    fn test_parse_roundtrip() {
        for code in ["1m", "5m", "15m", "30m", "1h", "4h", "1d"] {
            let tf: Timeframe = code.parse().unwrap();
            assert_eq!(tf.as_str(), code);
        }
        assert!("2h".parse::<Timeframe>().is_err());
    }
}
