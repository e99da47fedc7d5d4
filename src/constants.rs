//! # System Constants
//!
//! Core enums and constants that describe the data the orchestrator keeps fresh
//! and the states that data moves through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of data tracked by the freshness registry.
///
/// Each kind carries its own refresh interval and priority (see
/// [`crate::config::DataKindConfig`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Current prices
    Price,
    /// Price history (OHLCV)
    History,
    /// Financial statements and ratios
    Financials,
    /// Dividend history
    Dividends,
    /// Ratings
    Ratings,
    /// Company overview / profile
    Overview,
    /// Whole-market screener snapshot (bulk source)
    Screener,
    /// Instrument listings (bulk source)
    Listings,
}

impl DataKind {
    pub const ALL: [DataKind; 8] = [
        DataKind::Price,
        DataKind::History,
        DataKind::Financials,
        DataKind::Dividends,
        DataKind::Ratings,
        DataKind::Overview,
        DataKind::Screener,
        DataKind::Listings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Price => "price",
            DataKind::History => "history",
            DataKind::Financials => "financials",
            DataKind::Dividends => "dividends",
            DataKind::Ratings => "ratings",
            DataKind::Overview => "overview",
            DataKind::Screener => "screener",
            DataKind::Listings => "listings",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown data kind '{s}'"))
    }
}

/// Outcome recorded against an `(entity, data kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Success,
    Failed,
    Pending,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Success => "success",
            UpdateStatus::Failed => "failed",
            UpdateStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(UpdateStatus::Success),
            "failed" => Ok(UpdateStatus::Failed),
            "pending" => Ok(UpdateStatus::Pending),
            other => Err(format!("unknown update status '{other}'")),
        }
    }
}

/// Why a work item was put on a due-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkReason {
    NeverUpdated,
    Stale,
    Retry,
}

/// Derived freshness label used in health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLabel {
    Healthy,
    Degraded,
    Stale,
    Critical,
    NoData,
}

impl HealthLabel {
    /// Map a fresh percentage onto a label.
    pub fn from_fresh_percentage(percent_fresh: f64) -> Self {
        if percent_fresh >= system::HEALTHY_FRESH_PERCENT {
            HealthLabel::Healthy
        } else if percent_fresh >= system::DEGRADED_FRESH_PERCENT {
            HealthLabel::Degraded
        } else if percent_fresh >= system::STALE_FRESH_PERCENT {
            HealthLabel::Stale
        } else {
            HealthLabel::Critical
        }
    }

    pub fn is_problematic(&self) -> bool {
        matches!(self, HealthLabel::Stale | HealthLabel::Critical)
    }
}

/// System-level constants
pub mod system {
    /// Entity id used for data kinds fetched as one all-or-nothing unit
    pub const BULK_ENTITY_ID: &str = "*";

    pub const HEALTHY_FRESH_PERCENT: f64 = 80.0;
    pub const DEGRADED_FRESH_PERCENT: f64 = 50.0;
    pub const STALE_FRESH_PERCENT: f64 = 20.0;

    /// Highest and lowest configurable priority
    pub const MIN_PRIORITY: u8 = 1;
    pub const MAX_PRIORITY: u8 = 5;

    pub const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_kind_round_trips_through_str() {
        for kind in DataKind::ALL {
            assert_eq!(kind.as_str().parse::<DataKind>().unwrap(), kind);
        }
        assert_eq!("PRICE".parse::<DataKind>().unwrap(), DataKind::Price);
        assert!("weather".parse::<DataKind>().is_err());
    }

    #[test]
    fn test_health_label_thresholds() {
        assert_eq!(HealthLabel::from_fresh_percentage(100.0), HealthLabel::Healthy);
        assert_eq!(HealthLabel::from_fresh_percentage(80.0), HealthLabel::Healthy);
        assert_eq!(HealthLabel::from_fresh_percentage(79.9), HealthLabel::Degraded);
        assert_eq!(HealthLabel::from_fresh_percentage(50.0), HealthLabel::Degraded);
        assert_eq!(HealthLabel::from_fresh_percentage(20.0), HealthLabel::Stale);
        assert_eq!(HealthLabel::from_fresh_percentage(19.9), HealthLabel::Critical);
        assert!(HealthLabel::Critical.is_problematic());
        assert!(!HealthLabel::Degraded.is_problematic());
    }

    #[test]
    fn test_update_status_serializes_snake_case() {
        let json = serde_json::to_string(&UpdateStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        assert_eq!("pending".parse::<UpdateStatus>().unwrap(), UpdateStatus::Pending);
    }
}
