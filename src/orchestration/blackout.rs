//! Blackout window: venue trading sessions during which expensive refreshes are deferred.

use crate::config::{BlackoutConfig, ConfigResult, ConfigurationError};
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, Utc, Weekday};

#[derive(Debug, Clone, PartialEq)]
pub struct BlackoutWindow {
    enabled: bool,
    offset: FixedOffset,
    sessions: Vec<(NaiveTime, NaiveTime)>,
    operational_days: Vec<Weekday>,
}

impl BlackoutWindow {
    pub fn from_config(config: &BlackoutConfig) -> ConfigResult<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigurationError::invalid_value(
                "blackout.utc_offset_minutes",
                config.utc_offset_minutes,
                "offset must be within ±24h",
            )
        })?;
        let sessions = config
            .sessions
            .iter()
            .map(|session| session.parse())
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            enabled: config.enabled,
            offset,
            sessions,
            operational_days: config.parsed_days()?,
        })
    }

    /// A window that is never active
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            offset: Utc.fix(),
            sessions: Vec::new(),
            operational_days: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True inside a session on an operational day (venue local time).
    /// Session bounds are start-inclusive, end-exclusive.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let local = now.with_timezone(&self.offset);
        if !self.operational_days.contains(&local.weekday()) {
            return false;
        }
        let time = local.time();
        self.sessions
            .iter()
            .any(|(start, end)| time >= *start && time < *end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> BlackoutWindow {
        BlackoutWindow::from_config(&BlackoutConfig::default()).unwrap()
    }

    /// Venue time (UTC+7) to UTC
    fn venue(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_active_during_sessions_on_weekdays() {
        let window = window();
        // 2024-03-04 is a Monday
        assert!(window.is_active(venue(2024, 3, 4, 9, 0)));
        assert!(window.is_active(venue(2024, 3, 4, 11, 29)));
        assert!(!window.is_active(venue(2024, 3, 4, 11, 30)));
        assert!(!window.is_active(venue(2024, 3, 4, 12, 15)));
        assert!(window.is_active(venue(2024, 3, 4, 14, 0)));
        assert!(!window.is_active(venue(2024, 3, 4, 15, 0)));
        assert!(!window.is_active(venue(2024, 3, 4, 8, 59)));
    }

    #[test]
    fn test_inactive_on_non_operational_days() {
        let window = window();
        // Saturday and Sunday
        assert!(!window.is_active(venue(2024, 3, 9, 10, 0)));
        assert!(!window.is_active(venue(2024, 3, 10, 10, 0)));
    }

    #[test]
    fn test_disabled_window_is_never_active() {
        let config = BlackoutConfig {
            enabled: false,
            ..BlackoutConfig::default()
        };
        let window = BlackoutWindow::from_config(&config).unwrap();
        assert!(!window.is_active(venue(2024, 3, 4, 10, 0)));
        assert!(!BlackoutWindow::disabled().is_active(venue(2024, 3, 4, 10, 0)));
    }

    #[test]
    fn test_rejects_out_of_range_offset() {
        let config = BlackoutConfig {
            utc_offset_minutes: 30 * 60,
            ..BlackoutConfig::default()
        };
        assert!(BlackoutWindow::from_config(&config).is_err());
    }
}
