//! Daily-at-a-fixed-time cadence restricted to every Nth day of the month

use chrono::{DateTime, Datelike, LocalResult, TimeZone};

use crate::error::ChatError;

/// Fires at `hour:minute` on days 1, 1+step, 1+2*step, ... of each month.
///
/// `day_step = 3` gives days 1, 4, 7, ..., 31, the same days as the cron
/// expression `0 2 */3 * *`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    hour: u32,
    minute: u32,
    day_step: u32,
}

impl Cadence {
    pub fn new(hour: u32, minute: u32, day_step: u32) -> Result<Self, ChatError> {
        if hour > 23 || minute > 59 {
            return Err(ChatError::Config(format!(
                "invalid cadence time {:02}:{:02}",
                hour, minute
            )));
        }
        if day_step == 0 || day_step > 31 {
            return Err(ChatError::Config(format!(
                "cadence day step must be between 1 and 31, got {}",
                day_step
            )));
        }
        Ok(Self { hour, minute, day_step })
    }

    pub fn matches_day(&self, day_of_month: u32) -> bool {
        day_of_month >= 1 && (day_of_month - 1) % self.day_step == 0
    }

    /// First firing strictly after `after`, in the same time zone.
    ///
    /// Local times skipped by a DST jump are passed over; ambiguous ones
    /// resolve to the earlier instant.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let mut date = after.date_naive();
        // A matching day always exists within the next two months.
        for _ in 0..64 {
            if self.matches_day(date.day()) {
                let naive = date.and_hms_opt(self.hour, self.minute, 0)?;
                let candidate = match tz.from_local_datetime(&naive) {
                    LocalResult::Single(dt) => Some(dt),
                    LocalResult::Ambiguous(earliest, _) => Some(earliest),
                    LocalResult::None => None,
                };
                if let Some(dt) = candidate {
                    if dt > *after {
                        return Some(dt);
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            hour: 2,
            minute: 0,
            day_step: 3,
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} */{} * *", self.minute, self.hour, self.day_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn default_matches_every_third_day_from_the_first() {
        let cadence = Cadence::default();
        let days: Vec<u32> = (1..=31).filter(|d| cadence.matches_day(*d)).collect();
        assert_eq!(days, vec![1, 4, 7, 10, 13, 16, 19, 22, 25, 28, 31]);
        assert_eq!(cadence.to_string(), "0 2 */3 * *");
    }

    #[test]
    fn next_after_same_day_before_and_after_firing_time() {
        let cadence = Cadence::default();
        assert_eq!(cadence.next_after(&at(2026, 3, 4, 1, 30)), Some(at(2026, 3, 4, 2, 0)));
        // exactly at the firing time moves on
        assert_eq!(cadence.next_after(&at(2026, 3, 4, 2, 0)), Some(at(2026, 3, 7, 2, 0)));
        assert_eq!(cadence.next_after(&at(2026, 3, 5, 12, 0)), Some(at(2026, 3, 7, 2, 0)));
    }

    #[test]
    fn next_after_rolls_over_month_end() {
        let cadence = Cadence::default();
        // April has 30 days: 28 is the last match, then May 1st
        assert_eq!(cadence.next_after(&at(2026, 4, 28, 3, 0)), Some(at(2026, 5, 1, 2, 0)));
        // 31-day month fires on the 31st
        assert_eq!(cadence.next_after(&at(2026, 3, 29, 0, 0)), Some(at(2026, 3, 31, 2, 0)));
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(Cadence::new(24, 0, 3).is_err());
        assert!(Cadence::new(2, 60, 3).is_err());
        assert!(Cadence::new(2, 0, 0).is_err());
        assert!(Cadence::new(2, 0, 1).is_ok());
    }
}
