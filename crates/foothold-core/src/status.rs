use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::item::Item;

/// Time-relative badge. Variants are ordered by urgency so that, for a fixed
/// item, the value never decreases as time passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Status {
    #[default]
    None,
    Upcoming,
    Urgent,
    PastDue,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::None => "",
            Status::Upcoming => "Upcoming",
            Status::Urgent => "Urgent",
            Status::PastDue => "Past Due",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusThresholds {
    #[serde(default = "default_urgent_hours")]
    pub urgent_hours: u32,
    #[serde(default = "default_upcoming_days")]
    pub upcoming_days: u32,
}

fn default_urgent_hours() -> u32 {
    24
}

fn default_upcoming_days() -> u32 {
    3
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            urgent_hours: default_urgent_hours(),
            upcoming_days: default_upcoming_days(),
        }
    }
}

impl StatusThresholds {
    /// Zero thresholds fall back to the defaults, as the settings form did.
    pub fn sanitized(self) -> Self {
        Self {
            urgent_hours: if self.urgent_hours == 0 {
                default_urgent_hours()
            } else {
                self.urgent_hours
            },
            upcoming_days: if self.upcoming_days == 0 {
                default_upcoming_days()
            } else {
                self.upcoming_days
            },
        }
    }
}

/// Must be called with the current time on every render; nothing is cached.
pub fn status(item: &Item, now: NaiveDateTime, thresholds: &StatusThresholds) -> Status {
    if item.completed {
        return Status::None;
    }
    let Some(due) = item.due_instant() else {
        return Status::None;
    };

    let diff = due - now;
    if diff < Duration::zero() {
        Status::PastDue
    } else if diff <= Duration::hours(i64::from(thresholds.urgent_hours)) {
        Status::Urgent
    } else if diff <= Duration::days(i64::from(thresholds.upcoming_days)) {
        Status::Upcoming
    } else {
        Status::None
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

    use super::{Status, StatusThresholds, status};
    use crate::item::{Item, ItemDraft};

    fn item_due(date: (i32, u32, u32), time: Option<(u32, u32)>) -> Item {
        let mut draft = ItemDraft::new("x", "task");
        draft.due_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2);
        draft.due_time = time.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0));
        Item::from_draft(1, draft, 0)
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").expect("valid instant")
    }

    #[test]
    fn no_due_date_or_completed_is_none() {
        let t = StatusThresholds::default();
        let now = at("2024-01-10T09:00:00");
        let mut draft = ItemDraft::new("x", "task");
        draft.due_date = None;
        assert_eq!(status(&Item::from_draft(1, draft, 0), now, &t), Status::None);

        let mut done = item_due((2024, 1, 1), None);
        done.completed = true;
        assert_eq!(status(&done, now, &t), Status::None);
    }

    #[test]
    fn thresholds_partition_the_timeline() {
        let t = StatusThresholds::default();
        let item = item_due((2024, 1, 10), Some((10, 0)));
        assert_eq!(status(&item, at("2024-01-10T10:00:01"), &t), Status::PastDue);
        assert_eq!(status(&item, at("2024-01-10T10:00:00"), &t), Status::Urgent);
        assert_eq!(status(&item, at("2024-01-09T10:00:00"), &t), Status::Urgent);
        assert_eq!(status(&item, at("2024-01-09T09:59:59"), &t), Status::Upcoming);
        assert_eq!(status(&item, at("2024-01-07T10:00:00"), &t), Status::Upcoming);
        assert_eq!(status(&item, at("2024-01-07T09:59:59"), &t), Status::None);
    }

    #[test]
    fn missing_time_means_end_of_day() {
        let t = StatusThresholds::default();
        let item = item_due((2024, 1, 10), None);
        assert_eq!(status(&item, at("2024-01-10T23:58:00"), &t), Status::Urgent);
        assert_eq!(status(&item, at("2024-01-10T23:59:01"), &t), Status::PastDue);
    }

    #[test]
    fn status_only_moves_forward_as_time_passes() {
        let t = StatusThresholds {
            urgent_hours: 6,
            upcoming_days: 2,
        };
        let item = item_due((2024, 3, 1), Some((12, 0)));
        let mut now = at("2024-02-20T00:00:00");
        let mut last = Status::None;
        while now < at("2024-03-03T00:00:00") {
            let current = status(&item, now, &t);
            assert!(current >= last, "{current:?} after {last:?} at {now}");
            last = current;
            now += Duration::minutes(17);
        }
        assert_eq!(last, Status::PastDue);
    }

    #[test]
    fn zero_settings_fall_back_to_defaults() {
        let t = StatusThresholds {
            urgent_hours: 0,
            upcoming_days: 5,
        }
        .sanitized();
        assert_eq!(t.urgent_hours, 24);
        assert_eq!(t.upcoming_days, 5);
    }
}
