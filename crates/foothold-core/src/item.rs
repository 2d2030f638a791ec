use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datetime::{compose_due_instant, due_date_serde, due_time_serde};

pub type ItemId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,

    pub title: String,

    /// Category id. May reference a category that no longer exists.
    #[serde(rename = "type")]
    pub category: String,

    #[serde(default, with = "due_date_serde")]
    pub due_date: Option<NaiveDate>,

    #[serde(default, with = "due_time_serde")]
    pub due_time: Option<NaiveTime>,

    #[serde(default, with = "optional_text")]
    pub description: Option<String>,

    #[serde(default)]
    pub subtasks: Vec<Subtask>,

    #[serde(default)]
    pub reminders: Vec<Reminder>,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub created_at: i64,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Item {
    pub fn from_draft(id: ItemId, draft: ItemDraft, created_at: i64) -> Self {
        let mut item = Self {
            id,
            title: String::new(),
            category: String::new(),
            due_date: None,
            due_time: None,
            description: None,
            subtasks: vec![],
            reminders: vec![],
            completed: draft.completed.unwrap_or(false),
            created_at: draft.created_at.unwrap_or(created_at),
            extra: BTreeMap::new(),
        };
        item.apply_draft(draft);
        item
    }

    /// Replaces the editable fields. `completed` and `created_at` only change
    /// when the draft carries them.
    pub fn apply_draft(&mut self, draft: ItemDraft) {
        let ItemDraft {
            title,
            category,
            due_date,
            due_time,
            description,
            subtasks,
            reminders,
            completed,
            created_at,
        } = draft;

        self.title = title.trim().to_string();
        self.category = category;
        self.due_date = due_date;
        self.due_time = due_date.and(due_time);
        self.description = description.filter(|text| !text.trim().is_empty());
        self.subtasks = subtasks;
        self.reminders = reminders.into_iter().map(Reminder::normalized).collect();
        if let Some(completed) = completed {
            self.completed = completed;
        }
        if let Some(created_at) = created_at {
            self.created_at = created_at;
        }
    }

    pub fn to_draft(&self) -> ItemDraft {
        ItemDraft {
            title: self.title.clone(),
            category: self.category.clone(),
            due_date: self.due_date,
            due_time: self.due_time,
            description: self.description.clone(),
            subtasks: self.subtasks.clone(),
            reminders: self.reminders.clone(),
            completed: None,
            created_at: None,
        }
    }

    /// Due date plus time of day, defaulting the time to 23:59:00.
    pub fn due_instant(&self) -> Option<NaiveDateTime> {
        self.due_date
            .map(|date| compose_due_instant(date, self.due_time))
    }

    /// Reminders are only anchored when both a date and a time are set.
    pub fn reminder_anchor(&self) -> Option<NaiveDateTime> {
        match (self.due_date, self.due_time) {
            (Some(date), Some(time)) => Some(date.and_time(time)),
            _ => None,
        }
    }

    pub fn subtask_progress(&self) -> (usize, usize) {
        let done = self.subtasks.iter().filter(|s| s.completed).count();
        (done, self.subtasks.len())
    }

    /// `query` must already be lowercased and trimmed.
    pub fn matches_query(&self, query: &str) -> bool {
        if self.title.to_lowercase().contains(query) {
            return true;
        }
        self.description
            .as_deref()
            .map(|text| text.to_lowercase().contains(query))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subtask {
    pub id: i64,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReminderUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl ReminderUnit {
    pub fn millis(self) -> i64 {
        match self {
            ReminderUnit::Minutes => 60 * 1000,
            ReminderUnit::Hours => 60 * 60 * 1000,
            ReminderUnit::Days => 24 * 60 * 60 * 1000,
            ReminderUnit::Weeks => 7 * 24 * 60 * 60 * 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReminderUnit::Minutes => "minutes",
            ReminderUnit::Hours => "hours",
            ReminderUnit::Days => "days",
            ReminderUnit::Weeks => "weeks",
        }
    }
}

impl fmt::Display for ReminderUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reminder {
    pub val: u32,
    pub unit: ReminderUnit,
}

impl Reminder {
    const FALLBACK_VALUE: u32 = 10;

    pub fn new(val: u32, unit: ReminderUnit) -> Self {
        Self { val, unit }.normalized()
    }

    /// The form used to fall back to 10 when the number field was empty or zero.
    fn normalized(self) -> Self {
        if self.val == 0 {
            Self {
                val: Self::FALLBACK_VALUE,
                ..self
            }
        } else {
            self
        }
    }

    pub fn offset(&self) -> Duration {
        Duration::milliseconds(i64::from(self.val) * self.unit.millis())
    }
}

impl Default for Reminder {
    fn default() -> Self {
        Self {
            val: 30,
            unit: ReminderUnit::Minutes,
        }
    }
}

impl fmt::Display for Reminder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.val, self.unit)
    }
}

impl FromStr for Reminder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = RE
            .get_or_init(|| {
                Regex::new(r"^(\d+)\s*(m|mins?|minutes?|h|hrs?|hours?|d|days?|w|wks?|weeks?)$").ok()
            })
            .as_ref()
            .ok_or_else(|| anyhow!("reminder pattern failed to compile"))?;

        let lowered = s.trim().to_ascii_lowercase();
        let caps = re
            .captures(&lowered)
            .ok_or_else(|| anyhow!("invalid reminder '{s}': expected e.g. 30m, 2h, 1d, 1w"))?;

        let val: u32 = caps[1]
            .parse()
            .map_err(|err| anyhow!("invalid reminder value in '{s}': {err}"))?;
        if val == 0 {
            return Err(anyhow!("reminder value must be positive: {s}"));
        }

        let unit = match caps[2].chars().next() {
            Some('m') => ReminderUnit::Minutes,
            Some('h') => ReminderUnit::Hours,
            Some('d') => ReminderUnit::Days,
            _ => ReminderUnit::Weeks,
        };

        Ok(Self { val, unit })
    }
}

/// The editable shape of an item, as submitted by a form or the CLI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDraft {
    pub title: String,
    pub category: String,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub subtasks: Vec<Subtask>,
    pub reminders: Vec<Reminder>,
    pub completed: Option<bool>,
    pub created_at: Option<i64>,
}

impl ItemDraft {
    pub fn new(title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: category.into(),
            ..Self::default()
        }
    }
}

/// Staging list for subtasks while an item is being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtaskDraft {
    subtasks: Vec<Subtask>,
}

impl SubtaskDraft {
    pub fn from_item(item: &Item) -> Self {
        Self {
            subtasks: item.subtasks.clone(),
        }
    }

    pub fn add(&mut self, id: i64, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.subtasks.push(Subtask {
            id,
            text: text.to_string(),
            completed: false,
        });
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<Subtask> {
        (index < self.subtasks.len()).then(|| self.subtasks.remove(index))
    }

    pub fn reorder(&mut self, order: &[i64]) {
        let current = std::mem::take(&mut self.subtasks);
        self.subtasks = crate::reorder::intersect_in_order(current, order, |s| s.id);
    }

    pub fn as_slice(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn into_vec(self) -> Vec<Subtask> {
        self.subtasks
    }
}

/// Empty strings and `null` both read as `None`; `None` is written as `""`.
pub(crate) mod optional_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.as_deref().unwrap_or_default())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.filter(|text| !text.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{Item, ItemDraft, Reminder, ReminderUnit, SubtaskDraft};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn reads_items_written_by_the_web_app() {
        let raw = json!({
            "id": 1704880000000_i64,
            "title": "Grocery Shopping",
            "type": "task",
            "dueDate": "2024-01-10",
            "dueTime": "",
            "description": "",
            "subtasks": [{"id": 1, "text": "milk", "completed": true}],
            "reminders": [{"val": 30, "unit": "minutes"}],
            "completed": false,
            "notified": false,
            "createdAt": 1704880000000_i64
        });

        let item: Item = serde_json::from_value(raw).expect("parse item");
        assert_eq!(item.due_date, Some(date(2024, 1, 10)));
        assert_eq!(item.due_time, None);
        assert_eq!(item.description, None);
        assert_eq!(item.subtask_progress(), (1, 1));
        assert_eq!(item.extra.get("notified"), Some(&json!(false)));

        let back = serde_json::to_value(&item).expect("serialize item");
        assert_eq!(back["type"], json!("task"));
        assert_eq!(back["dueTime"], json!(""));
        assert_eq!(back["notified"], json!(false));
    }

    #[test]
    fn due_instant_defaults_to_end_of_day() {
        let mut draft = ItemDraft::new("Report", "task");
        draft.due_date = Some(date(2024, 1, 10));
        let item = Item::from_draft(1, draft, 1);

        let due = item.due_instant().expect("has due instant");
        assert_eq!(due.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-10 23:59:00");
        assert!(item.reminder_anchor().is_none());
    }

    #[test]
    fn draft_drops_time_without_date_and_keeps_completion() {
        let mut draft = ItemDraft::new("  Plan  ", "goal");
        draft.due_time = chrono::NaiveTime::from_hms_opt(9, 0, 0);
        draft.completed = Some(true);
        let mut item = Item::from_draft(7, draft, 100);
        assert_eq!(item.title, "Plan");
        assert_eq!(item.due_time, None);
        assert!(item.completed);

        item.apply_draft(ItemDraft::new("Plan v2", "goal"));
        assert!(item.completed);
        assert_eq!(item.created_at, 100);
    }

    #[test]
    fn parses_reminder_shorthand() {
        let r: Reminder = "30m".parse().expect("minutes");
        assert_eq!(r, Reminder::new(30, ReminderUnit::Minutes));
        let r: Reminder = "2 hours".parse().expect("hours");
        assert_eq!(r.unit, ReminderUnit::Hours);
        let r: Reminder = "1w".parse().expect("weeks");
        assert_eq!(r.offset().num_days(), 7);
        assert!("0m".parse::<Reminder>().is_err());
        assert!("soon".parse::<Reminder>().is_err());
        assert_eq!(Reminder::new(0, ReminderUnit::Days).val, 10);
    }

    #[test]
    fn subtask_staging_list() {
        let mut staging = SubtaskDraft::default();
        assert!(staging.add(1, "first"));
        assert!(staging.add(2, "second"));
        assert!(!staging.add(3, "   "));
        staging.reorder(&[2, 1, 99]);
        let texts: Vec<_> = staging.as_slice().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);

        let removed = staging.remove(0).expect("remove first");
        assert_eq!(removed.id, 2);
        assert!(staging.remove(5).is_none());
    }
}
