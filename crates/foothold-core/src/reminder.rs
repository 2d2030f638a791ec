use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, instrument, warn};

use crate::item::{Item, ItemId, Reminder};

/// Default tick period; the firing window is the same length.
pub const DEFAULT_TICK_SECONDS: u64 = 30;
const MAX_TICK_SECONDS: u64 = 24 * 60 * 60;
/// Fired entries are kept this long past their notify instant so a wall clock
/// stepping backwards cannot fire them again.
const FIRED_RETENTION_DAYS: i64 = 2;

/// Delivery capability for reminders. Fire-and-forget: an error is logged by
/// the scheduler and the reminder still counts as fired.
pub trait Notifier {
    fn notify(&mut self, item_id: ItemId, title: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPermission {
    #[default]
    Default,
    Granted,
    Denied,
}

impl NotificationPermission {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

impl FromStr for NotificationPermission {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "granted" | "on" | "yes" | "true" | "1" => Ok(Self::Granted),
            "denied" | "off" | "no" | "false" | "0" => Ok(Self::Denied),
            "default" | "" => Ok(Self::Default),
            other => Err(anyhow!("unknown notification permission: {other}")),
        }
    }
}

impl fmt::Display for NotificationPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Default => "default",
            Self::Granted => "granted",
            Self::Denied => "denied",
        };
        f.write_str(label)
    }
}

/// A reminder whose notify instant falls inside the current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub item_id: ItemId,
    pub index: usize,
    pub title: String,
    pub body: String,
    pub notify_at: NaiveDateTime,
}

/// `(item id, reminder index)` pairs already notified this session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FiredReminderSet {
    fired: BTreeSet<(ItemId, usize)>,
}

impl FiredReminderSet {
    pub fn contains(&self, item_id: ItemId, index: usize) -> bool {
        self.fired.contains(&(item_id, index))
    }

    pub fn insert(&mut self, item_id: ItemId, index: usize) -> bool {
        self.fired.insert((item_id, index))
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }

    /// Forgets entries that can no longer fire: the item or the reminder
    /// index is gone, or the notify instant is older than `now - retention`.
    pub fn prune(&mut self, items: &[Item], now: NaiveDateTime, retention: Duration) -> usize {
        let cutoff = now.checked_sub_signed(retention).unwrap_or(NaiveDateTime::MIN);
        let before = self.fired.len();
        self.fired.retain(|&(item_id, index)| {
            items
                .iter()
                .find(|item| item.id == item_id)
                .and_then(|item| notify_instant(item, index))
                .is_some_and(|notify_at| notify_at > cutoff)
        });
        before - self.fired.len()
    }
}

pub fn notification_body(reminder: &Reminder) -> String {
    format!("Due in {} {}", reminder.val, reminder.unit)
}

/// `anchor - offset` for the reminder at `index`, or `None` when the item
/// has no timed due date, the index is gone, or the offset reaches past the
/// calendar.
fn notify_instant(item: &Item, index: usize) -> Option<NaiveDateTime> {
    let anchor = item.reminder_anchor()?;
    anchor.checked_sub_signed(item.reminders.get(index)?.offset())
}

/// Every reminder that is due now: `notify_at <= now` and
/// `notify_at > now - window`. Completed items and items without both a due
/// date and a due time never qualify.
pub fn due_reminders(items: &[Item], now: NaiveDateTime, window: Duration) -> Vec<DueReminder> {
    let window_start = now.checked_sub_signed(window).unwrap_or(NaiveDateTime::MIN);
    due_between(items, window_start, now)
}

/// Reminders with `after < notify_at <= now`.
pub fn due_between(items: &[Item], after: NaiveDateTime, now: NaiveDateTime) -> Vec<DueReminder> {
    let mut out = Vec::new();

    for item in items {
        if item.completed || item.reminders.is_empty() {
            continue;
        }
        if item.reminder_anchor().is_none() {
            continue;
        }

        for (index, reminder) in item.reminders.iter().enumerate() {
            let Some(notify_at) = notify_instant(item, index) else {
                warn!(item = item.id, index, %reminder, "reminder offset out of range; skipping");
                continue;
            };
            if notify_at <= now && notify_at > after {
                out.push(DueReminder {
                    item_id: item.id,
                    index,
                    title: item.title.clone(),
                    body: notification_body(reminder),
                    notify_at,
                });
            }
        }
    }

    out
}

/// Periodic evaluator. The fired set lives as long as the scheduler does,
/// which is one session.
///
/// The first tick looks back one window. Later ticks look back to the
/// previous tick's `now` when that is further, so late ticks leave no gap.
#[derive(Debug, Clone)]
pub struct ReminderScheduler {
    permission: NotificationPermission,
    window: Duration,
    fired: FiredReminderSet,
    last_tick: Option<NaiveDateTime>,
}

impl ReminderScheduler {
    pub fn new(permission: NotificationPermission, tick_seconds: u64) -> Self {
        let seconds = tick_seconds.clamp(1, MAX_TICK_SECONDS) as i64;
        Self {
            permission,
            window: Duration::seconds(seconds),
            fired: FiredReminderSet::default(),
            last_tick: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn permission(&self) -> NotificationPermission {
        self.permission
    }

    pub fn set_permission(&mut self, permission: NotificationPermission) {
        self.permission = permission;
    }

    pub fn fired(&self) -> &FiredReminderSet {
        &self.fired
    }

    /// One evaluation pass. Returns the reminders that were fired.
    #[instrument(skip(self, items, notifier), fields(items = items.len()))]
    pub fn tick(
        &mut self,
        items: &[Item],
        now: NaiveDateTime,
        notifier: &mut dyn Notifier,
    ) -> Vec<DueReminder> {
        if !self.permission.is_granted() {
            debug!(permission = %self.permission, "notifications not granted; skipping tick");
            return Vec::new();
        }

        let mut after = now.checked_sub_signed(self.window).unwrap_or(NaiveDateTime::MIN);
        if let Some(last) = self.last_tick.filter(|last| *last < after) {
            debug!(%last, "tick ran late; widening window back to previous tick");
            after = last;
        }
        self.last_tick = Some(now);

        let mut fired = Vec::new();
        for due in due_between(items, after, now) {
            if !self.fired.insert(due.item_id, due.index) {
                continue;
            }
            info!(item = due.item_id, index = due.index, title = %due.title, "firing reminder");
            if let Err(err) = notifier.notify(due.item_id, &due.title, &due.body) {
                warn!(error = %err, item = due.item_id, "notifier failed");
            }
            fired.push(due);
        }

        let retention = Duration::days(FIRED_RETENTION_DAYS).max(self.window);
        let pruned = self.fired.prune(items, now, retention);
        if pruned > 0 {
            debug!(pruned, remaining = self.fired.len(), "pruned fired reminders");
        }
        fired
    }
}
