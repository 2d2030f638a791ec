use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::category::{Category, CategoryStore};
use crate::datastore::{
    CATEGORIES_KEY, ITEMS_KEY, LAST_DELETED_KEY, SHOW_COUNTS_KEY, Storage, TAG_SETTINGS_KEY,
    THEME_KEY, load_typed, save_typed,
};
use crate::datetime::Clock;
use crate::filter::{FilterState, view};
use crate::item::{Item, ItemDraft, ItemId, Reminder, SubtaskDraft};
use crate::reorder::drop_in_column;
use crate::status::{Status, StatusThresholds, status};
use crate::store::{DeletedItem, ItemStore};
use crate::transfer::ExportDocument;

/// User settings persisted next to the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub thresholds: StatusThresholds,
    pub show_counts: bool,
    /// Stored and reported only.
    pub theme: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thresholds: StatusThresholds::default(),
            show_counts: true,
            theme: None,
        }
    }
}

/// Owns all application state and writes every mutation through to storage.
///
/// Persistence is fire-and-forget: a failed write is logged as a warning and
/// the in-memory change stands.
#[derive(Debug)]
pub struct App<S: Storage> {
    storage: S,
    clock: Clock,
    categories: CategoryStore,
    items: ItemStore,
    filter: FilterState,
    settings: Settings,
    last_deleted: Option<DeletedItem>,
}

impl<S: Storage> App<S> {
    /// Reads everything from `storage`. A first start seeds the default
    /// categories; malformed stored data is an error.
    #[instrument(skip(storage, clock))]
    pub fn load(storage: S, clock: Clock) -> anyhow::Result<Self> {
        let (categories, seeded) = match load_typed::<Vec<Category>>(&storage, CATEGORIES_KEY)? {
            Some(list) => (CategoryStore::new(list), false),
            None => (CategoryStore::with_defaults(), true),
        };
        let items = load_typed::<Vec<Item>>(&storage, ITEMS_KEY)?.unwrap_or_default();

        let settings = Settings {
            thresholds: load_typed::<StatusThresholds>(&storage, TAG_SETTINGS_KEY)?
                .unwrap_or_default()
                .sanitized(),
            show_counts: load_typed(&storage, SHOW_COUNTS_KEY)?.unwrap_or(true),
            theme: load_typed(&storage, THEME_KEY)?,
        };
        let last_deleted = load_typed(&storage, LAST_DELETED_KEY)?;

        info!(
            items = items.len(),
            categories = categories.len(),
            "loaded application state"
        );

        let mut app = Self {
            storage,
            clock,
            categories,
            items: ItemStore::new(items),
            filter: FilterState::default(),
            settings,
            last_deleted,
        };
        if seeded {
            debug!("seeding default categories");
            app.persist_categories();
        }
        Ok(app)
    }

    /// Re-reads the item list, keeping everything else. Used by long-running
    /// loops so each pass works on a fresh snapshot.
    pub fn refresh_items(&mut self) -> anyhow::Result<()> {
        let items = load_typed::<Vec<Item>>(&self.storage, ITEMS_KEY)?.unwrap_or_default();
        self.items = ItemStore::new(items);
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn categories(&self) -> &CategoryStore {
        &self.categories
    }

    pub fn items(&self) -> &[Item] {
        self.items.as_slice()
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut FilterState {
        &mut self.filter
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn last_deleted(&self) -> Option<&DeletedItem> {
        self.last_deleted.as_ref()
    }

    pub fn category_name(&self, id: &str) -> &str {
        self.categories.name_of(id)
    }

    pub fn active_count(&self, category: &str) -> usize {
        self.items.active_count(category)
    }

    /// Allocates an id for a subtask being staged.
    pub fn next_id(&mut self) -> i64 {
        let now = self.clock.now_millis();
        self.items.next_id(now)
    }

    // categories

    /// Returns the new id, or `None` when the trimmed name is empty.
    #[instrument(skip(self))]
    pub fn add_category(&mut self, name: &str) -> Option<String> {
        if name.trim().is_empty() {
            return None;
        }
        let id = self.categories.add(name);
        self.persist_categories();
        Some(id)
    }

    #[instrument(skip(self))]
    pub fn rename_category(&mut self, id: &str, name: &str) -> bool {
        if name.trim().is_empty() || !self.categories.rename(id, name) {
            return false;
        }
        self.persist_categories();
        true
    }

    /// Deletes a category with every item filed under it and drops it from
    /// the selection. Returns the number of items removed, or `None` when the
    /// id is unknown.
    #[instrument(skip(self))]
    pub fn delete_category(&mut self, id: &str) -> Option<usize> {
        self.categories.remove(id)?;
        let removed = self.items.remove_category(id);
        self.filter.deselect(id);
        info!(category = id, removed, "deleted category");
        self.persist_categories();
        self.persist_items();
        Some(removed)
    }

    pub fn reorder_categories(&mut self, order: &[String]) {
        self.categories.reorder(order);
        self.persist_categories();
    }

    /// Drops one category before `before` (or last) in the sidebar order.
    /// False when either category is unknown.
    pub fn move_category(&mut self, id: &str, before: Option<&str>) -> bool {
        let ids = self.categories.ids();
        let target = before.map(str::to_string);
        let Some(order) = drop_in_column(&ids, &id.to_string(), target.as_ref()) else {
            return false;
        };
        self.reorder_categories(&order);
        true
    }

    // items

    /// Creates an item at the end of the manual order. A draft without
    /// reminders gets the default one.
    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub fn create_item(&mut self, mut draft: ItemDraft) -> anyhow::Result<ItemId> {
        validate_draft(&draft)?;
        if draft.reminders.is_empty() {
            draft.reminders.push(Reminder::default());
        }
        if !self.categories.contains(&draft.category) {
            warn!(category = %draft.category, "item filed under unknown category");
        }
        let now = self.clock.now_millis();
        let id = self.items.create(draft, now).id;
        self.persist_items();
        Ok(id)
    }

    /// Returns `Ok(false)` when no item has this id.
    #[instrument(skip(self, draft))]
    pub fn update_item(&mut self, id: ItemId, draft: ItemDraft) -> anyhow::Result<bool> {
        validate_draft(&draft)?;
        if !self.items.update(id, draft) {
            return Ok(false);
        }
        self.persist_items();
        Ok(true)
    }

    /// Deletes an item and keeps it in the single undo slot, replacing
    /// whatever was there.
    #[instrument(skip(self))]
    pub fn delete_item(&mut self, id: ItemId) -> Option<&DeletedItem> {
        let deleted = self.items.delete(id)?;
        self.last_deleted = Some(deleted);
        self.persist_items();
        self.persist_last_deleted();
        self.last_deleted.as_ref()
    }

    /// Restores the last deletion. The slot is consumed either way; returns
    /// the restored id when the item went back in.
    #[instrument(skip(self))]
    pub fn undo_delete(&mut self) -> Option<ItemId> {
        let deleted = self.last_deleted.take()?;
        let id = deleted.item.id;
        let restored = self.items.restore(deleted);
        self.persist_last_deleted();
        if !restored {
            return None;
        }
        self.persist_items();
        Some(id)
    }

    pub fn toggle_item(&mut self, id: ItemId) -> Option<bool> {
        let completed = self.items.toggle_completed(id)?;
        self.persist_items();
        Some(completed)
    }

    pub fn toggle_subtask(&mut self, item_id: ItemId, subtask_id: i64) -> Option<bool> {
        let completed = self.items.toggle_subtask(item_id, subtask_id)?;
        self.persist_items();
        Some(completed)
    }

    /// Stages the item's subtasks, lets `edit` change them, then commits the
    /// staging list back. Returns whatever `edit` returned, or `None` for an
    /// unknown item.
    pub fn edit_subtasks<R>(
        &mut self,
        item_id: ItemId,
        edit: impl FnOnce(&mut SubtaskDraft, &mut dyn FnMut() -> i64) -> R,
    ) -> Option<R> {
        let item = self.items.get(item_id)?;
        let mut staging = SubtaskDraft::from_item(item);
        let mut draft = item.to_draft();

        let clock = self.clock;
        let items = &mut self.items;
        let mut next_id = || items.next_id(clock.now_millis());
        let out = edit(&mut staging, &mut next_id);

        draft.subtasks = staging.into_vec();
        self.items.update(item_id, draft);
        self.persist_items();
        Some(out)
    }

    /// Reorders the given items among their current positions.
    pub fn reorder_items(&mut self, order: &[ItemId]) -> anyhow::Result<()> {
        self.ensure_reorder_enabled()?;
        self.items.reorder(order);
        self.persist_items();
        Ok(())
    }

    /// Drops `id` before `target` (or at the end) of the current view, as a
    /// drag in a single column would.
    #[instrument(skip(self))]
    pub fn move_item(&mut self, id: ItemId, target: Option<ItemId>) -> anyhow::Result<bool> {
        self.ensure_reorder_enabled()?;

        let shown: Vec<ItemId> = self.view().iter().map(|item| item.id).collect();
        if !shown.contains(&id) {
            return Ok(false);
        }
        if let Some(target) = target
            && !shown.contains(&target)
        {
            return Err(anyhow!("item {target} is not in the current view"));
        }

        let order = drop_in_column(&shown, &id, target.as_ref())
            .ok_or_else(|| anyhow!("item {id} is not in the current view"))?;
        debug!(?order, "resolved move");
        self.items.reorder(&order);
        self.persist_items();
        Ok(true)
    }

    fn ensure_reorder_enabled(&self) -> anyhow::Result<()> {
        if self.filter.reorder_enabled() {
            Ok(())
        } else {
            Err(anyhow!(
                "manual reordering needs manual sort and an empty search"
            ))
        }
    }

    // derived views

    pub fn view(&self) -> Vec<&Item> {
        view(self.items.as_slice(), &self.filter)
    }

    pub fn status_of(&self, item: &Item, now: NaiveDateTime) -> Status {
        status(item, now, &self.settings.thresholds)
    }

    // settings

    pub fn set_thresholds(&mut self, thresholds: StatusThresholds) {
        self.settings.thresholds = thresholds.sanitized();
        persist(
            &mut self.storage,
            TAG_SETTINGS_KEY,
            &self.settings.thresholds,
        );
    }

    pub fn set_show_counts(&mut self, show: bool) {
        self.settings.show_counts = show;
        persist(&mut self.storage, SHOW_COUNTS_KEY, &show);
    }

    pub fn set_theme(&mut self, theme: &str) {
        let theme = theme.trim().to_string();
        persist(&mut self.storage, THEME_KEY, &theme);
        self.settings.theme = Some(theme);
    }

    // import / export

    pub fn export(&self) -> ExportDocument {
        ExportDocument::new(
            self.items.as_slice().to_vec(),
            self.categories.as_slice().to_vec(),
        )
    }

    /// Replaces all items and categories with the document's.
    #[instrument(skip(self, doc), fields(items = doc.items.len(), categories = doc.categories.len()))]
    pub fn import(&mut self, doc: ExportDocument) {
        self.categories = CategoryStore::new(doc.categories);
        self.items = ItemStore::new(doc.items);
        let known = &self.categories;
        self.filter.selected.retain(|id| known.contains(id));
        self.last_deleted = None;

        self.persist_categories();
        self.persist_items();
        self.persist_last_deleted();
    }

    fn persist_items(&mut self) {
        persist(&mut self.storage, ITEMS_KEY, self.items.as_slice());
    }

    fn persist_categories(&mut self) {
        persist(&mut self.storage, CATEGORIES_KEY, self.categories.as_slice());
    }

    fn persist_last_deleted(&mut self) {
        match &self.last_deleted {
            Some(deleted) => persist(&mut self.storage, LAST_DELETED_KEY, deleted),
            None => {
                if let Err(err) = self.storage.remove(LAST_DELETED_KEY) {
                    warn!(key = LAST_DELETED_KEY, error = %err, "failed to clear undo slot");
                }
            }
        }
    }
}

fn persist<S: Storage, T: Serialize + ?Sized>(storage: &mut S, key: &str, value: &T) {
    if let Err(err) = save_typed(storage, key, value) {
        warn!(key, error = %format!("{err:#}"), "failed to persist");
    }
}

fn validate_draft(draft: &ItemDraft) -> anyhow::Result<()> {
    if draft.title.trim().is_empty() {
        return Err(anyhow!("title must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use serde_json::Value;

    use super::App;
    use crate::datastore::{ITEMS_KEY, MemoryStore, Storage};
    use crate::datetime::Clock;
    use crate::filter::SortMode;
    use crate::item::ItemDraft;

    fn app() -> App<MemoryStore> {
        App::load(MemoryStore::new(), Clock::default()).expect("load app")
    }

    #[test]
    fn first_start_seeds_and_persists_defaults() {
        let app = app();
        assert_eq!(app.categories().ids(), vec!["goal", "project", "task"]);
        assert!(app.storage().load("taskManagerCategories").expect("load").is_some());
        assert!(app.settings().show_counts);
    }

    #[test]
    fn new_items_get_a_default_reminder() {
        let mut app = app();
        let id = app.create_item(ItemDraft::new("Call", "task")).expect("create");
        let item = app.item(id).expect("item");
        assert_eq!(item.reminders.len(), 1);
        assert_eq!(item.reminders[0].to_string(), "30 minutes");
        assert!(app.create_item(ItemDraft::new("   ", "task")).is_err());
    }

    #[test]
    fn subtask_edits_commit_to_the_item() {
        let mut app = app();
        let id = app.create_item(ItemDraft::new("Trip", "project")).expect("create");
        let added = app
            .edit_subtasks(id, |staging, next_id| {
                staging.add(next_id(), "book hotel") && staging.add(next_id(), "pack")
            })
            .expect("known item");
        assert!(added);

        let item = app.item(id).expect("item");
        assert_eq!(item.subtask_progress(), (0, 2));
        assert_ne!(item.subtasks[0].id, item.subtasks[1].id);
        assert!(app.edit_subtasks(404, |_, _| ()).is_none());
    }

    #[test]
    fn reorder_refused_while_sorted_by_date() {
        let mut app = app();
        let a = app.create_item(ItemDraft::new("a", "task")).expect("a");
        let b = app.create_item(ItemDraft::new("b", "task")).expect("b");
        app.filter_mut().sort_mode = SortMode::Date;
        assert!(app.reorder_items(&[b, a]).is_err());
        assert!(app.move_item(b, Some(a)).is_err());

        app.filter_mut().sort_mode = SortMode::Manual;
        assert!(app.move_item(b, Some(a)).expect("move"));
        let ids: Vec<_> = app.items().iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn categories_move_like_a_dragged_column() {
        let mut app = app();
        assert!(app.move_category("task", Some("goal")));
        assert_eq!(app.categories().ids(), vec!["task", "goal", "project"]);
        assert!(app.move_category("task", None));
        assert_eq!(app.categories().ids(), vec!["goal", "project", "task"]);
        assert!(!app.move_category("task", Some("missing")));
        assert!(!app.move_category("missing", None));
        assert_eq!(app.categories().ids(), vec!["goal", "project", "task"]);
    }

    struct FailingStore;

    impl Storage for FailingStore {
        fn load(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }

        fn save(&mut self, key: &str, _value: &Value) -> anyhow::Result<()> {
            Err(anyhow!("quota exceeded writing {key}"))
        }

        fn remove(&mut self, _key: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_do_not_undo_the_change() {
        let mut app = App::load(FailingStore, Clock::default()).expect("load");
        let id = app.create_item(ItemDraft::new("kept", "task")).expect("create");
        assert!(app.item(id).is_some());
        assert!(app.storage().load(ITEMS_KEY).expect("load").is_none());
    }
}
