use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::ids::IdGenerator;
use crate::item::{Item, ItemDraft, ItemId};
use crate::reorder::reorder_in_slots;

/// What `delete` hands back so the deletion can be undone once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletedItem {
    pub item: Item,
    pub index: usize,
}

/// Items in manual order.
///
/// A missing id is never an error here: mutators return `false`/`None` and
/// leave the store untouched.
#[derive(Debug, Clone, Default)]
pub struct ItemStore {
    items: Vec<Item>,
    ids: IdGenerator,
}

impl ItemStore {
    pub fn new(items: Vec<Item>) -> Self {
        let mut ids = IdGenerator::new();
        for item in &items {
            ids.observe(item.id);
            for subtask in &item.subtasks {
                ids.observe(subtask.id);
            }
        }
        Self { items, ids }
    }

    pub fn as_slice(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Allocates an id for a new item or subtask.
    pub fn next_id(&mut self, now_millis: i64) -> i64 {
        self.ids.next(now_millis)
    }

    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub fn create(&mut self, draft: ItemDraft, now_millis: i64) -> &Item {
        let id = self.ids.next(now_millis);
        let item = Item::from_draft(id, draft, now_millis);
        debug!(id, category = %item.category, "created item");
        self.items.push(item);
        &self.items[self.items.len() - 1]
    }

    #[instrument(skip(self, draft))]
    pub fn update(&mut self, id: ItemId, draft: ItemDraft) -> bool {
        for subtask in &draft.subtasks {
            self.ids.observe(subtask.id);
        }
        match self.get_mut(id) {
            Some(item) => {
                item.apply_draft(draft);
                true
            }
            None => {
                debug!(id, "update on unknown item ignored");
                false
            }
        }
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: ItemId) -> Option<DeletedItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        let item = self.items.remove(index);
        Some(DeletedItem { item, index })
    }

    /// Puts a deleted item back where it was. The index is clamped to the
    /// current length; an item whose id is already present is not duplicated.
    #[instrument(skip(self, deleted), fields(id = deleted.item.id, index = deleted.index))]
    pub fn restore(&mut self, deleted: DeletedItem) -> bool {
        if self.get(deleted.item.id).is_some() {
            debug!("restore skipped, id already present");
            return false;
        }
        let index = deleted.index.min(self.items.len());
        self.ids.observe(deleted.item.id);
        self.items.insert(index, deleted.item);
        true
    }

    /// Returns the new completion state. The item keeps its manual position.
    pub fn toggle_completed(&mut self, id: ItemId) -> Option<bool> {
        let item = self.get_mut(id)?;
        item.completed = !item.completed;
        Some(item.completed)
    }

    pub fn toggle_subtask(&mut self, item_id: ItemId, subtask_id: i64) -> Option<bool> {
        let subtask = self
            .get_mut(item_id)?
            .subtasks
            .iter_mut()
            .find(|s| s.id == subtask_id)?;
        subtask.completed = !subtask.completed;
        Some(subtask.completed)
    }

    /// Reorders the listed items among their current positions. Items not in
    /// `order` keep their positions and relative order; unknown ids are
    /// ignored.
    #[instrument(skip(self, order), fields(count = order.len()))]
    pub fn reorder(&mut self, order: &[ItemId]) {
        reorder_in_slots(&mut self.items, order, |item| item.id);
    }

    /// Drops every item of `category`, returning how many went.
    pub fn remove_category(&mut self, category: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.category != category);
        before - self.items.len()
    }

    /// Incomplete items in `category`.
    pub fn active_count(&self, category: &str) -> usize {
        self.items
            .iter()
            .filter(|item| item.category == category && !item.completed)
            .count()
    }

    pub fn into_vec(self) -> Vec<Item> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::ItemStore;
    use crate::item::{ItemDraft, Subtask};

    fn store_with(titles: &[&str]) -> ItemStore {
        let mut store = ItemStore::default();
        for (n, title) in titles.iter().enumerate() {
            store.create(ItemDraft::new(*title, "task"), 1_000 + n as i64);
        }
        store
    }

    #[test]
    fn create_appends_with_unique_ids() {
        let mut store = ItemStore::default();
        let a = store.create(ItemDraft::new("a", "task"), 5).id;
        let b = store.create(ItemDraft::new("b", "task"), 5).id;
        assert_ne!(a, b);
        assert_eq!(store.ids(), vec![a, b]);
        assert!(!store.as_slice()[0].completed);
        assert_eq!(store.as_slice()[1].created_at, 5);
    }

    #[test]
    fn update_preserves_completion_and_creation_time() {
        let mut store = store_with(&["a"]);
        let id = store.ids()[0];
        store.toggle_completed(id);
        assert!(store.update(id, ItemDraft::new("a2", "goal")));
        let item = store.get(id).expect("item");
        assert!(item.completed);
        assert_eq!(item.created_at, 1_000);
        assert_eq!(item.category, "goal");
        assert!(!store.update(42, ItemDraft::new("x", "goal")));
    }

    #[test]
    fn delete_then_restore_is_identity() {
        let mut store = store_with(&["a", "b", "c"]);
        let before = store.as_slice().to_vec();
        let deleted = store.delete(before[1].id).expect("deleted");
        assert_eq!(deleted.index, 1);
        assert_eq!(store.len(), 2);
        assert!(store.restore(deleted.clone()));
        assert_eq!(store.as_slice(), before.as_slice());
        assert!(!store.restore(deleted));
        assert!(store.delete(999).is_none());
    }

    #[test]
    fn toggles_do_not_move_items() {
        let mut store = store_with(&["a", "b"]);
        let ids = store.ids();
        assert_eq!(store.toggle_completed(ids[0]), Some(true));
        assert_eq!(store.ids(), ids);
        assert_eq!(store.toggle_completed(12345), None);

        let mut draft = store.get(ids[1]).expect("item").to_draft();
        draft.subtasks.push(Subtask {
            id: 77,
            text: "step".to_string(),
            completed: false,
        });
        store.update(ids[1], draft);
        assert_eq!(store.toggle_subtask(ids[1], 77), Some(true));
        assert_eq!(store.toggle_subtask(ids[1], 78), None);
        assert_eq!(store.toggle_subtask(1, 77), None);
    }

    #[test]
    fn reorder_is_idempotent_and_stable_for_hidden_items() {
        let mut store = store_with(&["a", "b", "c", "d"]);
        let ids = store.ids();
        store.reorder(&ids);
        assert_eq!(store.ids(), ids);

        store.reorder(&[ids[3], ids[1]]);
        assert_eq!(store.ids(), vec![ids[0], ids[3], ids[2], ids[1]]);
    }

    #[test]
    fn category_cascade_and_counts() {
        let mut store = store_with(&["a", "b"]);
        store.create(ItemDraft::new("g", "goal"), 3_000);
        assert_eq!(store.active_count("task"), 2);
        assert_eq!(store.remove_category("task"), 2);
        assert_eq!(store.len(), 1);
    }
}
