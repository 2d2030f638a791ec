use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ids::new_category_id;
use crate::reorder::intersect_in_order;

/// Shown for items whose category id no longer resolves.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Ordered category list. Operations on an unknown id do nothing and report
/// that through their return value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStore {
    categories: Vec<Category>,
}

impl CategoryStore {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// The three categories a fresh install starts with.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Category::new("goal", "Goals"),
            Category::new("project", "Projects"),
            Category::new("task", "Tasks"),
        ])
    }

    pub fn as_slice(&self) -> &[Category] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn name_of(&self, id: &str) -> &str {
        self.get(id).map(|c| c.name.as_str()).unwrap_or(UNKNOWN_CATEGORY)
    }

    /// Case-insensitive exact name match; the first match wins.
    pub fn find_by_name(&self, name: &str) -> Option<&Category> {
        let wanted = name.trim().to_lowercase();
        self.categories.iter().find(|c| c.name.to_lowercase() == wanted)
    }

    /// Accepts either an id or a name.
    pub fn resolve(&self, id_or_name: &str) -> Option<&Category> {
        self.get(id_or_name).or_else(|| self.find_by_name(id_or_name))
    }

    pub fn add(&mut self, name: &str) -> String {
        let id = new_category_id();
        debug!(id = %id, name, "adding category");
        self.categories.push(Category::new(id.clone(), name.trim()));
        id
    }

    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        match self.categories.iter_mut().find(|c| c.id == id) {
            Some(category) => {
                category.name = name.trim().to_string();
                true
            }
            None => false,
        }
    }

    /// Removes the category only. Cascading to items and filters is the
    /// caller's job since this store does not own them.
    pub fn remove(&mut self, id: &str) -> Option<Category> {
        let idx = self.categories.iter().position(|c| c.id == id)?;
        Some(self.categories.remove(idx))
    }

    /// Replaces the order with `order`. Categories not listed are dropped and
    /// unknown ids are ignored.
    pub fn reorder(&mut self, order: &[String]) {
        let current = std::mem::take(&mut self.categories);
        self.categories = intersect_in_order(current, order, |c| c.id.clone());
    }

    pub fn into_vec(self) -> Vec<Category> {
        self.categories
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, CategoryStore, UNKNOWN_CATEGORY};

    #[test]
    fn defaults_and_lookup() {
        let store = CategoryStore::with_defaults();
        assert_eq!(store.ids(), vec!["goal", "project", "task"]);
        assert_eq!(store.name_of("project"), "Projects");
        assert_eq!(store.name_of("cat_missing"), UNKNOWN_CATEGORY);
        assert_eq!(store.find_by_name(" tasks ").map(|c| c.id.as_str()), Some("task"));
        assert_eq!(store.resolve("Goals").map(|c| c.id.as_str()), Some("goal"));
    }

    #[test]
    fn add_appends_with_fresh_id_and_allows_duplicate_names() {
        let mut store = CategoryStore::with_defaults();
        let a = store.add(" Errands ");
        let b = store.add("Errands");
        assert_ne!(a, b);
        assert_eq!(store.len(), 5);
        assert_eq!(store.as_slice()[3], Category::new(a, "Errands"));
    }

    #[test]
    fn rename_unknown_is_a_no_op() {
        let mut store = CategoryStore::with_defaults();
        let before = store.clone();
        assert!(!store.rename("nope", "x"));
        assert_eq!(store, before);
        assert!(store.rename("goal", "Ambitions"));
        assert_eq!(store.name_of("goal"), "Ambitions");
    }

    #[test]
    fn reorder_is_the_intersection_in_given_order() {
        let mut store = CategoryStore::with_defaults();
        store.reorder(&["task".to_string(), "ghost".to_string(), "goal".to_string()]);
        assert_eq!(store.ids(), vec!["task", "goal"]);

        let current = store.ids();
        store.reorder(&current);
        assert_eq!(store.ids(), current);
    }
}
