use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::category::{
  Category,
  CategoryStore
};
use crate::item::Item;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default
)]
pub enum SortMode {
  #[default]
  Manual,
  Date
}

impl FromStr for SortMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "manual" => Ok(Self::Manual),
      | "date" | "due" => {
        Ok(Self::Date)
      }
      | other => {
        Err(anyhow!(
          "unknown sort mode: {other} \
           (expected manual or date)"
        ))
      }
    }
  }
}

impl fmt::Display for SortMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Self::Manual => {
        f.write_str("manual")
      }
      | Self::Date => f.write_str("date")
    }
  }
}

/// Transient view state; never persisted.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct FilterState {
  pub selected:       BTreeSet<String>,
  pub show_completed: bool,
  pub sort_mode:      SortMode,
  search_query:       String
}

impl FilterState {
  pub fn search_query(&self) -> &str {
    &self.search_query
  }

  /// Stores the query lowercased and trimmed.
  pub fn set_search(
    &mut self,
    query: &str
  ) {
    self.search_query =
      query.trim().to_lowercase();
  }

  pub fn select(
    &mut self,
    id: &str
  ) {
    self
      .selected
      .insert(id.to_string());
  }

  pub fn deselect(
    &mut self,
    id: &str
  ) -> bool {
    self.selected.remove(id)
  }

  /// Clicking a category: if it is the only one selected it is deselected,
  /// otherwise it becomes the only selection.
  pub fn toggle_category(
    &mut self,
    id: &str
  ) {
    let only_this = self.selected.len()
      == 1
      && self.selected.contains(id);
    if only_this {
      self.selected.remove(id);
    } else {
      self.selected.clear();
      self
        .selected
        .insert(id.to_string());
    }
  }

  /// Comma-separated category names, matched case-insensitively; unknown
  /// names are ignored. Returns the ids that were added.
  pub fn select_by_names(
    &mut self,
    input: &str,
    categories: &CategoryStore
  ) -> Vec<String> {
    let mut added = Vec::new();
    for term in input
      .split(',')
      .map(|t| t.trim().to_lowercase())
      .filter(|t| !t.is_empty())
    {
      if let Some(category) =
        categories.find_by_name(&term)
      {
        self.select(&category.id);
        added.push(category.id.clone());
      }
    }
    added
  }

  pub fn toggle_completed(&mut self) {
    self.show_completed =
      !self.show_completed;
  }

  pub fn reset(&mut self) {
    self.selected.clear();
    self.show_completed = false;
  }

  /// Manual drag-reorder only makes sense over the unsorted, unsearched list.
  pub fn reorder_enabled(&self) -> bool {
    self.sort_mode == SortMode::Manual
      && self.search_query.is_empty()
  }

  pub fn matches(
    &self,
    item: &Item
  ) -> bool {
    if item.completed
      != self.show_completed
    {
      return false;
    }
    if !self.selected.is_empty()
      && !self
        .selected
        .contains(&item.category)
    {
      return false;
    }
    if !self.search_query.is_empty()
      && !item
        .matches_query(&self.search_query)
    {
      return false;
    }
    true
  }
}

/// Filters and orders `items` for display without touching their stored
/// order.
#[tracing::instrument(skip(
  items, filter
))]
pub fn view<'a>(
  items: &'a [Item],
  filter: &FilterState
) -> Vec<&'a Item> {
  let mut out: Vec<&Item> = items
    .iter()
    .filter(|item| filter.matches(item))
    .collect();

  if filter.sort_mode == SortMode::Date {
    // stable: equal dates keep manual order, undated items trail
    out.sort_by_key(|item| {
      (
        item.due_date.is_none(),
        item.due_date
      )
    });
  }

  trace!(
    total = items.len(),
    shown = out.len(),
    "computed view"
  );
  out
}

/// Category suggestions for the tag input: unselected categories whose name
/// contains `text`.
pub fn suggestions<'a>(
  categories: &'a CategoryStore,
  filter: &FilterState,
  text: &str
) -> Vec<&'a Category> {
  let term = text.trim().to_lowercase();
  categories
    .as_slice()
    .iter()
    .filter(|c| {
      !filter.selected.contains(&c.id)
    })
    .filter(|c| {
      c.name
        .to_lowercase()
        .contains(&term)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    FilterState,
    SortMode,
    suggestions,
    view
  };
  use crate::category::CategoryStore;
  use crate::item::{
    Item,
    ItemDraft
  };

  fn item(
    id: i64,
    title: &str,
    category: &str,
    due: Option<(i32, u32, u32)>
  ) -> Item {
    let mut draft =
      ItemDraft::new(title, category);
    draft.due_date =
      due.and_then(|(y, m, d)| {
        NaiveDate::from_ymd_opt(y, m, d)
      });
    Item::from_draft(id, draft, id)
  }

  fn ids(items: &[&Item]) -> Vec<i64> {
    items
      .iter()
      .map(|item| item.id)
      .collect()
  }

  fn sample() -> Vec<Item> {
    let mut done =
      item(4, "Filed taxes", "task", None);
    done.completed = true;
    vec![
      item(
        1,
        "Grocery Shopping",
        "task",
        Some((2024, 2, 1))
      ),
      item(2, "Gardening", "goal", None),
      item(
        3,
        "Plan trip",
        "project",
        Some((2024, 1, 5))
      ),
      done,
      item(
        5,
        "Read",
        "goal",
        Some((2024, 1, 5))
      ),
    ]
  }

  #[test]
  fn completion_partitions_the_view() {
    let items = sample();
    let mut filter =
      FilterState::default();
    assert_eq!(
      ids(&view(&items, &filter)),
      vec![1, 2, 3, 5]
    );
    filter.toggle_completed();
    assert_eq!(
      ids(&view(&items, &filter)),
      vec![4]
    );
  }

  #[test]
  fn category_selection_is_an_or() {
    let items = sample();
    let mut filter =
      FilterState::default();
    filter.select("goal");
    filter.select("project");
    assert_eq!(
      ids(&view(&items, &filter)),
      vec![2, 3, 5]
    );
  }

  #[test]
  fn search_is_case_insensitive_substring() {
    let mut items = sample();
    items[2].description =
      Some("buy SHOPping bags".into());
    let mut filter =
      FilterState::default();
    filter.set_search("  shop ");
    assert_eq!(filter.search_query(), "shop");
    assert_eq!(
      ids(&view(&items, &filter)),
      vec![1, 3]
    );
    assert!(!filter.reorder_enabled());
  }

  #[test]
  fn date_sort_is_stable_with_undated_last() {
    let items = sample();
    let filter = FilterState {
      sort_mode: SortMode::Date,
      ..FilterState::default()
    };
    assert_eq!(
      ids(&view(&items, &filter)),
      vec![3, 5, 1, 2]
    );
    assert_eq!(
      items
        .iter()
        .map(|i| i.id)
        .collect::<Vec<_>>(),
      vec![1, 2, 3, 4, 5]
    );
  }

  #[test]
  fn toggle_category_and_names() {
    let categories =
      CategoryStore::with_defaults();
    let mut filter =
      FilterState::default();
    filter.toggle_category("goal");
    filter.toggle_category("task");
    assert_eq!(
      filter
        .selected
        .iter()
        .collect::<Vec<_>>(),
      vec!["task"]
    );
    filter.toggle_category("task");
    assert!(filter.selected.is_empty());

    let added = filter.select_by_names(
      "goals, nonsense ,TASKS",
      &categories
    );
    assert_eq!(added, vec!["goal", "task"]);
    let names: Vec<_> =
      suggestions(&categories, &filter, "")
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, vec!["Projects"]);

    filter.show_completed = true;
    filter.reset();
    assert_eq!(
      filter,
      FilterState::default()
    );
  }

  #[test]
  fn parses_sort_mode() {
    assert_eq!(
      "Date"
        .parse::<SortMode>()
        .expect("date"),
      SortMode::Date
    );
    assert!(
      "alpha"
        .parse::<SortMode>()
        .is_err()
    );
  }
}
