//! Drag-and-drop position resolution and order application.
//!
//! The presentation layer measures its elements and hands over one
//! [`Sibling`] per rendered element (its id and the center of its box). The
//! resolver never sees widgets, only geometry, so the same code orders
//! items, categories and subtasks.

use std::collections::HashSet;
use std::hash::Hash;

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sibling<K> {
    pub id: K,
    pub center: Point,
}

impl<K> Sibling<K> {
    pub fn new(id: K, center: Point) -> Self {
        Self { id, center }
    }
}

/// Where the dragged element lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion<K> {
    Before(K),
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Single column: categories, subtasks.
    #[default]
    List,
    /// Wrapping cards: items.
    Grid,
}

pub fn resolve<K: PartialEq + Clone>(
    layout: Layout,
    siblings: &[Sibling<K>],
    dragged: &K,
    pointer: Point,
) -> Insertion<K> {
    match layout {
        Layout::List => resolve_list(siblings, dragged, pointer.y),
        Layout::Grid => resolve_grid(siblings, dragged, pointer),
    }
}

/// Insert before the nearest sibling whose vertical midpoint is below the
/// pointer; append when the pointer is below every midpoint.
pub fn resolve_list<K: PartialEq + Clone>(
    siblings: &[Sibling<K>],
    dragged: &K,
    pointer_y: f64,
) -> Insertion<K> {
    let mut best: Option<(f64, &K)> = None;
    for sibling in siblings.iter().filter(|s| &s.id != dragged) {
        let offset = pointer_y - sibling.center.y;
        if offset >= 0.0 || offset.is_nan() {
            continue;
        }
        match best {
            Some((closest, _)) if offset <= closest => {}
            _ => best = Some((offset, &sibling.id)),
        }
    }

    trace!(found = best.is_some(), "resolved list insertion");
    match best {
        Some((_, id)) => Insertion::Before(id.clone()),
        None => Insertion::Append,
    }
}

/// Insert before the sibling whose center is closest to the pointer.
pub fn resolve_grid<K: PartialEq + Clone>(
    siblings: &[Sibling<K>],
    dragged: &K,
    pointer: Point,
) -> Insertion<K> {
    let mut best: Option<(f64, &K)> = None;
    for sibling in siblings.iter().filter(|s| &s.id != dragged) {
        let distance = pointer.distance(&sibling.center);
        if distance.is_nan() {
            continue;
        }
        match best {
            Some((closest, _)) if distance >= closest => {}
            _ => best = Some((distance, &sibling.id)),
        }
    }

    trace!(found = best.is_some(), "resolved grid insertion");
    match best {
        Some((_, id)) => Insertion::Before(id.clone()),
        None => Insertion::Append,
    }
}

/// Moves `dragged` within `order` according to `insertion` and returns the
/// new order. A missing target appends; a missing `dragged` leaves the order
/// as it was.
pub fn apply_insertion<K: PartialEq + Clone>(
    order: &[K],
    dragged: &K,
    insertion: &Insertion<K>,
) -> Vec<K> {
    if !order.contains(dragged) {
        return order.to_vec();
    }

    let mut out: Vec<K> = order.iter().filter(|id| *id != dragged).cloned().collect();
    let at = match insertion {
        Insertion::Before(target) => out.iter().position(|id| id == target),
        Insertion::Append => None,
    };
    match at {
        Some(idx) => out.insert(idx, dragged.clone()),
        None => out.push(dragged.clone()),
    }
    out
}

/// Drops `dragged` in a single column laid out from `order`, with the
/// pointer at the top edge of `target` (or below the last row), and returns
/// the resulting order. `None` when `dragged` or `target` is not in `order`.
pub fn drop_in_column<K: PartialEq + Clone>(
    order: &[K],
    dragged: &K,
    target: Option<&K>,
) -> Option<Vec<K>> {
    if !order.contains(dragged) {
        return None;
    }
    let pointer_y = match target {
        Some(target) => order.iter().position(|id| id == target)? as f64,
        None => order.len() as f64,
    };

    // one row per element, unit height
    let siblings: Vec<Sibling<K>> = order
        .iter()
        .enumerate()
        .map(|(row, id)| Sibling::new(id.clone(), Point::new(0.0, row as f64 + 0.5)))
        .collect();
    let insertion = resolve(Layout::List, &siblings, dragged, Point::new(0.0, pointer_y));
    Some(apply_insertion(order, dragged, &insertion))
}

/// Keeps only the elements named in `order`, in that order. Unknown ids and
/// repeats are ignored.
pub fn intersect_in_order<T, K, F>(elements: Vec<T>, order: &[K], key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut slots: Vec<Option<T>> = elements.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(order.len().min(slots.len()));
    for wanted in order {
        if let Some(slot) = slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|el| &key(el) == wanted))
            && let Some(el) = slot.take()
        {
            out.push(el);
        }
    }
    out
}

/// Reorders the elements named in `order` among the positions they already
/// occupy. Elements not named keep both their index and their relative order,
/// so a reorder issued from a filtered view never disturbs hidden elements.
pub fn reorder_in_slots<T, K, F>(elements: &mut Vec<T>, order: &[K], key: F)
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    let mut picked: Vec<usize> = Vec::with_capacity(order.len());
    for wanted in order {
        if let Some(idx) = elements.iter().position(|el| &key(el) == wanted)
            && seen.insert(idx)
        {
            picked.push(idx);
        }
    }

    let mut slots = picked.clone();
    slots.sort_unstable();

    let mut taken: Vec<Option<T>> = std::mem::take(elements).into_iter().map(Some).collect();
    let moved: Vec<T> = picked.iter().filter_map(|&idx| taken[idx].take()).collect();
    for (slot, el) in slots.into_iter().zip(moved) {
        taken[slot] = Some(el);
    }
    *elements = taken.into_iter().flatten().collect();
}
