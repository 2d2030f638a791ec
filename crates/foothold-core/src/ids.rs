use uuid::Uuid;

/// Time-based integer ids that never repeat within a process.
///
/// Ids start from the wall-clock millisecond like the stored data always has,
/// but a second request in the same millisecond (or after the clock steps
/// backwards) gets `last + 1` instead of a duplicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdGenerator {
    last: i64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure later ids sort after `id`.
    pub fn observe(&mut self, id: i64) {
        self.last = self.last.max(id);
    }

    pub fn next(&mut self, now_millis: i64) -> i64 {
        let id = if now_millis > self.last {
            now_millis
        } else {
            self.last + 1
        };
        self.last = id;
        id
    }
}

pub fn new_category_id() -> String {
    format!("cat_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::{IdGenerator, new_category_id};

    #[test]
    fn same_millisecond_does_not_collide() {
        let mut ids = IdGenerator::new();
        let a = ids.next(1_000);
        let b = ids.next(1_000);
        let c = ids.next(999);
        assert_eq!((a, b, c), (1_000, 1_001, 1_002));
        assert_eq!(ids.next(5_000), 5_000);
    }

    #[test]
    fn observed_ids_are_never_reissued() {
        let mut ids = IdGenerator::new();
        ids.observe(2_000);
        assert_eq!(ids.next(1_500), 2_001);
    }

    #[test]
    fn category_ids_are_distinct() {
        let a = new_category_id();
        let b = new_category_id();
        assert!(a.starts_with("cat_"));
        assert_ne!(a, b);
    }
}
