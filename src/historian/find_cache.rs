//! Short-lived memo for neighbour searches.
//!
//! Polling callers tend to repeat the same search several times a second. Entries
//! expire after a sub-second TTL and the whole cache is dropped on every rotation
//! check, so a stale answer can only survive a few hundred milliseconds.

use std::collections::HashMap;

use crate::historian::SearchDirection;

const MAX_ENTRIES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FindKey {
    scope: String,
    t: i64,
    direction: SearchDirection,
}

#[derive(Debug, Default)]
pub(crate) struct FindCache {
    entries: HashMap<FindKey, (Option<i64>, i64)>,
}

impl FindCache {
    pub(crate) fn get(
        &self,
        scope: &str,
        t: i64,
        direction: SearchDirection,
        now_ms: i64,
        ttl_ms: u64,
    ) -> Option<Option<i64>> {
        let key = FindKey {
            scope: scope.to_string(),
            t,
            direction,
        };
        let (found, stored_at) = self.entries.get(&key)?;
        let age = now_ms.saturating_sub(*stored_at);
        (age >= 0 && (age as u64) < ttl_ms).then_some(*found)
    }

    pub(crate) fn insert(
        &mut self,
        scope: &str,
        t: i64,
        direction: SearchDirection,
        found: Option<i64>,
        now_ms: i64,
    ) {
        if self.entries.len() >= MAX_ENTRIES {
            self.entries.clear();
        }
        self.entries.insert(
            FindKey {
                scope: scope.to_string(),
                t,
                direction,
            },
            (found, now_ms),
        );
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = FindCache::default();
        cache.insert("temp1", 10, SearchDirection::Above, Some(11), 1_000);

        assert_eq!(cache.get("temp1", 10, SearchDirection::Above, 1_200, 500), Some(Some(11)));
        assert_eq!(cache.get("temp1", 10, SearchDirection::Below, 1_200, 500), None);
        assert_eq!(cache.get("temp1", 10, SearchDirection::Above, 1_500, 500), None);
    }

    #[test]
    fn zero_ttl_disables_hits() {
        let mut cache = FindCache::default();
        cache.insert("temp1", 10, SearchDirection::Above, None, 1_000);
        assert_eq!(cache.get("temp1", 10, SearchDirection::Above, 1_000, 0), None);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
