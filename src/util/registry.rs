//! Observer registry with opaque identifiers
// (c) 2025 Ross Younger

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a registered observer, for later removal
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Allocates a process-unique identifier
    pub(crate) fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Observers in registration order
pub(crate) struct Registry<T: ?Sized> {
    entries: Vec<(ObserverId, Arc<T>)>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, _)| id))
            .finish()
    }
}

impl<T: ?Sized> Registry<T> {
    /// Adds an observer. Re-using an identifier replaces the earlier entry.
    pub(crate) fn insert(&mut self, id: ObserverId, observer: Arc<T>) {
        let _ = self.remove(id);
        self.entries.push((id, observer));
    }

    /// Returns whether the identifier was registered
    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(i, _)| *i != id);
        self.entries.len() != before
    }

    /// A copy of the current observers, so callbacks may not disturb iteration
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|(_, o)| o.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::{ObserverId, Registry};

    #[test]
    fn insert_remove() {
        let mut r: Registry<str> = Registry::default();
        let a = ObserverId::next();
        let b = ObserverId::next();
        assert_ne!(a, b);
        r.insert(a, Arc::from("a"));
        r.insert(b, Arc::from("b"));
        r.insert(a, Arc::from("a2"));
        assert_eq!(r.len(), 2);
        let names: Vec<String> = r.snapshot().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, ["b", "a2"]);
        assert!(r.remove(b));
        assert!(!r.remove(b));
        assert_eq!(r.len(), 1);
    }
}
