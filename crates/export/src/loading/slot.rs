use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Shared single-assignment target for a deferred value.
///
/// A slot hands out setters for a batch queue; whichever setter runs first
/// fills it, later ones are ignored.
pub struct Slot<T> {
    value: Arc<Mutex<Option<Arc<T>>>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Send + Sync + 'static> Slot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Setter that fills this slot
    pub fn setter(&self) -> impl FnOnce(Arc<T>) + Send + 'static {
        let value = Arc::clone(&self.value);
        move |resolved| {
            let mut guard = value.lock();
            if guard.is_none() {
                *guard = Some(resolved);
            }
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.value.lock().clone()
    }

    pub fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&*self.value.lock()).finish()
    }
}

impl<T: Serialize> Serialize for Slot<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.lock().as_deref().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_setter_wins() {
        let slot: Slot<u32> = Slot::new();
        let first = slot.setter();
        let second = slot.setter();
        assert!(!slot.is_filled());

        first(Arc::new(1));
        second(Arc::new(2));
        assert_eq!(slot.get().as_deref(), Some(&1));
    }

    #[test]
    fn test_clones_share_value() {
        let slot: Slot<String> = Slot::new();
        let observer = slot.clone();
        (slot.setter())(Arc::new("ring".to_string()));
        assert_eq!(observer.get().as_deref().map(String::as_str), Some("ring"));
        assert_eq!(serde_json::to_string(&observer).unwrap(), "\"ring\"");
    }
}
