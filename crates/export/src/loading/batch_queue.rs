use std::collections::HashMap;
use std::sync::Arc;

/// Row identifier
pub type RowId = i64;

/// Deferred assignment of a resolved value
pub type Setter<T> = Box<dyn FnOnce(Arc<T>) + Send>;

/// Pending requests of one sub-exporter: id -> setters in registration order
pub struct BatchQueue<T> {
    order: Vec<RowId>,
    setters: HashMap<RowId, Vec<Setter<T>>>,
}

impl<T> Default for BatchQueue<T> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            setters: HashMap::new(),
        }
    }
}

impl<T> BatchQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a setter for `id`. Nothing runs until the queue is flushed.
    pub fn add<F>(&mut self, id: RowId, setter: F)
    where
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        self.setters
            .entry(id)
            .or_insert_with(|| {
                self.order.push(id);
                Vec::new()
            })
            .push(Box::new(setter));
    }

    /// Distinct pending ids
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn setter_count(&self) -> usize {
        self.setters.values().map(Vec::len).sum()
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.setters.contains_key(&id)
    }

    /// Move every pending request out, leaving the queue empty
    pub fn take(&mut self) -> PendingBatch<T> {
        PendingBatch {
            ids: std::mem::take(&mut self.order),
            setters: std::mem::take(&mut self.setters),
        }
    }

    /// Drop every pending request without invoking a setter
    pub fn clear(&mut self) -> usize {
        let dropped = self.setter_count();
        self.order.clear();
        self.setters.clear();
        dropped
    }
}

/// Requests taken out of a queue for one flush
pub struct PendingBatch<T> {
    ids: Vec<RowId>,
    setters: HashMap<RowId, Vec<Setter<T>>>,
}

impl<T> PendingBatch<T> {
    /// Distinct ids in first-registration order
    pub fn ids(&self) -> &[RowId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Invoke every setter of `id` in registration order with the same value
    pub fn fire(&mut self, id: RowId, value: Arc<T>) -> usize {
        let setters = self.setters.remove(&id).unwrap_or_default();
        let fired = setters.len();
        for setter in setters {
            setter(Arc::clone(&value));
        }
        fired
    }

    /// Drop the setters of `id` without invoking them
    pub fn discard(&mut self, id: RowId) -> usize {
        self.setters.remove(&id).map(|setters| setters.len()).unwrap_or(0)
    }

    /// Ids whose setters have neither fired nor been discarded
    pub fn remaining(&self) -> usize {
        self.setters.len()
    }
}
