//! Arrays
//!
//! Index reads and writes on an [`Array`] are plain. Structural mutations
//! go through the mutation methods below; on an observed array each of them
//! observes whatever it inserted and notifies the array's observer, which
//! is how watchers of a list learn about pushes and splices.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::object::{Integrity, Marks};
use super::{next_object_id, Value};
use crate::host::observe;

/// A shared handle to an array.
#[derive(Clone)]
pub struct Array(Arc<ArrayInner>);

struct ArrayInner {
    id: u64,
    items: RwLock<Vec<Value>>,
    integrity: RwLock<Integrity>,
    marks: Marks,
}

impl Array {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(ArrayInner {
            id: next_object_id(),
            items: RwLock::new(items),
            integrity: RwLock::new(Integrity::Extensible),
            marks: Marks::default(),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read an item. Out-of-range reads are `Undefined`.
    pub fn get(&self, index: usize) -> Value {
        self.0.items.read().get(index).cloned().unwrap_or_default()
    }

    /// Snapshot of the items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.read().clone()
    }

    /// Plain index write. Not observed; use [`Array::splice`] or
    /// [`crate::set`] to replace an item reactively.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        if self.is_frozen() {
            return false;
        }
        let mut items = self.0.items.write();
        if index >= items.len() {
            if !self.is_extensible() {
                return false;
            }
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value.into();
        true
    }

    pub fn push(&self, value: impl Into<Value>) -> usize {
        if !self.is_extensible() {
            return self.len();
        }
        let value = value.into();
        let len = {
            let mut items = self.0.items.write();
            items.push(value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    pub fn pop(&self) -> Value {
        if self.is_sealed() {
            return Value::Undefined;
        }
        let popped = self.0.items.write().pop();
        self.mutated(&[]);
        popped.unwrap_or_default()
    }

    pub fn shift(&self) -> Value {
        if self.is_sealed() {
            return Value::Undefined;
        }
        let shifted = {
            let mut items = self.0.items.write();
            (!items.is_empty()).then(|| items.remove(0))
        };
        self.mutated(&[]);
        shifted.unwrap_or_default()
    }

    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        if !self.is_extensible() {
            return self.len();
        }
        let value = value.into();
        let len = {
            let mut items = self.0.items.write();
            items.insert(0, value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Remove `delete_count` items at `start` and insert `insert` there.
    ///
    /// Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, insert: Vec<Value>) -> Vec<Value> {
        if self.is_frozen() || (!insert.is_empty() && !self.is_extensible()) {
            return Vec::new();
        }
        let removed = {
            let mut items = self.0.items.write();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items
                .splice(start..end, insert.iter().cloned())
                .collect::<Vec<_>>()
        };
        self.mutated(&insert);
        removed
    }

    /// Truncate or pad with `Undefined`.
    pub fn set_len(&self, len: usize) {
        if self.is_frozen() {
            return;
        }
        self.0.items.write().resize(len, Value::Undefined);
        self.mutated(&[]);
    }

    /// Grow to `len` without notifying observers.
    pub(crate) fn pad_to(&self, len: usize) {
        let mut items = self.0.items.write();
        if items.len() < len {
            items.resize(len, Value::Undefined);
        }
    }

    pub fn reverse(&self) {
        if self.is_frozen() {
            return;
        }
        self.0.items.write().reverse();
        self.mutated(&[]);
    }

    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> CmpOrdering,
    {
        if self.is_frozen() {
            return;
        }
        // Sort a copy so `compare` never runs under the lock.
        let mut items = self.to_vec();
        items.sort_by(compare);
        *self.0.items.write() = items;
        self.mutated(&[]);
    }

    pub fn integrity(&self) -> Integrity {
        *self.0.integrity.read()
    }

    pub fn is_extensible(&self) -> bool {
        self.integrity() == Integrity::Extensible
    }

    fn is_sealed(&self) -> bool {
        self.integrity() >= Integrity::Sealed
    }

    pub fn is_frozen(&self) -> bool {
        self.integrity() == Integrity::Frozen
    }

    pub fn prevent_extensions(&self) {
        let mut integrity = self.0.integrity.write();
        *integrity = (*integrity).max(Integrity::NonExtensible);
    }

    pub fn freeze(&self) {
        *self.0.integrity.write() = Integrity::Frozen;
    }

    pub(crate) fn marks(&self) -> &Marks {
        &self.0.marks
    }

    fn mutated(&self, inserted: &[Value]) {
        let Some(ob) = self.marks().observer() else {
            return;
        };
        if ob.is_raw() {
            return;
        }
        if !ob.is_shallow() {
            for value in inserted {
                observe(value, false);
            }
        }
        ob.dep().notify();
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("id", &self.0.id)
            .field("len", &self.len())
            .finish()
    }
}
