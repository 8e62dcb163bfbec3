use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{ids, Collection, StoreResult};

/// A typed row of a collection.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const COLLECTION: Collection;

    /// Integer id used for allocation, if the record type has one.
    fn id(&self) -> Option<u64> {
        None
    }

    /// Restore derived fields after loading. Must be idempotent.
    fn normalize(&mut self) {}
}

#[derive(Debug, Clone)]
enum Row<T> {
    Typed(T),
    /// A record that does not match `T`. Kept verbatim so rewriting the
    /// collection never drops data we could not read.
    Opaque(Value),
}

/// In-memory copy of a collection, in stored order.
#[derive(Debug, Clone)]
pub struct Table<T> {
    rows: Vec<Row<T>>,
}

impl<T: Record> Default for Table<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T: Record> Table<T> {
    pub fn from_values(values: Vec<Value>) -> Self {
        let rows = values
            .into_iter()
            .map(|value| match serde_json::from_value::<T>(value.clone()) {
                Ok(mut record) => {
                    record.normalize();
                    Row::Typed(record)
                }
                Err(e) => {
                    tracing::debug!("Keeping unreadable {} record as-is: {}", T::COLLECTION, e);
                    Row::Opaque(value)
                }
            })
            .collect();
        Self { rows }
    }

    pub fn to_values(&self) -> StoreResult<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| match row {
                Row::Typed(record) => Ok(serde_json::to_value(record)?),
                Row::Opaque(value) => Ok(value.clone()),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.iter().filter_map(|row| match row {
            Row::Typed(record) => Some(record),
            Row::Opaque(_) => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.rows.iter_mut().filter_map(|row| match row {
            Row::Typed(record) => Some(record),
            Row::Opaque(_) => None,
        })
    }

    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<&T> {
        self.iter().find(|r| pred(r))
    }

    pub fn find_mut(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<&mut T> {
        self.iter_mut().find(|r| pred(r))
    }

    pub fn push(&mut self, record: T) {
        self.rows.push(Row::Typed(record));
    }

    /// Keep typed records matching `keep`. Opaque rows are always kept.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.rows.retain(|row| match row {
            Row::Typed(record) => keep(record),
            Row::Opaque(_) => true,
        });
    }

    /// Remove and return the typed records matching `pred`.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..) {
            match row {
                Row::Typed(record) if pred(&record) => removed.push(record),
                other => kept.push(other),
            }
        }
        self.rows = kept;
        removed
    }

    /// Number of typed records.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next id computed over every row, opaque ones included.
    pub fn next_id(&self) -> u64 {
        ids::next_id_from(self.rows.iter().map(|row| match row {
            Row::Typed(record) => record.id(),
            Row::Opaque(value) => ids::integer_id(value),
        }))
    }

    pub fn into_vec(self) -> Vec<T> {
        self.rows
            .into_iter()
            .filter_map(|row| match row {
                Row::Typed(record) => Some(record),
                Row::Opaque(_) => None,
            })
            .collect()
    }
}
