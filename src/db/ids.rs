//! Integer id assignment.
//!
//! `next_id` is one more than the largest integer id present. Because a
//! deleted maximum would otherwise be handed out again, allocation also
//! consults a per-collection high-water mark kept in the `sequences`
//! collection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Collection, Record, Table};

/// Highest id ever issued for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub collection: String,
    pub last_id: u64,
}

impl Record for Sequence {
    const COLLECTION: Collection = Collection::Sequences;
}

/// Integer `id` of a raw record. Strings, floats, negatives and missing ids
/// yield `None`.
pub fn integer_id(record: &Value) -> Option<u64> {
    record.get("id").and_then(Value::as_u64)
}

/// `1 + max(id)` over records with a valid integer id; `1` when there are none.
pub fn next_id(records: &[Value]) -> u64 {
    next_id_from(records.iter().map(integer_id))
}

pub fn next_id_from(ids: impl IntoIterator<Item = Option<u64>>) -> u64 {
    ids.into_iter().flatten().max().map_or(1, |max| max + 1)
}

/// Reserve an id for `collection`, never lower than `table_next` and never
/// at or below the recorded high-water mark.
pub(crate) fn allocate(
    sequences: &mut Table<Sequence>,
    collection: Collection,
    table_next: u64,
) -> u64 {
    let name = collection.name();
    match sequences.find_mut(|s| s.collection == name) {
        Some(seq) => {
            let id = table_next.max(seq.last_id + 1);
            seq.last_id = id;
            id
        }
        None => {
            sequences.push(Sequence {
                collection: name.to_string(),
                last_id: table_next,
            });
            table_next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_collection_starts_at_one() {
        assert_eq!(next_id(&[]), 1);
    }

    #[test]
    fn malformed_ids_are_ignored() {
        assert_eq!(next_id(&[json!({"id": 5}), json!({"id": "x"})]), 6);
    }

    #[test]
    fn missing_and_negative_ids_are_ignored() {
        let records = [
            json!({"name": "no id"}),
            json!({"id": -4}),
            json!({"id": 2.5}),
            json!({"id": 2}),
        ];
        assert_eq!(next_id(&records), 3);
    }

    #[test]
    fn only_malformed_ids_start_at_one() {
        assert_eq!(next_id(&[json!({"id": "7"}), json!({"id": null})]), 1);
    }

    #[test]
    fn allocate_records_high_water_mark() {
        let mut seqs = Table::<Sequence>::default();
        assert_eq!(allocate(&mut seqs, Collection::Posts, 1), 1);
        assert_eq!(allocate(&mut seqs, Collection::Posts, 2), 2);
        // Record 2 deleted: table says 2 again, sequence says 3.
        assert_eq!(allocate(&mut seqs, Collection::Posts, 2), 3);
        // Collections are independent.
        assert_eq!(allocate(&mut seqs, Collection::ForumThreads, 1), 1);
    }

    #[test]
    fn allocate_follows_table_when_it_is_ahead() {
        let mut seqs = Table::<Sequence>::default();
        seqs.push(Sequence {
            collection: "posts".into(),
            last_id: 3,
        });
        assert_eq!(allocate(&mut seqs, Collection::Posts, 10), 10);
    }
}
