//! sled persistence: CBOR records keyed by id, order-scoped indexes, atomic batches
//!
//! Key layout:
//! - `<kind>/<id>` holds the CBOR record
//! - `<kind>_by_order/<order_id>/<seq>` holds the record id, in creation order
//! - `audit/<order_id>/<seq>` holds one audit entry
use std::sync::Arc;

use sled::Batch;

use crate::utils::sortable_seq;

pub mod keys {
    pub const ORDER: &str = "order";
    pub const QUOTE: &str = "quote";
    pub const PAYMENT: &str = "payment";
    pub const EVIDENCE: &str = "evidence";
    pub const DELIVERY: &str = "delivery";
    pub const DISPUTE: &str = "dispute";
    pub const AUDIT: &str = "audit";

    pub fn record(kind: &str, id: &str) -> String {
        format!("{kind}/{id}")
    }
    pub fn all(kind: &str) -> String {
        format!("{kind}/")
    }
    pub fn by_order(kind: &str, order_id: &str) -> String {
        format!("{kind}_by_order/{order_id}/")
    }
    pub fn audit(order_id: &str) -> String {
        format!("{AUDIT}/{order_id}/")
    }
}

pub struct Store {
    instance: Arc<sled::Db>,
}

impl Store {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every record under `prefix`, in key order.
    pub fn scan<T>(&self, prefix: &str) -> anyhow::Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        let mut records = Vec::new();
        for item in self.instance.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item?;
            records.push(minicbor::decode(&bytes)?);
        }
        Ok(records)
    }

    /// Ids stored in an index, in creation order.
    pub fn index(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        for item in self.instance.scan_prefix(prefix.as_bytes()) {
            let (_, id) = item?;
            ids.push(String::from_utf8(id.to_vec())?);
        }
        Ok(ids)
    }

    /// Records of one kind belonging to an order, in creation order.
    pub fn by_order<T>(&self, kind: &str, order_id: &str) -> anyhow::Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        let mut records = Vec::new();
        for id in self.index(&keys::by_order(kind, order_id))? {
            if let Some(record) = self.get(&keys::record(kind, &id))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Monotonic across restarts.
    pub fn next_seq(&self) -> anyhow::Result<String> {
        Ok(sortable_seq(self.instance.generate_id()?))
    }

    pub fn apply(&self, writes: WriteSet) -> anyhow::Result<()> {
        self.instance.apply_batch(writes.batch)?;
        Ok(())
    }
}

/// Writes of a single operation, applied all-or-nothing.
#[derive(Default)]
pub struct WriteSet {
    batch: Batch,
    len: usize,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: minicbor::Encode<()>>(&mut self, key: &str, value: &T) -> anyhow::Result<()> {
        let cbor = minicbor::to_vec(value)?;
        self.batch.insert(key.as_bytes(), cbor);
        self.len += 1;
        Ok(())
    }

    /// Appends `id` to the order-scoped index of `kind`.
    pub fn index(&mut self, kind: &str, order_id: &str, seq: &str, id: &str) {
        let key = format!("{}{}", keys::by_order(kind, order_id), seq);
        self.batch.insert(key.as_bytes(), id.as_bytes());
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeStamp;
    use tempfile::tempdir;

    #[test]
    fn batch_round_trip_and_index_order() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("store.db"))?);
        let store = Store::new(db);

        let mut writes = WriteSet::new();
        for id in ["c", "a", "b"] {
            let seq = store.next_seq()?;
            writes.put(&keys::record("stamp", id), &TimeStamp::new())?;
            writes.index("stamp", "order_1", &seq, id);
        }
        assert_eq!(writes.len(), 6);
        store.apply(writes)?;

        assert_eq!(store.index(&keys::by_order("stamp", "order_1"))?, vec!["c", "a", "b"]);
        assert_eq!(store.by_order::<TimeStamp>("stamp", "order_1")?.len(), 3);
        assert!(store.get::<TimeStamp>(&keys::record("stamp", "missing"))?.is_none());

        Ok(())
    }
}
