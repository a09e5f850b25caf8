//! Row identity and the object storage that maps identities to beans.

use crate::error::{Error, Result};
use crate::factory::BeanRef;
use crate::hydrator::BeanData;
use crate::schema::Schema;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use tdbm_api::Value;

/// Key derived from the ordered primary-key values of one table row.
///
/// A single-column key renders as its canonical JSON value; composite keys
/// render as a JSON array of them. Values of different types never share a
/// key, so `Int(1)` and `String("1")` are distinct rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityHash(String);

impl IdentityHash {
    pub fn from_values(values: &[Value]) -> Self {
        match values {
            [single] => IdentityHash(canonical_json(single).to_string()),
            _ => {
                let array = values.iter().map(canonical_json).collect();
                IdentityHash(serde_json::Value::Array(array).to_string())
            }
        }
    }

    /// Computes the identity of `table`'s part of `data`.
    pub fn compute(schema: &Schema, table: &str, data: &BeanData) -> Result<Self> {
        let columns = data
            .table(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))?;
        let values = schema.primary_key_values(table, columns)?;
        Ok(Self::from_values(&values))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::DateTime(micros) => serde_json::json!({ "datetime": micros }),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(_) => serde_json::json!({ "bytes": value.to_string() }),
    }
}

/// Session-scoped map from `(table, identity)` to the one live bean for that row.
///
/// Entries are never evicted here; the owning session decides their lifetime.
#[derive(Debug, Default)]
pub struct ObjectStorage {
    beans: HashMap<(String, IdentityHash), BeanRef>,
}

impl ObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, table: &str, hash: &IdentityHash) -> bool {
        self.beans.contains_key(&(table.to_string(), hash.clone()))
    }

    pub fn get(&self, table: &str, hash: &IdentityHash) -> Option<BeanRef> {
        self.beans.get(&(table.to_string(), hash.clone())).cloned()
    }

    /// Stores `bean` unless the identity is already taken.
    ///
    /// Returns the bean that ends up stored, and `true` when it is `bean`.
    pub fn get_or_insert(
        &mut self,
        table: &str,
        hash: IdentityHash,
        bean: BeanRef,
    ) -> (BeanRef, bool) {
        match self.beans.entry((table.to_string(), hash)) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => (e.insert(bean).clone(), true),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.beans.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}
