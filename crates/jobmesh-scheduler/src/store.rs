//! JSON values over the key-value store

use crate::error::Result;
use jobmesh_core::{from_json_slice, to_json_vec};
use jobmesh_storage::KVStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn read_json<T: DeserializeOwned>(store: &dyn KVStore, key: &str) -> Result<Option<T>> {
    match store.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(from_json_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn write_json<T: Serialize>(store: &dyn KVStore, key: &str, value: &T) -> Result<()> {
    store.put(key.as_bytes(), &to_json_vec(value)?)?;
    Ok(())
}

/// Decode every value under a prefix, in key order
pub(crate) fn scan_json<T: DeserializeOwned>(store: &dyn KVStore, prefix: &str) -> Result<Vec<T>> {
    store
        .scan(prefix.as_bytes())?
        .into_iter()
        .map(|(_, value)| Ok(from_json_slice(&value)?))
        .collect()
}
