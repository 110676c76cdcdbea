//! Credential store adapter
//!
//! The handlers never talk to storage directly; they go through
//! [`CredentialStore`], which separates the in-memory index (`add_entry`)
//! from the durability boundary (`persist`). A store must guarantee that a
//! successful `add_entry` followed by a successful `persist` makes the entry
//! visible to every subsequent `get_entry`, and that a failed `persist`
//! leaves the observable state consistent across the whole batch.
//!
//! [`MemoryStore`] is the reference implementation used by the tests and by
//! virtual-authenticator consumers.

use crate::status::{Result, StatusCode};

use std::collections::BTreeMap;
use std::sync::Mutex;

use zeroize::Zeroizing;

/// Length of a credential id in bytes.
pub const CREDENTIAL_ID_LEN: usize = 32;

/// Named fields of a credential entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CredentialField {
    /// Relying party identifier, UTF-8
    RpId,
    /// Opaque user handle, at most 64 bytes
    UserId,
    /// Algorithm-dependent private key material
    PrivateKey,
    /// COSE algorithm identifier, 4 bytes big-endian signed
    Algorithm,
    /// Credential protection policy byte; absent means UV-optional
    Policy,
    /// hmac-secret seed returned when the assertion was UV-verified
    CredRandomWithUv,
    /// hmac-secret seed returned otherwise
    CredRandomWithoutUv,
    /// Monotonic signature counter, 4 bytes big-endian
    UsageCount,
}

/// One stored credential: a 32-byte id plus named byte-string fields.
///
/// Field values are zeroed on drop; the private key and hmac-secret seeds
/// live here.
#[derive(Debug, Clone)]
pub struct CredentialEntry {
    id: [u8; CREDENTIAL_ID_LEN],
    fields: BTreeMap<CredentialField, Zeroizing<Vec<u8>>>,
    created_at: u64,
    updated_at: u64,
}

impl CredentialEntry {
    fn new(id: [u8; CREDENTIAL_ID_LEN], now: u64) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &[u8; CREDENTIAL_ID_LEN] {
        &self.id
    }

    /// Wall-clock creation time as reported by the environment.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// Storage operations the authenticator core depends on.
///
/// `create_entry`, `add_field`, `get_field`, `get_entry`, `add_entry` and
/// `persist` carry the credential-creation path; `list_entries` and
/// `update_entry` carry assertion discovery and counter writeback;
/// `erase_all` backs authenticatorReset.
///
/// All methods take `&self`; implementations use interior mutability. The
/// `now` arguments carry the environment clock for stores that expire or
/// timestamp fields — the core never interprets them.
pub trait CredentialStore {
    /// Return an uninitialized, unpersisted entry bound to `id`.
    fn create_entry(&self, id: &[u8; CREDENTIAL_ID_LEN], now: u64) -> Result<CredentialEntry> {
        Ok(CredentialEntry::new(*id, now))
    }

    /// Add or overwrite a named field, recording `now` as the update time.
    fn add_field(
        &self,
        entry: &mut CredentialEntry,
        field: CredentialField,
        value: &[u8],
        now: u64,
    ) -> Result<()> {
        entry
            .fields
            .insert(field, Zeroizing::new(value.to_vec()));
        entry.updated_at = now;
        Ok(())
    }

    /// Current value of a named field, if set.
    fn get_field(
        &self,
        entry: &CredentialEntry,
        field: CredentialField,
        _now: u64,
    ) -> Option<Vec<u8>> {
        entry.fields.get(&field).map(|v| v.to_vec())
    }

    /// Look up a committed entry by credential id.
    fn get_entry(&self, id: &[u8]) -> Result<Option<CredentialEntry>>;

    /// All committed entries whose `RpId` field equals `rp_id`.
    fn list_entries(&self, rp_id: &str) -> Result<Vec<CredentialEntry>>;

    /// Commit an entry to the in-memory index. Rejects a duplicate id or an
    /// index at capacity with `key_store_full`.
    fn add_entry(&self, entry: CredentialEntry) -> Result<()>;

    /// Write back a mutated entry (usage counter updates).
    fn update_entry(&self, entry: &CredentialEntry) -> Result<()>;

    /// Atomically flush all in-memory mutations to durable storage.
    fn persist(&self) -> Result<()>;

    /// Remove every entry. Backs authenticatorReset.
    fn erase_all(&self) -> Result<()>;
}

/// In-memory reference store. Capacity-bounded, duplicate-rejecting;
/// `persist` is a no-op because memory is its durability.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<[u8; CREDENTIAL_ID_LEN], CredentialEntry>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<[u8; CREDENTIAL_ID_LEN], CredentialEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryStore {
    fn get_entry(&self, id: &[u8]) -> Result<Option<CredentialEntry>> {
        let id: [u8; CREDENTIAL_ID_LEN] = match id.try_into() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        Ok(self.lock().get(&id).cloned())
    }

    fn list_entries(&self, rp_id: &str) -> Result<Vec<CredentialEntry>> {
        Ok(self
            .lock()
            .values()
            .filter(|entry| {
                entry
                    .fields
                    .get(&CredentialField::RpId)
                    .is_some_and(|v| v.as_slice() == rp_id.as_bytes())
            })
            .cloned()
            .collect())
    }

    fn add_entry(&self, entry: CredentialEntry) -> Result<()> {
        let mut entries = self.lock();
        if entries.len() >= self.capacity || entries.contains_key(&entry.id) {
            return Err(StatusCode::KeyStoreFull);
        }
        entries.insert(entry.id, entry);
        Ok(())
    }

    fn update_entry(&self, entry: &CredentialEntry) -> Result<()> {
        let mut entries = self.lock();
        match entries.get_mut(&entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(())
            }
            None => Err(StatusCode::InvalidCredential),
        }
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }

    fn erase_all(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_rp(store: &MemoryStore, id: u8, rp_id: &str) -> CredentialEntry {
        let mut entry = store.create_entry(&[id; 32], 1000).unwrap();
        store
            .add_field(&mut entry, CredentialField::RpId, rp_id.as_bytes(), 1000)
            .unwrap();
        entry
    }

    #[test]
    fn add_then_get() {
        let store = MemoryStore::new();
        let entry = entry_with_rp(&store, 1, "example.com");
        store.add_entry(entry).unwrap();
        store.persist().unwrap();

        let found = store.get_entry(&[1u8; 32]).unwrap().unwrap();
        assert_eq!(
            store.get_field(&found, CredentialField::RpId, 0).unwrap(),
            b"example.com"
        );
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let store = MemoryStore::new();
        store.add_entry(entry_with_rp(&store, 1, "a.com")).unwrap();
        let result = store.add_entry(entry_with_rp(&store, 1, "b.com"));
        assert_eq!(result.unwrap_err(), StatusCode::KeyStoreFull);
    }

    #[test]
    fn capacity_is_enforced() {
        let store = MemoryStore::with_capacity(1);
        store.add_entry(entry_with_rp(&store, 1, "a.com")).unwrap();
        let result = store.add_entry(entry_with_rp(&store, 2, "a.com"));
        assert_eq!(result.unwrap_err(), StatusCode::KeyStoreFull);
    }

    #[test]
    fn list_filters_by_rp() {
        let store = MemoryStore::new();
        store.add_entry(entry_with_rp(&store, 1, "a.com")).unwrap();
        store.add_entry(entry_with_rp(&store, 2, "b.com")).unwrap();
        store.add_entry(entry_with_rp(&store, 3, "a.com")).unwrap();

        assert_eq!(store.list_entries("a.com").unwrap().len(), 2);
        assert_eq!(store.list_entries("c.com").unwrap().len(), 0);
    }

    #[test]
    fn unknown_id_or_wrong_length_is_none() {
        let store = MemoryStore::new();
        assert!(store.get_entry(&[9u8; 32]).unwrap().is_none());
        assert!(store.get_entry(&[9u8; 7]).unwrap().is_none());
    }

    #[test]
    fn update_overwrites_fields() {
        let store = MemoryStore::new();
        store.add_entry(entry_with_rp(&store, 1, "a.com")).unwrap();

        let mut entry = store.get_entry(&[1u8; 32]).unwrap().unwrap();
        store
            .add_field(&mut entry, CredentialField::UsageCount, &7u32.to_be_bytes(), 2000)
            .unwrap();
        store.update_entry(&entry).unwrap();

        let reread = store.get_entry(&[1u8; 32]).unwrap().unwrap();
        assert_eq!(
            store
                .get_field(&reread, CredentialField::UsageCount, 0)
                .unwrap(),
            7u32.to_be_bytes()
        );
    }

    #[test]
    fn update_of_uncommitted_entry_fails() {
        let store = MemoryStore::new();
        let entry = entry_with_rp(&store, 1, "a.com");
        assert_eq!(
            store.update_entry(&entry).unwrap_err(),
            StatusCode::InvalidCredential
        );
    }

    #[test]
    fn erase_all_empties_the_store() {
        let store = MemoryStore::new();
        store.add_entry(entry_with_rp(&store, 1, "a.com")).unwrap();
        store.erase_all().unwrap();
        assert!(store.is_empty());
    }
}
