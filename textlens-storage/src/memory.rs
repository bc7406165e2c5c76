//! In-memory Artifact Store.
//!
//! Backs unit tests and single-process deployments. A single write lock
//! serializes mutations, which gives every operation the same all-or-nothing
//! behaviour a SQL transaction would.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use textlens_core::{
    Artifact, ArtifactFilter, ArtifactId, ArtifactKind, ArtifactPatch, NewArtifact, OwnerId,
    StorageError, StorageResult,
};

use crate::store::ArtifactStore;

#[derive(Debug)]
struct MemoryTable<K: ArtifactKind> {
    rows: BTreeMap<ArtifactId, Artifact<K>>,
    next_id: i64,
    /// Known owners. `None` disables the owner reference check.
    owners: Option<HashSet<OwnerId>>,
}

impl<K: ArtifactKind> MemoryTable<K> {
    fn check_owner(&self, owner_id: Option<OwnerId>) -> StorageResult<()> {
        match (&self.owners, owner_id) {
            (Some(owners), Some(owner)) if !owners.contains(&owner) => {
                Err(StorageError::ForeignKeyViolation {
                    table: K::TABLE.to_string(),
                    reason: format!("owner {} does not exist", owner),
                })
            }
            _ => Ok(()),
        }
    }

    /// Whether a row other than `except` already holds this natural key.
    fn natural_key_taken(
        &self,
        owner_id: Option<OwnerId>,
        source_text: &str,
        except: &HashSet<ArtifactId>,
    ) -> bool {
        let Some(owner) = owner_id else {
            return false;
        };
        self.rows.values().any(|row| {
            !except.contains(&row.id) && row.is_owned_by(owner) && row.source_text == source_text
        })
    }
}

fn duplicate<K: ArtifactKind>(owner: Option<OwnerId>) -> StorageError {
    StorageError::UniqueViolation {
        table: K::TABLE.to_string(),
        reason: format!(
            "owner {} already has a row for this source text",
            owner.map_or_else(|| "-".to_string(), |o| o.to_string())
        ),
    }
}

/// Artifact Store kept entirely in process memory.
///
/// Clones share the same table.
#[derive(Debug)]
pub struct MemoryArtifactStore<K: ArtifactKind> {
    table: Arc<RwLock<MemoryTable<K>>>,
}

impl<K: ArtifactKind> Clone for MemoryArtifactStore<K> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K: ArtifactKind> Default for MemoryArtifactStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArtifactKind> MemoryArtifactStore<K> {
    /// An empty store that accepts any owner id.
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(MemoryTable {
                rows: BTreeMap::new(),
                next_id: 1,
                owners: None,
            })),
        }
    }

    /// An empty store that only accepts rows for the given owners.
    pub fn with_owners(owners: impl IntoIterator<Item = OwnerId>) -> Self {
        let store = Self::new();
        if let Ok(mut table) = store.table.write() {
            table.owners = Some(owners.into_iter().collect());
        }
        store
    }

    /// Register an owner, turning on the owner reference check.
    pub fn register_owner(&self, owner: OwnerId) -> StorageResult<()> {
        let mut table = self.write()?;
        table.owners.get_or_insert_with(HashSet::new).insert(owner);
        Ok(())
    }

    /// Number of stored rows.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.read()?.rows.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, MemoryTable<K>>> {
        self.table.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, MemoryTable<K>>> {
        self.table.write().map_err(|_| StorageError::LockPoisoned)
    }
}

#[async_trait]
impl<K: ArtifactKind> ArtifactStore<K> for MemoryArtifactStore<K> {
    async fn get(&self, filter: &ArtifactFilter) -> StorageResult<Option<Artifact<K>>> {
        let table = self.read()?;
        Ok(table.rows.values().find(|row| filter.matches(*row)).cloned())
    }

    async fn filter(&self, filter: &ArtifactFilter) -> StorageResult<Vec<Artifact<K>>> {
        let table = self.read()?;
        Ok(table
            .rows
            .values()
            .filter(|row| filter.matches(*row))
            .cloned()
            .collect())
    }

    async fn create(&self, fields: NewArtifact<K>) -> StorageResult<Artifact<K>> {
        let mut table = self.write()?;
        table.check_owner(fields.owner_id)?;
        if table.natural_key_taken(fields.owner_id, &fields.source_text, &HashSet::new()) {
            return Err(duplicate::<K>(fields.owner_id));
        }

        let id = ArtifactId::new(table.next_id);
        table.next_id += 1;
        let now = Utc::now();
        let artifact = Artifact {
            id,
            owner_id: fields.owner_id,
            source_text: fields.source_text,
            result: fields.result,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(id, artifact.clone());
        Ok(artifact)
    }

    async fn update(&self, filter: &ArtifactFilter, patch: ArtifactPatch<K>) -> StorageResult<u64> {
        let mut table = self.write()?;
        let now = Utc::now();

        let mut staged: Vec<Artifact<K>> = table
            .rows
            .values()
            .filter(|row| filter.matches(*row))
            .cloned()
            .collect();
        for row in &mut staged {
            patch.apply_to(row, now);
        }

        // Nothing is written until every staged row passes the unique check.
        let touched: HashSet<ArtifactId> = staged.iter().map(|row| row.id).collect();
        let mut seen = HashSet::new();
        for row in &staged {
            if let Some(owner) = row.owner_id {
                let fresh = seen.insert((owner, row.source_text.as_str()));
                if !fresh || table.natural_key_taken(row.owner_id, &row.source_text, &touched) {
                    return Err(duplicate::<K>(row.owner_id));
                }
            }
        }

        let changed = staged.len() as u64;
        for row in staged {
            table.rows.insert(row.id, row);
        }
        Ok(changed)
    }

    async fn delete(&self, filter: &ArtifactFilter) -> StorageResult<u64> {
        let mut table = self.write()?;
        let before = table.rows.len();
        table.rows.retain(|_, row| !filter.matches(&*row));
        Ok((before - table.rows.len()) as u64)
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.read().map(|_| ())
    }
}
