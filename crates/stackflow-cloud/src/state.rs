//! Provisioning ledger
//!
//! Manages the `.stackflow/state.json` file which records, for every
//! logical name, the external resource it was realized as. The [`Ledger`]
//! wraps the file for concurrent use by engine workers and writes every
//! change through to disk so an interrupted run can be resumed.

use crate::error::StateError;
use crate::fingerprint::ResolvedOutput;
use crate::graph::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Result<T> = std::result::Result<T, StateError>;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".stackflow";
const STATE_FILE: &str = "state.json";
const STATE_TMP: &str = "state.json.tmp";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Contents of the state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Sequence number handed to the next inserted record
    #[serde(default)]
    pub next_sequence: u64,

    /// Records indexed by logical name
    pub records: BTreeMap<String, ProvisioningRecord>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            next_sequence: 1,
            records: BTreeMap::new(),
        }
    }
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records ordered by creation sequence
    pub fn ordered(&self) -> Vec<&ProvisioningRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by_key(|r| r.sequence);
        records
    }
}

/// Logical name X maps to external resource Y with fingerprint F
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub logical_name: String,

    pub kind: ResourceKind,

    /// Provider-specific resource ID
    pub external_id: String,

    /// Fingerprint of kind + resolved parameters at creation time
    pub fingerprint: String,

    /// Logical names this resource depended on when it was created
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Outputs exposed to dependents (DNS names, ARNs, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    pub status: RecordStatus,

    /// Creation order across the whole ledger
    pub sequence: u64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ProvisioningRecord {
    pub fn new(
        logical_name: impl Into<String>,
        kind: ResourceKind,
        external_id: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            logical_name: logical_name.into(),
            kind,
            external_id: external_id.into(),
            fingerprint: fingerprint.into(),
            dependencies: Vec::new(),
            attributes: BTreeMap::new(),
            status: RecordStatus::Ready,
            sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, serde_json::Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// What this record exposes to `${name}` / `${name.attr}` references
    pub fn output(&self) -> ResolvedOutput {
        ResolvedOutput {
            id: self.external_id.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// Status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Resource was confirmed to exist
    Ready,
    /// Delete was issued but not yet confirmed
    Deleting,
    /// Last delete attempt failed
    Error,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Ready => write!(f, "ready"),
            RecordStatus::Deleting => write!(f, "deleting"),
            RecordStatus::Error => write!(f, "error"),
        }
    }
}

/// State manager for reading/writing state files
#[derive(Debug, Clone)]
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    /// Get the state directory path
    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state
    pub async fn load(&self) -> Result<LedgerState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(LedgerState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: LedgerState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: state.version,
                supported: STATE_VERSION,
            });
        }

        tracing::debug!("Loaded state with {} records", state.records.len());
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    pub async fn save(&self, state: &LedgerState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }

        // Write to a temporary file first so a crash never truncates the state
        let tmp = self.state_dir().join(STATE_TMP);
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved state with {} records", state.records.len());
        Ok(())
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Locks older than one hour are considered stale
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(StateError::Locked {
                    holder: lock_info.holder,
                    since: lock_info.acquired_at.to_rfc3339(),
                });
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Shared, write-through view of the state file used by engine workers.
///
/// Whole-state operations (listing, compaction, every persisted write) are
/// serialized by one async mutex; [`Ledger::lock_name`] additionally gives
/// a worker exclusive ownership of a single logical name.
#[derive(Debug)]
pub struct Ledger {
    manager: Option<StateManager>,
    state: Mutex<LedgerState>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Ledger {
    /// Loads the ledger from a project's state file
    pub async fn open(manager: StateManager) -> Result<Self> {
        let state = manager.load().await?;
        Ok(Self {
            manager: Some(manager),
            state: Mutex::new(state),
            name_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Takes the project's state lock, then loads the ledger under it
    pub async fn open_locked(manager: StateManager) -> Result<(StateLock, Self)> {
        let lock = manager.acquire_lock().await?;
        let ledger = Self::open(manager).await?;
        Ok((lock, ledger))
    }

    /// Ledger that is never persisted
    pub fn in_memory() -> Self {
        Self {
            manager: None,
            state: Mutex::new(LedgerState::new()),
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive ownership of a logical name
    pub async fn lock_name(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.name_locks.lock().await;
            locks.entry(name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Applies `change` to a copy of the state and persists it before
    /// making it visible
    async fn commit<T>(&self, change: impl FnOnce(&mut LedgerState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let value = change(&mut next)?;
        next.updated_at = Utc::now();
        if let Some(manager) = &self.manager {
            manager.save(&next).await?;
        }
        *state = next;
        Ok(value)
    }

    pub async fn get(&self, name: &str) -> Option<ProvisioningRecord> {
        self.state.lock().await.records.get(name).cloned()
    }

    /// Stores a record, assigning the next creation sequence number.
    ///
    /// An existing record under the same name is replaced.
    pub async fn insert(&self, mut record: ProvisioningRecord) -> Result<ProvisioningRecord> {
        self.commit(move |state| {
            record.sequence = state.next_sequence.max(1);
            state.next_sequence = record.sequence + 1;
            state
                .records
                .insert(record.logical_name.clone(), record.clone());
            tracing::debug!(
                name = %record.logical_name,
                sequence = record.sequence,
                "Recorded resource"
            );
            Ok(record)
        })
        .await
    }

    pub async fn set_status(&self, name: &str, status: RecordStatus) -> Result<()> {
        self.commit(|state| {
            let record = state
                .records
                .get_mut(name)
                .ok_or_else(|| StateError::UnknownRecord(name.to_string()))?;
            record.status = status;
            record.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    /// Removes a record after its resource was confirmed deleted
    pub async fn remove(&self, name: &str) -> Result<Option<ProvisioningRecord>> {
        self.commit(|state| Ok(state.records.remove(name))).await
    }

    /// All records ordered by creation sequence
    pub async fn list(&self) -> Vec<ProvisioningRecord> {
        self.state
            .lock()
            .await
            .ordered()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Names of records that were created depending on `name`
    pub async fn dependents_of(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .ordered()
            .into_iter()
            .filter(|r| r.dependencies.iter().any(|d| d == name))
            .map(|r| r.logical_name.clone())
            .collect()
    }

    /// Drops records whose deletion was confirmed, in a single write.
    ///
    /// Only records in `deleting` or `error` state are eligible; returns
    /// the names actually dropped.
    pub async fn compact(&self, names: &[String]) -> Result<Vec<String>> {
        self.commit(|state| {
            let mut dropped = Vec::new();
            for name in names {
                let eligible = state
                    .records
                    .get(name)
                    .is_some_and(|r| r.status != RecordStatus::Ready);
                if eligible {
                    state.records.remove(name);
                    dropped.push(name.clone());
                }
            }
            Ok(dropped)
        })
        .await
    }

    /// Drops a record without touching the cloud resource
    pub async fn forget(&self, name: &str) -> Result<ProvisioningRecord> {
        self.commit(|state| {
            state
                .records
                .remove(name)
                .ok_or_else(|| StateError::UnknownRecord(name.to_string()))
        })
        .await
    }

    /// Copy of the whole state
    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(name: &str, deps: &[&str]) -> ProvisioningRecord {
        ProvisioningRecord::new(name, ResourceKind::Subnet, format!("id-{name}"), "fp")
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut state = LedgerState::new();
        state
            .records
            .insert("vpc".into(), record("vpc", &[]));
        manager.save(&state).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records["vpc"].external_id, "id-vpc");

        // Second save keeps the previous file as backup
        manager.save(&LedgerState::new()).await.unwrap();
        assert!(manager.state_dir().join(STATE_BACKUP).exists());
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let state = manager.load().await.unwrap();
        assert!(state.records.is_empty());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        let state = LedgerState {
            version: STATE_VERSION + 1,
            ..LedgerState::new()
        };
        manager.save(&state).await.unwrap();

        assert!(matches!(
            manager.load().await,
            Err(StateError::UnsupportedVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let lock = manager.acquire_lock().await.unwrap();
        assert!(matches!(
            manager.acquire_lock().await,
            Err(StateError::Locked { .. })
        ));
        lock.release().await.unwrap();

        let lock = manager.acquire_lock().await.unwrap();
        drop(lock);
        assert!(!manager.state_dir().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_open_locked_loads_after_locking() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let writer = Ledger::open(manager.clone()).await.unwrap();
        writer.insert(record("vpc", &[])).await.unwrap();

        let (lock, ledger) = Ledger::open_locked(manager.clone()).await.unwrap();
        assert!(ledger.get("vpc").await.is_some());

        // A second session fails before reading state
        assert!(matches!(
            Ledger::open_locked(manager.clone()).await,
            Err(StateError::Locked { .. })
        ));

        lock.release().await.unwrap();
        assert!(Ledger::open_locked(manager).await.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_writes_through() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        let ledger = Ledger::open(manager.clone()).await.unwrap();

        let vpc = ledger.insert(record("vpc", &[])).await.unwrap();
        let subnet = ledger.insert(record("subnet", &["vpc"])).await.unwrap();
        assert_eq!(vpc.sequence, 1);
        assert_eq!(subnet.sequence, 2);

        let reopened = Ledger::open(manager).await.unwrap();
        let names: Vec<_> = reopened
            .list()
            .await
            .into_iter()
            .map(|r| r.logical_name)
            .collect();
        assert_eq!(names, vec!["vpc", "subnet"]);
        assert_eq!(reopened.dependents_of("vpc").await, vec!["subnet"]);
    }

    #[tokio::test]
    async fn test_sequence_survives_removal() {
        let ledger = Ledger::in_memory();
        ledger.insert(record("a", &[])).await.unwrap();
        ledger.insert(record("b", &[])).await.unwrap();
        ledger.remove("b").await.unwrap();
        let c = ledger.insert(record("c", &[])).await.unwrap();
        assert_eq!(c.sequence, 3);
    }

    #[tokio::test]
    async fn test_set_status_and_compact() {
        let ledger = Ledger::in_memory();
        ledger.insert(record("a", &[])).await.unwrap();
        ledger.insert(record("b", &[])).await.unwrap();
        ledger.set_status("a", RecordStatus::Deleting).await.unwrap();

        let dropped = ledger
            .compact(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(dropped, vec!["a"]);
        assert!(ledger.get("a").await.is_none());
        assert!(ledger.get("b").await.is_some());

        assert!(matches!(
            ledger.set_status("zzz", RecordStatus::Error).await,
            Err(StateError::UnknownRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_forget() {
        let ledger = Ledger::in_memory();
        ledger.insert(record("a", &[])).await.unwrap();
        assert_eq!(ledger.forget("a").await.unwrap().logical_name, "a");
        assert!(matches!(
            ledger.forget("a").await,
            Err(StateError::UnknownRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_name_lock_serializes_same_name() {
        let ledger = Arc::new(Ledger::in_memory());
        let guard = ledger.lock_name("vpc").await;

        // A different name is not blocked
        let _other = ledger.lock_name("subnet").await;

        let waiter = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let _g = ledger.lock_name("vpc").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }
}
