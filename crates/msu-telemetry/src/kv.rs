//! Durable key-value persistence for study state.
//!
//! Every call is atomic on its own. `update` is the only cross-read/write
//! transaction: it holds the store exclusively while the caller transforms a
//! single key, so concurrent writers cannot lose each other's updates.
//!
//! [`FileStore`] keeps all keys in one JSON object on disk. Writers are
//! serialized by an in-process mutex plus an exclusive lock file, and every
//! write goes to a temp file that is renamed into place.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors from durable store operations.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("State file {0} does not hold a JSON object")]
    NotAnObject(PathBuf),

    #[error("Timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },
}

/// Key/value map as stored.
pub type Entries = Map<String, Value>;

/// Outcome of an `update` transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Store this value under the key.
    Put(Value),
    /// Remove the key.
    Delete,
    /// Leave the key untouched (nothing is written).
    Keep,
}

/// Key-value persistence consumed by the observation store.
pub trait DurableStore: Send + Sync {
    /// Fetch the given keys. Absent keys are missing from the result.
    fn get(&self, keys: &[&str]) -> Result<Entries, KvError>;

    /// Write all entries in one atomic step.
    fn set(&self, entries: Entries) -> Result<(), KvError>;

    /// Remove keys. Removing an absent key is not an error.
    fn remove(&self, keys: &[&str]) -> Result<(), KvError>;

    /// Atomically read, transform and write back a single key.
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&Value>) -> Update,
    ) -> Result<(), KvError>;
}

fn apply_update(entries: &mut Entries, key: &str, update: Update) -> bool {
    match update {
        Update::Put(value) => {
            entries.insert(key.to_string(), value);
            true
        }
        Update::Delete => entries.remove(key).is_some(),
        Update::Keep => false,
    }
}

fn select(entries: &Entries, keys: &[&str]) -> Entries {
    keys.iter()
        .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> Entries {
        lock_ignoring_poison(&self.entries).clone()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Entries, KvError> {
        Ok(select(&lock_ignoring_poison(&self.entries), keys))
    }

    fn set(&self, entries: Entries) -> Result<(), KvError> {
        lock_ignoring_poison(&self.entries).extend(entries);
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), KvError> {
        let mut guard = lock_ignoring_poison(&self.entries);
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&Value>) -> Update,
    ) -> Result<(), KvError> {
        let mut guard = lock_ignoring_poison(&self.entries);
        let update = apply(guard.get(key));
        apply_update(&mut guard, key, update);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// State file name inside the data directory.
pub const STATE_FILENAME: &str = "study_state.json";

/// Lock file name inside the data directory.
pub const LOCK_FILENAME: &str = "study_state.lock";

/// Default wait for the lock file.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Lock files older than this are left over from a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// JSON-file backed store.
#[derive(Debug)]
pub struct FileStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    writer: Mutex<()>,
}

impl FileStore {
    /// Open (creating the directory if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, KvError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            state_path: dir.join(STATE_FILENAME),
            lock_path: dir.join(LOCK_FILENAME),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            writer: Mutex::new(()),
        })
    }

    /// Set how long writers wait for the lock file.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.state_path
    }

    fn read_entries(&self) -> Result<Entries, KvError> {
        if !self.state_path.exists() {
            return Ok(Entries::new());
        }
        let contents = fs::read_to_string(&self.state_path)?;
        if contents.trim().is_empty() {
            return Ok(Entries::new());
        }
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            _ => Err(KvError::NotAnObject(self.state_path.clone())),
        }
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), KvError> {
        let tmp_path = self.state_path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(entries)?;
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&json)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }

    /// Run `f` with exclusive access, writing back when it reports a change.
    fn transaction<F>(&self, f: F) -> Result<(), KvError>
    where
        F: FnOnce(&mut Entries) -> bool,
    {
        let _local = lock_ignoring_poison(&self.writer);
        let _file = LockGuard::acquire(&self.lock_path, self.lock_timeout)?;
        let mut entries = self.read_entries()?;
        if f(&mut entries) {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}

impl DurableStore for FileStore {
    fn get(&self, keys: &[&str]) -> Result<Entries, KvError> {
        // Writers rename complete files into place, so reads need no lock.
        Ok(select(&self.read_entries()?, keys))
    }

    fn set(&self, entries: Entries) -> Result<(), KvError> {
        self.transaction(|current| {
            current.extend(entries);
            true
        })
    }

    fn remove(&self, keys: &[&str]) -> Result<(), KvError> {
        self.transaction(|current| {
            let mut changed = false;
            for key in keys {
                changed |= current.remove(*key).is_some();
            }
            changed
        })
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&Value>) -> Update,
    ) -> Result<(), KvError> {
        self.transaction(|current| {
            let update = apply(current.get(key));
            apply_update(current, key, update)
        })
    }
}

/// Exclusive lock file, removed on drop if it still carries our token.
struct LockGuard {
    lock_path: PathBuf,
    token: String,
}

impl LockGuard {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self, KvError> {
        let started = Instant::now();
        let token = format!("{} {}", std::process::id(), Uuid::new_v4().simple());
        loop {
            let file = OpenOptions::new().create_new(true).write(true).open(path);
            match file {
                Ok(mut handle) => {
                    let _ = handle.write_all(token.as_bytes());
                    return Ok(Self {
                        lock_path: path.to_path_buf(),
                        token,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path) && reclaim_stale(path) {
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(KvError::LockTimeout {
                            path: path.to_path_buf(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => return Err(KvError::Io(err)),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let ours = fs::read_to_string(&self.lock_path).is_ok_and(|held| held == self.token);
        if ours {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

/// Move a stale lock aside and delete it. Returns `true` when it was removed.
///
/// The lock is renamed to a unique name first, so only one waiter can claim
/// it. If the claimed file turns out to be fresh, another writer took the
/// lock after our staleness check and it is linked back in place.
fn reclaim_stale(path: &Path) -> bool {
    let claimed = path.with_extension(format!("lock.{}", Uuid::new_v4().simple()));
    if fs::rename(path, &claimed).is_err() {
        return false;
    }
    if is_stale(&claimed) {
        tracing::warn!(lock = %path.display(), "removing stale state lock");
        let _ = fs::remove_file(&claimed);
        return true;
    }
    if let Err(err) = fs::hard_link(&claimed, path) {
        tracing::warn!(lock = %path.display(), error = %err, "failed to restore live state lock");
    }
    let _ = fs::remove_file(&claimed);
    false
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entries(pairs: &[(&str, Value)]) -> Entries {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn increment(store: &dyn DurableStore, key: &str) {
        store
            .update(key, &mut |current| {
                let n = current.and_then(Value::as_u64).unwrap_or(0);
                Update::Put(json!(n + 1))
            })
            .unwrap();
    }

    #[test]
    fn test_memory_get_set_remove() {
        let store = MemoryStore::new();
        store
            .set(entries(&[("a", json!(1)), ("b", json!("two"))]))
            .unwrap();

        let got = store.get(&["a", "missing"]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["a"], json!(1));

        store.remove(&["a", "missing"]).unwrap();
        assert!(store.get(&["a"]).unwrap().is_empty());
        assert_eq!(store.get(&["b"]).unwrap()["b"], json!("two"));
    }

    #[test]
    fn test_memory_update_keep_and_delete() {
        let store = MemoryStore::new();
        store.update("k", &mut |_| Update::Keep).unwrap();
        assert!(store.snapshot().is_empty());

        increment(&store, "k");
        increment(&store, "k");
        assert_eq!(store.snapshot()["k"], json!(2));

        store.update("k", &mut |_| Update::Delete).unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_file_store_absent_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        assert!(store.get(&["anything"]).unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        {
            let store = FileStore::open(temp.path()).unwrap();
            store.set(entries(&[("studyOptInDate", json!("2024-03-01"))])).unwrap();
            increment(&store, "counter");
        }
        let reopened = FileStore::open(temp.path()).unwrap();
        let got = reopened.get(&["studyOptInDate", "counter"]).unwrap();
        assert_eq!(got["studyOptInDate"], json!("2024-03-01"));
        assert_eq!(got["counter"], json!(1));
        assert!(!temp.path().join(LOCK_FILENAME).exists());
    }

    #[test]
    fn test_file_store_rejects_non_object() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(STATE_FILENAME), "[1, 2, 3]").unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        assert!(matches!(
            store.get(&["x"]).unwrap_err(),
            KvError::NotAnObject(_)
        ));
    }

    #[test]
    fn test_file_store_lock_timeout() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path())
            .unwrap()
            .with_lock_timeout(Duration::from_millis(50));
        fs::write(temp.path().join(LOCK_FILENAME), "held").unwrap();

        let err = store.set(entries(&[("a", json!(1))])).unwrap_err();
        assert!(matches!(err, KvError::LockTimeout { .. }));
        // Held lock is not ours to remove.
        assert!(temp.path().join(LOCK_FILENAME).exists());
    }

    fn backdate(path: &Path) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - STALE_LOCK_AGE * 2).unwrap();
    }

    fn leftover_claims(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("study_state.lock."))
            .count()
    }

    #[test]
    fn test_file_store_reclaims_stale_lock() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        let lock = temp.path().join(LOCK_FILENAME);
        fs::write(&lock, "crashed").unwrap();
        backdate(&lock);

        store.set(entries(&[("a", json!(1))])).unwrap();
        assert_eq!(store.get(&["a"]).unwrap()["a"], json!(1));
        assert!(!lock.exists());
        assert_eq!(leftover_claims(temp.path()), 0);
    }

    #[test]
    fn test_reclaim_leaves_fresh_lock_in_place() {
        // A waiter whose staleness check predates a new writer's lock.
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join(LOCK_FILENAME);
        fs::write(&lock, "live writer").unwrap();

        assert!(!reclaim_stale(&lock));
        assert_eq!(fs::read_to_string(&lock).unwrap(), "live writer");
        assert_eq!(leftover_claims(temp.path()), 0);

        backdate(&lock);
        assert!(reclaim_stale(&lock));
        assert!(!lock.exists());
        assert!(!reclaim_stale(&lock));
    }

    #[test]
    fn test_lock_guard_keeps_foreign_lock() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join(LOCK_FILENAME);
        let guard = LockGuard::acquire(&lock, Duration::from_millis(50)).unwrap();
        fs::write(&lock, "another writer").unwrap();
        drop(guard);
        assert_eq!(fs::read_to_string(&lock).unwrap(), "another writer");

        fs::remove_file(&lock).unwrap();
        let guard = LockGuard::acquire(&lock, Duration::from_millis(50)).unwrap();
        drop(guard);
        assert!(!lock.exists());
    }

    #[test]
    fn test_file_store_concurrent_updates_are_not_lost() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(
            FileStore::open(temp.path())
                .unwrap()
                .with_lock_timeout(Duration::from_secs(10)),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        increment(store.as_ref(), "counter");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(&["counter"]).unwrap()["counter"], json!(80));
    }
}
