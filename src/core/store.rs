//! Repository state store
//!
//! The authoritative record of every managed base: its current package, its
//! build status and the artifact files published for it. Each base is kept
//! in its own JSON file under the state directory, so a failed write can
//! only ever affect that one base.
//!
//! Writes for one base are serialized by a per-base writer lock and are
//! durable before [`RepositoryStore::upsert`] returns. Readers take a
//! snapshot of the in-memory map, which is swapped per record only after the
//! record reached disk. Other processes may commit to the same directory;
//! [`RepositoryStore::refresh`] folds their records back in.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::core::package::{validate_base, Package};
use crate::core::status::{BuildStatus, BuildStatusKind, FailureKind, FailureReason};
use crate::infra::filesystem;
use crate::error::StoreError;

/// Current on-disk record schema
pub const SCHEMA_VERSION: u32 = 1;

const RECORD_EXTENSION: &str = "json";

/// State of one base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Current package
    pub package: Package,
    /// Last build status
    pub status: BuildStatus,
    /// Published artifact file names
    #[serde(default)]
    pub artifacts: BTreeSet<String>,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    schema_version: u32,
    base: String,
    #[serde(flatten)]
    record: PackageRecord,
}

/// Read contract for one base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    /// Base name
    pub base: String,
    /// Current version
    pub version: String,
    /// Build state
    pub status: BuildStatusKind,
    /// Unix timestamp of the last status change
    pub last_build_timestamp: u64,
    /// Path of the last build log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_reference: Option<String>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Consistent point-in-time view of the repository
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositorySnapshot {
    records: BTreeMap<String, PackageRecord>,
}

impl RepositorySnapshot {
    /// Build a snapshot from records
    pub fn new(records: BTreeMap<String, PackageRecord>) -> Self {
        Self { records }
    }

    /// Record of one base
    pub fn get(&self, base: &str) -> Option<&PackageRecord> {
        self.records.get(base)
    }

    /// All records in base order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PackageRecord)> {
        self.records.iter().map(|(base, record)| (base.as_str(), record))
    }

    /// All base names
    pub fn bases(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Number of bases
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the repository is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Published artifact file names with their base
    pub fn artifacts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records.iter().flat_map(|(base, record)| {
            record
                .artifacts
                .iter()
                .map(move |file| (base.as_str(), file.as_str()))
        })
    }

    /// Number of bases per status
    pub fn counts(&self) -> BTreeMap<BuildStatusKind, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values() {
            *counts.entry(record.status.status).or_default() += 1;
        }
        counts
    }

    /// Read contract of one base
    pub fn status_view(&self, base: &str) -> Option<StatusView> {
        self.records.get(base).map(|record| view(base, record))
    }

    /// Read contract of every base
    pub fn status_views(&self) -> Vec<StatusView> {
        self.records
            .iter()
            .map(|(base, record)| view(base, record))
            .collect()
    }
}

fn record_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| io_error(dir, &e))?;
    for entry in entries {
        let path = entry.map_err(|e| io_error(dir, &e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION) && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_records(dir: &Path) -> Result<BTreeMap<String, PackageRecord>, StoreError> {
    let mut records = BTreeMap::new();
    for path in record_files(dir)? {
        let (base, record) = read_record(&path)?;
        records.insert(base, record);
    }
    Ok(records)
}

fn view(base: &str, record: &PackageRecord) -> StatusView {
    StatusView {
        base: base.to_string(),
        version: record.package.version.to_string(),
        status: record.status.status,
        last_build_timestamp: record.status.timestamp,
        log_reference: record.status.log_reference.clone(),
        reason: record.status.reason.as_ref().map(ToString::to_string),
    }
}

/// Persistent per-base repository state
#[derive(Debug)]
pub struct RepositoryStore {
    dir: PathBuf,
    records: RwLock<BTreeMap<String, PackageRecord>>,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // bases whose last write failed, so memory is ahead of disk
    unpersisted: Mutex<BTreeSet<String>>,
}

impl RepositoryStore {
    /// Load every record from `dir`
    ///
    /// Records left pending or building by a previous process are rewritten
    /// as failed. A record that cannot be decoded fails the whole load.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::open_with(dir, |_| false)
    }

    /// Load every record from `dir`, leaving bases `in_progress` reports untouched
    ///
    /// Used to skip recovery of bases another live process is building.
    pub fn open_with<F>(dir: &Path, in_progress: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> bool,
    {
        filesystem::create_dir_all(dir).map_err(|e| io_error(dir, &e))?;
        let records = read_records(dir)?;

        let store = Self {
            dir: dir.to_path_buf(),
            records: RwLock::new(BTreeMap::new()),
            writers: Mutex::new(HashMap::new()),
            unpersisted: Mutex::new(BTreeSet::new()),
        };

        for (base, mut record) in records {
            if matches!(
                record.status.status,
                BuildStatusKind::Pending | BuildStatusKind::Building
            ) && !in_progress(&base)
            {
                tracing::warn!("Recovering interrupted build state for '{}'", base);
                let log = record.status.log_reference.take();
                record.status = BuildStatus::failed(FailureReason::new(
                    FailureKind::Cancelled,
                    "interrupted",
                ))
                .with_log(log);
                store.write_record(&base, &record)?;
            }
            store.records.write().insert(base, record);
        }

        tracing::debug!("Loaded {} records from {}", store.len(), dir.display());
        Ok(store)
    }

    /// Read a snapshot of `dir` without taking ownership of the store
    ///
    /// Nothing is recovered or written; a missing directory is empty.
    pub fn read_snapshot(dir: &Path) -> Result<RepositorySnapshot, StoreError> {
        if !dir.is_dir() {
            return Ok(RepositorySnapshot::default());
        }
        read_records(dir).map(RepositorySnapshot::new)
    }

    /// State directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store has no records
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Record of one base
    pub fn get(&self, base: &str) -> Option<PackageRecord> {
        self.records.read().get(base).cloned()
    }

    /// Consistent copy of every record
    pub fn snapshot(&self) -> RepositorySnapshot {
        RepositorySnapshot::new(self.records.read().clone())
    }

    /// Reload every record from disk
    ///
    /// Picks up bases committed or removed by other processes since the
    /// store was opened. A base whose last write failed keeps its in-memory
    /// state.
    pub fn refresh(&self) -> Result<(), StoreError> {
        let mut bases: BTreeSet<String> = self.records.read().keys().cloned().collect();
        for path in record_files(&self.dir)? {
            if let Some(base) = path.file_stem().and_then(|stem| stem.to_str()) {
                bases.insert(base.to_string());
            }
        }
        for base in &bases {
            self.reload(base)?;
        }
        tracing::debug!("Refreshed {} records from {}", self.len(), self.dir.display());
        Ok(())
    }

    /// Reload one base from disk and return its current record
    pub fn reload(&self, base: &str) -> Result<Option<PackageRecord>, StoreError> {
        let writer = self.writer(base);
        let _guard = writer.lock();
        self.load(base)
    }

    /// Write the full state of one base
    ///
    /// Returns once the record is on disk. If the write fails, the base is
    /// marked failed in memory with a storage reason and the previous record
    /// stays on disk untouched.
    pub fn upsert(
        &self,
        base: &str,
        package: Package,
        status: BuildStatus,
        artifacts: BTreeSet<String>,
    ) -> Result<(), StoreError> {
        validate(base, &package)?;
        let writer = self.writer(base);
        let _guard = writer.lock();
        self.commit(base, package, status, artifacts)
    }

    /// Change the status of a base, keeping its published artifacts
    ///
    /// The current record is re-read from disk first, so artifacts committed
    /// by another process are kept too.
    pub fn set_status(&self, package: &Package, status: BuildStatus) -> Result<(), StoreError> {
        let base = package.base.as_str();
        validate(base, package)?;
        let writer = self.writer(base);
        let _guard = writer.lock();
        let artifacts = self
            .load(base)?
            .map(|record| record.artifacts)
            .unwrap_or_default();
        self.commit(base, package.clone(), status, artifacts)
    }

    // callers hold the writer lock of `base`
    fn load(&self, base: &str) -> Result<Option<PackageRecord>, StoreError> {
        if self.unpersisted.lock().contains(base) {
            return Ok(self.get(base));
        }
        let path = self.record_path(base);
        let record = if path.is_file() {
            Some(read_record(&path)?.1)
        } else {
            None
        };

        let mut records = self.records.write();
        match &record {
            Some(record) => {
                records.insert(base.to_string(), record.clone());
            }
            None => {
                records.remove(base);
            }
        }
        Ok(record)
    }

    // callers hold the writer lock of `base`
    fn commit(
        &self,
        base: &str,
        package: Package,
        status: BuildStatus,
        artifacts: BTreeSet<String>,
    ) -> Result<(), StoreError> {
        if let Some(current) = self.records.read().get(base) {
            let from = current.status.status;
            if !from.can_transition_to(status.status) {
                return Err(StoreError::InvalidTransition {
                    base: base.to_string(),
                    from: from.to_string(),
                    to: status.status.to_string(),
                });
            }
        }

        let record = PackageRecord {
            package,
            status,
            artifacts,
        };
        if let Err(e) = self.write_record(base, &record) {
            tracing::error!("Failed to persist state for '{}': {}", base, e);
            self.unpersisted.lock().insert(base.to_string());
            let failed = BuildStatus::failed(FailureReason::new(FailureKind::Storage, e.to_string()));
            let mut records = self.records.write();
            match records.get_mut(base) {
                Some(current) => current.status = failed,
                None => {
                    records.insert(
                        base.to_string(),
                        PackageRecord {
                            package: record.package,
                            status: failed,
                            artifacts: BTreeSet::new(),
                        },
                    );
                }
            }
            return Err(e);
        }

        self.unpersisted.lock().remove(base);
        self.records.write().insert(base.to_string(), record);
        Ok(())
    }

    /// Delete the record of a base
    pub fn remove(&self, base: &str) -> Result<PackageRecord, StoreError> {
        let writer = self.writer(base);
        let _guard = writer.lock();

        let record = self.get(base).ok_or_else(|| StoreError::NotFound {
            base: base.to_string(),
        })?;
        let path = self.record_path(base);
        filesystem::remove_file(&path).map_err(|e| io_error(&path, &e))?;
        self.records.write().remove(base);
        self.unpersisted.lock().remove(base);
        self.writers.lock().remove(base);
        self.flush()?;
        Ok(record)
    }

    /// Flush the state directory
    pub fn flush(&self) -> Result<(), StoreError> {
        let dir = fs::File::open(&self.dir).map_err(|e| io_error(&self.dir, &e))?;
        dir.sync_all().map_err(|e| io_error(&self.dir, &e))
    }

    fn writer(&self, base: &str) -> Arc<Mutex<()>> {
        self.writers
            .lock()
            .entry(base.to_string())
            .or_default()
            .clone()
    }

    fn record_path(&self, base: &str) -> PathBuf {
        self.dir.join(format!("{base}.{RECORD_EXTENSION}"))
    }

    fn write_record(&self, base: &str, record: &PackageRecord) -> Result<(), StoreError> {
        let path = self.record_path(base);
        let stored = StoredRecord {
            schema_version: SCHEMA_VERSION,
            base: base.to_string(),
            record: record.clone(),
        };
        let content = serde_json::to_vec_pretty(&stored).map_err(|e| StoreError::Io {
            path: path.clone(),
            error: e.to_string(),
        })?;
        filesystem::atomic_write(&path, &content).map_err(|e| io_error(&path, &e))
    }
}

fn validate(base: &str, package: &Package) -> Result<(), StoreError> {
    validate_base(base).map_err(|_| StoreError::InvalidBase {
        base: base.to_string(),
    })?;
    if package.base != base {
        return Err(StoreError::BaseMismatch {
            base: base.to_string(),
            package_base: package.base.clone(),
        });
    }
    Ok(())
}

fn read_record(path: &Path) -> Result<(String, PackageRecord), StoreError> {
    let content = fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| corrupted(path, e))?;

    let version = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| StoreError::Corrupted {
            path: path.to_path_buf(),
            error: "missing schema_version".to_string(),
        })?;
    let version = u32::try_from(version).unwrap_or(u32::MAX);
    if version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            path: path.to_path_buf(),
            version,
        });
    }

    let stored: StoredRecord = serde_json::from_value(value).map_err(|e| corrupted(path, e))?;
    let stem = path.file_stem().and_then(|stem| stem.to_str());
    if stem != Some(stored.base.as_str()) || stored.record.package.base != stored.base {
        return Err(StoreError::Corrupted {
            path: path.to_path_buf(),
            error: format!("record does not belong to base '{}'", stored.base),
        });
    }
    Ok((stored.base, stored.record))
}

fn io_error(path: &Path, error: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

fn corrupted(path: &Path, error: serde_json::Error) -> StoreError {
    StoreError::Corrupted {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::version::PackageVersion;
    use crate::test_utils::generators::package_name;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn pkg(base: &str, version: &str) -> Package {
        Package::new(base, PackageVersion::parse(version).unwrap())
    }

    fn artifacts(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_upsert_then_get() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();

        let files = artifacts(&["foo-1.0-1-x86_64.pkg.tar.zst"]);
        store
            .upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), files.clone())
            .unwrap();

        let record = store.get("foo").unwrap();
        assert_eq!(record.package.version.to_string(), "1.0-1");
        assert_eq!(record.status.status, BuildStatusKind::Success);
        assert_eq!(record.artifacts, files);
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = RepositoryStore::open(temp.path()).unwrap();
            store
                .upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), BTreeSet::new())
                .unwrap();
            store
                .upsert("bar", pkg("bar", "2.0-1"), BuildStatus::unknown(), BTreeSet::new())
                .unwrap();
        }

        let store = RepositoryStore::open(temp.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("foo").unwrap().status.status, BuildStatusKind::Success);
    }

    #[test]
    fn test_building_cannot_return_to_pending() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();
        let package = pkg("foo", "1.0-1");
        store.set_status(&package, BuildStatus::pending()).unwrap();
        store.set_status(&package, BuildStatus::building()).unwrap();

        let result = store.set_status(&package, BuildStatus::pending());
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
        assert_eq!(store.get("foo").unwrap().status.status, BuildStatusKind::Building);
    }

    #[test]
    fn test_interrupted_builds_recovered_as_failed() {
        let temp = TempDir::new().unwrap();
        {
            let store = RepositoryStore::open(temp.path()).unwrap();
            let package = pkg("foo", "1.0-1");
            store.set_status(&package, BuildStatus::pending()).unwrap();
            store.set_status(&package, BuildStatus::building()).unwrap();
        }

        let store = RepositoryStore::open(temp.path()).unwrap();
        let status = store.get("foo").unwrap().status;
        assert_eq!(status.status, BuildStatusKind::Failed);
        assert_eq!(status.reason.unwrap().kind, FailureKind::Cancelled);

        let reopened = RepositoryStore::open(temp.path()).unwrap();
        assert_eq!(reopened.get("foo").unwrap().status.status, BuildStatusKind::Failed);
    }

    #[test]
    fn test_builds_in_progress_elsewhere_not_recovered() {
        let temp = TempDir::new().unwrap();
        {
            let store = RepositoryStore::open(temp.path()).unwrap();
            store.set_status(&pkg("foo", "1.0-1"), BuildStatus::building()).unwrap();
            store.set_status(&pkg("bar", "1.0-1"), BuildStatus::building()).unwrap();
        }

        let store = RepositoryStore::open_with(temp.path(), |base| base == "foo").unwrap();
        assert_eq!(store.get("foo").unwrap().status.status, BuildStatusKind::Building);
        assert_eq!(store.get("bar").unwrap().status.status, BuildStatusKind::Failed);
    }

    #[test]
    fn test_read_snapshot_is_read_only() {
        let temp = TempDir::new().unwrap();
        assert!(RepositoryStore::read_snapshot(&temp.path().join("none")).unwrap().is_empty());

        {
            let store = RepositoryStore::open(temp.path()).unwrap();
            store.set_status(&pkg("foo", "1.0-1"), BuildStatus::building()).unwrap();
        }
        let snapshot = RepositoryStore::read_snapshot(temp.path()).unwrap();
        assert_eq!(snapshot.get("foo").unwrap().status.status, BuildStatusKind::Building);
        let again = RepositoryStore::read_snapshot(temp.path()).unwrap();
        assert_eq!(again, snapshot);
    }

    #[test]
    fn test_set_status_keeps_artifacts() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();
        let files = artifacts(&["foo-1.0-1-any.pkg.tar.zst"]);
        store
            .upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), files.clone())
            .unwrap();
        store
            .set_status(&pkg("foo", "1.1-1"), BuildStatus::pending())
            .unwrap();
        let record = store.get("foo").unwrap();
        assert_eq!(record.artifacts, files);
        assert_eq!(record.package.version.to_string(), "1.1-1");
    }

    #[test]
    fn test_rejects_invalid_and_mismatched_bases() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();
        let result = store.upsert(
            "../escape",
            pkg("../escape", "1.0-1"),
            BuildStatus::unknown(),
            BTreeSet::new(),
        );
        assert!(matches!(result, Err(StoreError::InvalidBase { .. })));

        let result = store.upsert("foo", pkg("bar", "1.0-1"), BuildStatus::unknown(), BTreeSet::new());
        assert!(matches!(result, Err(StoreError::BaseMismatch { .. })));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();
        store
            .upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), BTreeSet::new())
            .unwrap();
        store.remove("foo").unwrap();
        assert!(store.get("foo").is_none());
        assert!(!temp.path().join("foo.json").exists());
        assert!(matches!(store.remove("foo"), Err(StoreError::NotFound { .. })));
        assert!(RepositoryStore::open(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_refresh_sees_other_writers() {
        let temp = TempDir::new().unwrap();
        let first = RepositoryStore::open(temp.path()).unwrap();
        let second = RepositoryStore::open(temp.path()).unwrap();

        first
            .upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), artifacts(&["foo-1.0-1-any.pkg.tar.zst"]))
            .unwrap();
        second
            .upsert("bar", pkg("bar", "1.0-1"), BuildStatus::success(), BTreeSet::new())
            .unwrap();
        assert!(second.get("foo").is_none());

        second.refresh().unwrap();
        let snapshot = second.snapshot();
        assert_eq!(snapshot.bases().collect::<Vec<_>>(), vec!["bar", "foo"]);
        assert_eq!(snapshot.artifacts().count(), 1);

        first.refresh().unwrap();
        first.remove("bar").unwrap();
        second.refresh().unwrap();
        assert!(second.get("bar").is_none());
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_reload_returns_committed_record() {
        let temp = TempDir::new().unwrap();
        let first = RepositoryStore::open(temp.path()).unwrap();
        let second = RepositoryStore::open(temp.path()).unwrap();
        first
            .upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), BTreeSet::new())
            .unwrap();
        first
            .upsert("foo", pkg("foo", "1.1-1"), BuildStatus::success(), artifacts(&["foo-1.1-1-any.pkg.tar.zst"]))
            .unwrap();

        let record = second.reload("foo").unwrap().unwrap();
        assert_eq!(record.package.version.to_string(), "1.1-1");
        assert_eq!(second.get("foo").unwrap(), record);
        assert!(second.reload("bar").unwrap().is_none());
    }

    #[test]
    fn test_refresh_keeps_unpersisted_failure() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();
        fs::create_dir(temp.path().join("foo.json")).unwrap();
        assert!(store
            .upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), BTreeSet::new())
            .is_err());

        store.refresh().unwrap();
        let status = store.get("foo").unwrap().status;
        assert_eq!(status.reason.unwrap().kind, FailureKind::Storage);
    }

    #[test]
    fn test_corrupted_record_fails_load() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("foo.json"), "{not json").unwrap();
        assert!(matches!(
            RepositoryStore::open(temp.path()),
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_newer_schema_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("foo.json"),
            r#"{"schema_version": 99, "base": "foo"}"#,
        )
        .unwrap();
        assert!(matches!(
            RepositoryStore::open(temp.path()),
            Err(StoreError::UnsupportedSchema { version: 99, .. })
        ));
    }

    #[test]
    fn test_write_failure_marks_base_failed_and_spares_others() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();
        store
            .upsert("bar", pkg("bar", "1.0-1"), BuildStatus::success(), BTreeSet::new())
            .unwrap();

        // a directory where the record file should be makes the rename fail
        fs::create_dir(temp.path().join("foo.json")).unwrap();
        let result = store.upsert("foo", pkg("foo", "1.0-1"), BuildStatus::success(), BTreeSet::new());
        assert!(matches!(result, Err(StoreError::Io { .. })));

        let failed = store.get("foo").unwrap().status;
        assert_eq!(failed.reason.unwrap().kind, FailureKind::Storage);
        assert_eq!(store.get("bar").unwrap().status.status, BuildStatusKind::Success);
    }

    #[test]
    fn test_snapshot_views() {
        let temp = TempDir::new().unwrap();
        let store = RepositoryStore::open(temp.path()).unwrap();
        store
            .upsert(
                "foo",
                pkg("foo", "1:1.0-1"),
                BuildStatus::success().with_log(Some("logs/foo/x.log".into())),
                artifacts(&["foo-1:1.0-1-any.pkg.tar.zst"]),
            )
            .unwrap();

        let snapshot = store.snapshot();
        let view = snapshot.status_view("foo").unwrap();
        assert_eq!(view.version, "1:1.0-1");
        assert_eq!(view.log_reference.as_deref(), Some("logs/foo/x.log"));
        assert_eq!(snapshot.artifacts().count(), 1);
        assert_eq!(snapshot.counts()[&BuildStatusKind::Success], 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_upsert_get_returns_written_pair(
            names in proptest::collection::btree_set(package_name(), 1..8)
        ) {
            let temp = TempDir::new().unwrap();
            let store = RepositoryStore::open(temp.path()).unwrap();
            for name in &names {
                store.upsert(name, pkg(name, "1.0-1"), BuildStatus::success(), BTreeSet::new()).unwrap();
            }
            let reopened = RepositoryStore::open(temp.path()).unwrap();
            for name in &names {
                let record = reopened.get(name).unwrap();
                prop_assert_eq!(&record.package, &pkg(name, "1.0-1"));
                prop_assert_eq!(record.status.status, BuildStatusKind::Success);
            }
        }
    }
}
