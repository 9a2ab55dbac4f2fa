//! Persisted history of completed analyses.
//!
//! The whole history is kept as one JSON blob, newest record first:
//!
//! ```text
//! <data_dir>/
//!   tosse_history.json   # [{ "patient": {...}, "result": {...} }, ...]
//! ```
//!
//! Every mutation rewrites the full collection through a temporary sibling file which is then
//! renamed over the blob, so a reader sees either the previous or the next collection and never
//! a partial write. The in-memory collection only changes after the write succeeded.
//!
//! A blob that cannot be read or decoded is treated as an empty history. The condition is
//! logged and the next successful save overwrites it.

use crate::analysis::{AnalysisResult, ResultId};
use crate::config::CoreConfig;
use crate::patient::PatientData;
use crate::{TriageError, TriageResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One patient paired with one completed analysis.
///
/// Identity is the result identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub patient: PatientData,
    pub result: AnalysisResult,
}

impl HistoryRecord {
    pub fn new(patient: PatientData, result: AnalysisResult) -> Self {
        Self { patient, result }
    }

    pub fn id(&self) -> &ResultId {
        self.result.id()
    }
}

/// Serializes a history collection to the persisted text format.
///
/// # Errors
///
/// Returns `TriageError::Serialization` if encoding fails.
pub fn encode_history(records: &[HistoryRecord]) -> TriageResult<String> {
    serde_json::to_string_pretty(records).map_err(TriageError::Serialization)
}

/// Parses a history collection from the persisted text format.
///
/// Unknown fields are ignored. Missing required fields fail the whole collection.
///
/// # Errors
///
/// Returns `TriageError::Deserialization` if the text is not a valid history.
pub fn decode_history(raw: &str) -> TriageResult<Vec<HistoryRecord>> {
    serde_json::from_str(raw).map_err(TriageError::Deserialization)
}

/// Owner of the persisted history collection.
///
/// Assumes a single writer; callers sharing a store across tasks must serialise access.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    records: Vec<HistoryRecord>,
    max_records: Option<usize>,
}

impl ResultStore {
    /// Opens the store described by `cfg`, loading any existing history.
    pub fn open(cfg: &CoreConfig) -> Self {
        Self::open_at(cfg.history_path(), cfg.max_history())
    }

    /// Opens a store backed by the blob at `path`.
    ///
    /// Never fails: a missing blob yields an empty history, and an unreadable or corrupt one
    /// yields an empty history plus a warning.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the history blob
    /// * `max_records` - Optional cap; the oldest records beyond it are evicted on insert
    pub fn open_at(path: PathBuf, max_records: Option<usize>) -> Self {
        let records = Self::load(&path);
        tracing::debug!(
            "loaded {} history records from {}",
            records.len(),
            path.display()
        );
        Self {
            path,
            records,
            max_records,
        }
    }

    fn load(path: &Path) -> Vec<HistoryRecord> {
        if !path.exists() {
            return Vec::new();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(
                    "failed to read history, starting empty: {} - {}",
                    path.display(),
                    e
                );
                return Vec::new();
            }
        };

        match decode_history(&contents) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    "failed to parse history, starting empty: {} - {}",
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, newest first.
    pub fn list(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn get(&self, id: &ResultId) -> Option<&HistoryRecord> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Saves a record.
    ///
    /// A record whose identifier already exists replaces the existing one in place. Otherwise
    /// it is inserted at the front, and the oldest records beyond the cap are evicted.
    ///
    /// # Errors
    ///
    /// Returns `TriageError` if the collection cannot be serialised or written. The in-memory
    /// collection is left unchanged in that case.
    pub fn save(&mut self, record: HistoryRecord) -> TriageResult<()> {
        let mut updated = self.records.clone();
        let id = record.id().clone();

        match updated.iter().position(|r| r.id() == &id) {
            Some(index) => {
                if let Some(slot) = updated.get_mut(index) {
                    *slot = record;
                }
                self.persist(&updated)?;
                tracing::info!(%id, "replaced history record");
            }
            None => {
                updated.insert(0, record);
                let evicted = match self.max_records {
                    Some(max) if updated.len() > max => {
                        let evicted = updated.len() - max;
                        updated.truncate(max);
                        evicted
                    }
                    _ => 0,
                };
                self.persist(&updated)?;
                tracing::info!(%id, evicted, "saved history record");
            }
        }

        self.records = updated;
        Ok(())
    }

    /// Replaces the existing record that has the same identifier.
    ///
    /// Unlike [`ResultStore::save`], this never inserts.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::RecordNotFound` if no record has that identifier, for example
    /// because it was deleted meanwhile. Returns another `TriageError` if the write fails.
    pub fn replace(&mut self, record: HistoryRecord) -> TriageResult<()> {
        if self.get(record.id()).is_none() {
            return Err(TriageError::RecordNotFound(record.id().to_string()));
        }
        self.save(record)
    }

    /// Removes the record with `id`.
    ///
    /// Returns whether a record was removed; an unknown identifier is not an error and leaves
    /// the blob untouched.
    ///
    /// # Errors
    ///
    /// Returns `TriageError` if the updated collection cannot be written.
    pub fn delete(&mut self, id: &ResultId) -> TriageResult<bool> {
        if self.get(id).is_none() {
            return Ok(false);
        }

        let updated: Vec<HistoryRecord> = self
            .records
            .iter()
            .filter(|r| r.id() != id)
            .cloned()
            .collect();
        self.persist(&updated)?;
        self.records = updated;

        tracing::info!(%id, "deleted history record");
        Ok(true)
    }

    fn persist(&self, records: &[HistoryRecord]) -> TriageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(TriageError::StorageDirCreation)?;
            }
        }

        let raw = encode_history(records)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, raw).map_err(TriageError::FileWrite)?;
        fs::rename(&temp_path, &self.path).map_err(TriageError::FileWrite)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DiagnosisProbabilities;
    use crate::patient::PatientDraft;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn patient(name: &str) -> PatientData {
        PatientDraft {
            name: name.into(),
            birth_date: "1975-11-02".into(),
            address: "Avenida da Liberdade 100, Lisboa".into(),
            phone: "213 000 000".into(),
            consent: true,
        }
        .validate()
        .unwrap()
    }

    fn record(id: &str, name: &str, pneumonia: f64) -> HistoryRecord {
        let ts = DateTime::parse_from_rfc3339("2025-05-06T08:09:10.250Z")
            .unwrap()
            .with_timezone(&Utc);
        let probabilities = DiagnosisProbabilities::new(pneumonia, 10.0, 10.0, 5.0).unwrap();
        HistoryRecord::new(
            patient(name),
            AnalysisResult::at(ResultId::parse(id).unwrap(), ts, probabilities, 2.5),
        )
    }

    fn ids(store: &ResultStore) -> Vec<&str> {
        store.list().iter().map(|r| r.id().as_str()).collect()
    }

    fn open(temp_dir: &TempDir) -> ResultStore {
        ResultStore::open_at(temp_dir.path().join("tosse_history.json"), None)
    }

    #[test]
    fn test_open_without_blob_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = open(&temp_dir);
        assert!(store.is_empty());
        assert!(!store.path().exists(), "opening should not create the blob");
    }

    #[test]
    fn test_save_inserts_newest_first_and_persists() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open(&temp_dir);

        store.save(record("TOSSE-0000001", "Ana", 10.0)).unwrap();
        store.save(record("TOSSE-0000002", "Bruno", 20.0)).unwrap();
        store.save(record("TOSSE-0000003", "Carla", 30.0)).unwrap();
        assert_eq!(ids(&store), vec!["TOSSE-0000003", "TOSSE-0000002", "TOSSE-0000001"]);

        let reopened = open(&temp_dir);
        assert_eq!(reopened.list(), store.list());
        assert!(
            !temp_dir.path().join("tosse_history.json.tmp").exists(),
            "temporary file should be renamed away"
        );
    }

    #[test]
    fn test_save_with_existing_id_replaces_in_place() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open(&temp_dir);

        store.save(record("TOSSE-0000001", "Ana", 10.0)).unwrap();
        store.save(record("TOSSE-0000002", "Bruno", 20.0)).unwrap();
        store.save(record("TOSSE-0000003", "Carla", 30.0)).unwrap();

        store.save(record("TOSSE-0000002", "Beatriz", 70.0)).unwrap();

        assert_eq!(store.len(), 3, "replacement must not duplicate");
        assert_eq!(ids(&store), vec!["TOSSE-0000003", "TOSSE-0000002", "TOSSE-0000001"]);
        let replaced = store
            .get(&ResultId::parse("TOSSE-0000002").unwrap())
            .unwrap();
        assert_eq!(replaced.patient.name.as_str(), "Beatriz");
        assert_eq!(replaced.result.probabilities().pneumonia, 70.0);

        assert_eq!(open(&temp_dir).list(), store.list());
    }

    #[test]
    fn test_replace_requires_existing_record() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open(&temp_dir);
        store.save(record("TOSSE-0000001", "Ana", 10.0)).unwrap();
        store.save(record("TOSSE-0000002", "Bruno", 20.0)).unwrap();

        store.replace(record("TOSSE-0000001", "Ana Maria", 60.0)).unwrap();
        assert_eq!(ids(&store), vec!["TOSSE-0000002", "TOSSE-0000001"]);

        store
            .delete(&ResultId::parse("TOSSE-0000001").unwrap())
            .unwrap();
        let err = store
            .replace(record("TOSSE-0000001", "Ana Maria", 70.0))
            .expect_err("replacing a deleted record must fail");
        assert!(matches!(err, TriageError::RecordNotFound(ref id) if id == "TOSSE-0000001"));
        assert_eq!(ids(&store), vec!["TOSSE-0000002"]);
        assert_eq!(open(&temp_dir).list(), store.list());
    }

    #[test]
    fn test_failed_write_leaves_collection_unchanged() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("blocked");
        fs::create_dir(&path).unwrap();
        let mut store = ResultStore::open_at(path, None);

        let err = store
            .save(record("TOSSE-0000001", "Ana", 10.0))
            .expect_err("renaming over a directory must fail");
        assert!(matches!(err, TriageError::FileWrite(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_removes_only_matching_record() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open(&temp_dir);
        for (i, name) in ["Ana", "Bruno", "Carla", "Duarte"].iter().enumerate() {
            store
                .save(record(&format!("TOSSE-000000{}", i + 1), name, 10.0))
                .unwrap();
        }

        let removed = store
            .delete(&ResultId::parse("TOSSE-0000003").unwrap())
            .unwrap();
        assert!(removed);
        assert_eq!(ids(&store), vec!["TOSSE-0000004", "TOSSE-0000002", "TOSSE-0000001"]);
        assert_eq!(open(&temp_dir).list(), store.list());
    }

    #[test]
    fn test_delete_unknown_id_is_not_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut store = open(&temp_dir);
        store.save(record("TOSSE-0000001", "Ana", 10.0)).unwrap();

        let removed = store
            .delete(&ResultId::parse("TOSSE-MISSING").unwrap())
            .unwrap();
        assert!(!removed);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_corrupt_blob_loads_as_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tosse_history.json");
        fs::write(&path, "{ not json [[[").unwrap();

        let mut store = ResultStore::open_at(path.clone(), None);
        assert!(store.is_empty());

        store.save(record("TOSSE-0000001", "Ana", 10.0)).unwrap();
        assert_eq!(ResultStore::open_at(path, None).len(), 1);
    }

    #[test]
    fn test_blob_with_missing_fields_loads_as_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tosse_history.json");
        fs::write(&path, r#"[{"patient": {"name": "Ana"}}]"#).unwrap();

        assert!(ResultStore::open_at(path, None).is_empty());
    }

    #[test]
    fn test_unknown_fields_and_legacy_labels_are_tolerated() {
        let raw = r#"[{
            "patient": {
                "name": "Ana Costa",
                "birthDate": "1988-03-14",
                "address": "Rua das Flores 12",
                "consent": true,
                "nickname": "Aninhas"
            },
            "result": {
                "id": "TOSSE-LEGACY1",
                "timestamp": 1735732800000,
                "probabilities": {"pneumonia": 82, "bronchite": 12, "asma": 4, "normal": 2},
                "riskLevel": "Elevado",
                "audioDuration": 3.2,
                "clinicalNote": "Nota antiga",
                "device": "phone"
            }
        }]"#;

        let records = decode_history(raw).expect("legacy blob should decode");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.patient.phone, None);
        assert_eq!(record.result.risk_level(), crate::RiskLevel::High);
        assert_eq!(record.result.clinical_note(), "Nota antiga");
        assert_eq!(record.result.timestamp().timestamp_millis(), 1735732800000);
    }

    #[test]
    fn test_encode_decode_preserves_every_field() {
        let mut records = vec![
            record("TOSSE-0000001", "Ana", 82.0),
            record("TOSSE-0000002", "Bruno", 5.0),
        ];
        records[1].patient.phone = None;

        let raw = encode_history(&records).unwrap();
        for field in [
            "\"birthDate\"",
            "\"bronchite\"",
            "\"asma\"",
            "\"riskLevel\"",
            "\"audioDuration\"",
            "\"clinicalNote\"",
        ] {
            assert!(raw.contains(field), "missing {} in {}", field, raw);
        }

        let decoded = decode_history(&raw).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_cap_evicts_oldest_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut store =
            ResultStore::open_at(temp_dir.path().join("tosse_history.json"), Some(2));

        store.save(record("TOSSE-0000001", "Ana", 10.0)).unwrap();
        store.save(record("TOSSE-0000002", "Bruno", 10.0)).unwrap();
        store.save(record("TOSSE-0000003", "Carla", 10.0)).unwrap();
        assert_eq!(ids(&store), vec!["TOSSE-0000003", "TOSSE-0000002"]);

        // Replacing at the cap evicts nothing.
        store.save(record("TOSSE-0000002", "Bruno", 60.0)).unwrap();
        assert_eq!(ids(&store), vec!["TOSSE-0000003", "TOSSE-0000002"]);
    }

    #[test]
    fn test_open_uses_config_location() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = CoreConfig::with_data_dir(temp_dir.path().join("nested"));
        let mut store = ResultStore::open(&cfg);
        store.save(record("TOSSE-0000001", "Ana", 10.0)).unwrap();
        assert!(cfg.history_path().is_file(), "save should create the data dir");
    }
}
