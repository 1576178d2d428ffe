//! Medical record model and persistence.
//!
//! Records are stored as a single JSON array in ~/.med-reminder/records.json.
//! The alarm engine only reads reminder times and writes back cached alarm
//! audio; everything else on a record is owned by the scanning/analysis side.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// One prescribed medication with optional reminder times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Medication {
    pub name: String,
    /// Transliterated name in the record's native script. Preferred when speaking.
    pub name_native: String,
    pub dosage: String,
    pub timing: String,
    pub purpose: String,
    /// Reminder times as zero-padded "HH:MM" strings, local time of day.
    pub reminders: Vec<String>,
    /// Whether this entry is on the daily schedule (pre-fetch filter only).
    pub is_active: bool,
    /// Cached alarm speech, base64-encoded 16-bit 24kHz mono PCM.
    pub alarm_audio: Option<String>,
}

/// A doctor's instruction ("drink warm water", ...) with optional reminders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Instruction {
    pub description: String,
    pub reminders: Vec<String>,
    pub alarm_audio: Option<String>,
}

/// Whether an alarm entry is a medication or an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Medication,
    Instruction,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medication => write!(f, "med"),
            Self::Instruction => write!(f, "inst"),
        }
    }
}

/// One analyzed prescription/report, as persisted by the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicalRecord {
    pub id: String,
    /// Scan timestamp, milliseconds since epoch.
    pub date: i64,
    pub patient_name: String,
    pub doctor_name: String,
    pub condition: String,
    /// Language the document was analyzed in; spoken alarms use this.
    pub analysis_language: Option<String>,
    pub medications: Vec<Medication>,
    pub instructions: Vec<Instruction>,
}

impl MedicalRecord {
    /// Cached alarm audio for an entry, if any.
    pub fn alarm_audio(&self, kind: EntryKind, index: usize) -> Option<&str> {
        match kind {
            EntryKind::Medication => self
                .medications
                .get(index)
                .and_then(|m| m.alarm_audio.as_deref()),
            EntryKind::Instruction => self
                .instructions
                .get(index)
                .and_then(|i| i.alarm_audio.as_deref()),
        }
    }

    /// Write cached alarm audio onto an entry. Returns false if the index is gone.
    pub fn set_alarm_audio(&mut self, kind: EntryKind, index: usize, audio: String) -> bool {
        match kind {
            EntryKind::Medication => match self.medications.get_mut(index) {
                Some(m) => {
                    m.alarm_audio = Some(audio);
                    true
                }
                None => false,
            },
            EntryKind::Instruction => match self.instructions.get_mut(index) {
                Some(i) => {
                    i.alarm_audio = Some(audio);
                    true
                }
                None => false,
            },
        }
    }
}

/// Record persistence, kept behind a trait so the scheduler, playback engine
/// and pre-fetcher can be driven against an in-memory store in tests.
pub trait RecordStore: Send + Sync {
    fn list_records(&self) -> Vec<MedicalRecord>;

    /// Idempotent upsert by id.
    fn save_record(&self, record: &MedicalRecord);

    fn get_record(&self, id: &str) -> Option<MedicalRecord> {
        self.list_records().into_iter().find(|r| r.id == id)
    }
}

/// JSON-file backed store under ~/.med-reminder/ (or a configured path).
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles from concurrent tasks.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: Option<&str>) -> Self {
        let path = match path {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => dirs::home_dir()
                .expect("No home directory")
                .join(".med-reminder")
                .join("records.json"),
        };
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Vec<MedicalRecord> {
        if !self.path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(records) => records,
                Err(e) => {
                    error!("Failed to parse {}: {e}", self.path.display());
                    Vec::new()
                }
            },
            Err(e) => {
                error!("Failed to read {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }

    fn persist(&self, records: &[MedicalRecord]) {
        if let Some(dir) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                error!("Failed to create record dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(records) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    error!("Failed to write {}: {e}", self.path.display());
                } else {
                    debug!("Saved {} records to {}", records.len(), self.path.display());
                }
            }
            Err(e) => error!("Failed to serialize records: {e}"),
        }
    }
}

impl RecordStore for JsonFileStore {
    fn list_records(&self) -> Vec<MedicalRecord> {
        self.load()
    }

    fn save_record(&self, record: &MedicalRecord) {
        let _guard = self.write_lock.lock().unwrap();
        let mut records = self.load();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.persist(&records);
    }
}

/// In-memory store for tests.
#[cfg(test)]
pub struct MemoryStore {
    records: Mutex<Vec<MedicalRecord>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new(records: Vec<MedicalRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[cfg(test)]
impl RecordStore for MemoryStore {
    fn list_records(&self) -> Vec<MedicalRecord> {
        self.records.lock().unwrap().clone()
    }

    fn save_record(&self, record: &MedicalRecord) {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> MedicalRecord {
        MedicalRecord {
            id: id.to_string(),
            medications: vec![Medication {
                name: "Dolo 650".into(),
                purpose: "Fever".into(),
                reminders: vec!["08:00".into()],
                ..Default::default()
            }],
            instructions: vec![Instruction {
                description: "Drink warm water".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn save_is_upsert_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let store = JsonFileStore::new(path.to_str());

        let mut r = record("1");
        store.save_record(&r);
        store.save_record(&record("2"));
        assert_eq!(store.list_records().len(), 2);

        r.condition = "Viral fever".into();
        store.save_record(&r);

        let records = store.list_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].condition, "Viral fever");
    }

    #[test]
    fn alarm_audio_write_back_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let store = JsonFileStore::new(path.to_str());

        let mut r = record("1");
        assert!(r.set_alarm_audio(EntryKind::Medication, 0, "QUJD".into()));
        assert!(!r.set_alarm_audio(EntryKind::Instruction, 5, "QUJD".into()));
        store.save_record(&r);

        let loaded = store.get_record("1").unwrap();
        assert_eq!(loaded.alarm_audio(EntryKind::Medication, 0), Some("QUJD"));
        assert_eq!(loaded.alarm_audio(EntryKind::Instruction, 0), None);
    }

    #[test]
    fn missing_file_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let store = JsonFileStore::new(path.to_str());
        assert!(store.list_records().is_empty());
    }
}
