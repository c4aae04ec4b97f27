// The diary: a record of what every context resolved to.
//
// Keys are context id strings (`ModalContext0@3.1`). The engine treats the
// diary as an opaque store with put, get and query-by-kind; the tree walker
// writes one record per resolved node and, when replaying, reuses a stored
// output instead of resolving the context again. `JsonDiary` persists the
// records as one JSON document.

use crate::context::ContextKind;
use crate::entry::Output;
use crate::error::DiaryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryRecord {
    pub context: String,
    pub entry: String,
    pub output: Output,
}

pub trait Diary {
    /// Store a record, replacing any earlier record for the same context.
    fn put(&mut self, record: DiaryRecord);

    fn get(&self, context: &str) -> Option<&DiaryRecord>;

    /// Every record whose context is of `kind`, in key order.
    fn query(&self, kind: ContextKind) -> Vec<&DiaryRecord>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDiary {
    records: BTreeMap<String, DiaryRecord>,
}

impl MemoryDiary {
    pub fn new() -> Self {
        MemoryDiary::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take over every record of `other`; its records win on conflicts.
    pub fn merge(&mut self, other: MemoryDiary) {
        self.records.extend(other.records);
    }
}

impl Diary for MemoryDiary {
    fn put(&mut self, record: DiaryRecord) {
        self.records.insert(record.context.clone(), record);
    }

    fn get(&self, context: &str) -> Option<&DiaryRecord> {
        self.records.get(context)
    }

    fn query(&self, kind: ContextKind) -> Vec<&DiaryRecord> {
        let prefix = format!("{kind}@");
        self.records
            .values()
            .filter(|r| r.context.starts_with(&prefix))
            .collect()
    }
}

/// A `MemoryDiary` backed by a JSON file.
#[derive(Debug)]
pub struct JsonDiary {
    path: PathBuf,
    memory: MemoryDiary,
}

impl JsonDiary {
    /// Open the diary at `path`; a missing file starts an empty diary.
    pub fn load(path: &Path) -> Result<Self, DiaryError> {
        let memory = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            MemoryDiary::new()
        };
        Ok(JsonDiary {
            path: path.to_path_buf(),
            memory,
        })
    }

    pub fn save(&self) -> Result<(), DiaryError> {
        let json = serde_json::to_string_pretty(&self.memory)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn memory(&self) -> &MemoryDiary {
        &self.memory
    }

    pub fn merge(&mut self, other: MemoryDiary) {
        self.memory.merge(other);
    }
}

impl Diary for JsonDiary {
    fn put(&mut self, record: DiaryRecord) {
        self.memory.put(record);
    }

    fn get(&self, context: &str) -> Option<&DiaryRecord> {
        self.memory.get(context)
    }

    fn query(&self, kind: ContextKind) -> Vec<&DiaryRecord> {
        self.memory.query(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::JustPitch;

    fn record(context: &str) -> DiaryRecord {
        DiaryRecord {
            context: context.to_string(),
            entry: "dyad".to_string(),
            output: Output::Pitches(vec![JustPitch::new(5, 4)]),
        }
    }

    #[test]
    fn put_get_query() {
        let mut diary = MemoryDiary::new();
        diary.put(record("ModalContext0@1.0"));
        diary.put(record("ModalContext1@2.0"));
        diary.put(record("ModalContext0@1.0"));
        assert_eq!(diary.len(), 2);
        assert!(diary.get("ModalContext1@2.0").is_some());
        assert!(diary.get("ClockContext@0").is_none());
        assert_eq!(diary.query(ContextKind::Modal0).len(), 1);
        assert!(diary.query(ContextKind::Empty).is_empty());
    }

    #[test]
    fn merge_prefers_the_newer_records() {
        let mut diary = MemoryDiary::new();
        diary.put(record("ModalContext0@1.0"));
        let mut page = MemoryDiary::new();
        page.put(DiaryRecord {
            entry: "scale".to_string(),
            ..record("ModalContext0@1.0")
        });
        page.put(record("ClockContext@1.2"));
        diary.merge(page);
        assert_eq!(diary.len(), 2);
        assert_eq!(diary.get("ModalContext0@1.0").map(|r| r.entry.as_str()), Some("scale"));
    }

    #[test]
    fn json_diary_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diary.json");
        let mut diary = JsonDiary::load(&path).unwrap();
        assert!(diary.is_empty());
        diary.put(record("ModalContext0@4.1"));
        diary.save().unwrap();

        let reopened = JsonDiary::load(&path).unwrap();
        assert_eq!(reopened.get("ModalContext0@4.1"), Some(&record("ModalContext0@4.1")));
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diary.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonDiary::load(&path), Err(DiaryError::Json(_))));
    }
}
