//! Shared-storage directory used by the controller and enforcement processes.
//!
//! ## Files
//!
//! | File | Writer | Content |
//! |------|--------|---------|
//! | `rules.json` | controller | JSON list of rules |
//! | `rules.timestamp` | controller | change timestamp (ms), bumped on every save |
//! | `events.log` | enforcement | one pipe-delimited event per line |
//! | `events.log.backup` | enforcement | the previous log after rotation |
//!
//! Ownership is by file and direction, so there is no write/write race
//! across processes. Readers may still see a write in progress; a parse
//! failure surfaces as [`StorageError::Corrupt`] and callers polling for
//! changes treat it as "no update".

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use directories::ProjectDirs;
use parking_lot::Mutex;
use tracing::{debug, info};
use vigil_core::{FilterEvent, Rule};

use crate::error::{Result, StorageError};
use crate::event_line::{format_event, parse_event};

/// Rules file name.
pub const RULES_FILE: &str = "rules.json";
/// Change timestamp file name.
pub const TIMESTAMP_FILE: &str = "rules.timestamp";
/// Event log file name.
pub const EVENTS_FILE: &str = "events.log";
/// Rotated event log file name.
pub const EVENTS_BACKUP_FILE: &str = "events.log.backup";
/// Event log size that triggers rotation.
pub const DEFAULT_ROTATE_BYTES: u64 = 1024 * 1024;

/// Handle to the shared-storage directory.
///
/// Cheap to clone. Appends from clones of one handle are serialized.
#[derive(Debug, Clone)]
pub struct SharedStorage {
    dir: PathBuf,
    rotate_bytes: u64,
    append_lock: Arc<Mutex<()>>,
}

impl SharedStorage {
    /// Opens an existing shared directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let storage = Self::unchecked(dir.into());
        storage.ensure_available()?;
        Ok(storage)
    }

    /// Opens the shared directory, creating it first if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::Unavailable {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        info!("Using shared storage at: {:?}", dir);
        Self::open(dir)
    }

    /// Opens the platform default location, creating it if needed.
    pub fn open_default() -> Result<Self> {
        Self::create(Self::default_dir()?)
    }

    /// The platform default location.
    pub fn default_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "vigil", "vigil").ok_or_else(|| {
            StorageError::Unavailable {
                path: PathBuf::new(),
                reason: "could not determine app data directory".to_string(),
            }
        })?;
        Ok(dirs.data_dir().join("shared"))
    }

    fn unchecked(dir: PathBuf) -> Self {
        Self {
            dir,
            rotate_bytes: DEFAULT_ROTATE_BYTES,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Sets the rotation threshold.
    pub fn with_rotate_threshold(mut self, bytes: u64) -> Self {
        self.rotate_bytes = bytes;
        self
    }

    /// The shared directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the rules file.
    pub fn rules_path(&self) -> PathBuf {
        self.dir.join(RULES_FILE)
    }

    /// Path of the change timestamp file.
    pub fn timestamp_path(&self) -> PathBuf {
        self.dir.join(TIMESTAMP_FILE)
    }

    /// Path of the event log.
    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    /// Path of the rotated event log.
    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(EVENTS_BACKUP_FILE)
    }

    fn ensure_available(&self) -> Result<()> {
        match fs::metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Unavailable {
                path: self.dir.clone(),
                reason: "not a directory".to_string(),
            }),
            Err(e) => Err(StorageError::Unavailable {
                path: self.dir.clone(),
                reason: e.to_string(),
            }),
        }
    }

    // ==================== Rules ====================

    /// Writes the rule list and bumps the change timestamp.
    ///
    /// The list is written to a temporary file and renamed into place.
    /// Returns the new timestamp.
    pub fn save_rules(&self, rules: &[Rule]) -> Result<u64> {
        self.ensure_available()?;

        let json = serde_json::to_vec_pretty(rules)?;
        write_atomic(&self.rules_path(), &json)?;

        let previous = self.change_timestamp().ok().flatten().unwrap_or(0);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let stamp = now.max(previous + 1);
        write_atomic(&self.timestamp_path(), stamp.to_string().as_bytes())?;

        debug!(rules = rules.len(), timestamp = stamp, "Rules saved");
        Ok(stamp)
    }

    /// Reads the rule list. A missing file yields an empty list.
    pub fn load_rules(&self) -> Result<Vec<Rule>> {
        self.ensure_available()?;

        let path = self.rules_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(Vec::new());
        };

        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Reads the change timestamp. `None` until rules are first saved.
    pub fn change_timestamp(&self) -> Result<Option<u64>> {
        self.ensure_available()?;

        let path = self.timestamp_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };

        let text = String::from_utf8_lossy(&bytes);
        text.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    // ==================== Events ====================

    /// Appends one event line. Returns true if the append triggered a
    /// rotation.
    pub fn append_event(&self, event: &FilterEvent) -> Result<bool> {
        self.ensure_available()?;
        let _guard = self.append_lock.lock();

        let path = self.events_path();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", format_event(event))?;
        file.flush()?;
        let size = file.metadata()?.len();
        drop(file);

        if size <= self.rotate_bytes {
            return Ok(false);
        }

        let backup = self.backup_path();
        remove_optional(&backup)?;
        fs::rename(&path, &backup)?;
        File::create(&path)?;
        info!(bytes = size, "Event log rotated to {:?}", backup);
        Ok(true)
    }

    /// Reads the current event log, oldest first. Malformed lines, such as
    /// one being written right now, are skipped.
    pub fn load_events(&self) -> Result<Vec<FilterEvent>> {
        self.ensure_available()?;

        let Some(bytes) = read_optional(&self.events_path())? else {
            return Ok(Vec::new());
        };

        // A concurrent append may leave a torn line, even mid-character.
        let mut events = Vec::new();
        for raw in bytes.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            if line.trim().is_empty() {
                continue;
            }
            match parse_event(&line) {
                Some(event) => events.push(event),
                None => debug!("Skipping malformed event line"),
            }
        }
        Ok(events)
    }

    /// Deletes the event log and its backup.
    pub fn clear_events(&self) -> Result<()> {
        self.ensure_available()?;
        let _guard = self.append_lock.lock();

        remove_optional(&self.events_path())?;
        remove_optional(&self.backup_path())?;
        info!("Event log cleared");
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vigil_core::{EventAction, RuleAction, Severity};

    fn create_test_storage() -> (SharedStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = SharedStorage::open(dir.path()).unwrap();
        (storage, dir)
    }

    fn sample_rule() -> Rule {
        Rule::new("No violent games", ["violence"], [RuleAction::Block], Severity::High)
    }

    // ==================== Location Tests ====================

    #[test]
    fn missing_directory_is_hard_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SharedStorage::open(&missing),
            Err(StorageError::Unavailable { .. })
        ));
    }

    #[test]
    fn directory_removed_after_open_is_hard_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared");
        let storage = SharedStorage::create(&path).unwrap();
        fs::remove_dir_all(&path).unwrap();

        assert!(matches!(
            storage.load_rules(),
            Err(StorageError::Unavailable { .. })
        ));
        assert!(storage.append_event(&FilterEvent::new(
            EventAction::Blocked,
            "x.com",
            "proxy",
            ""
        ))
        .is_err());
    }

    #[test]
    fn create_makes_nested_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = SharedStorage::create(&nested).unwrap();
        assert!(storage.dir().is_dir());
    }

    // ==================== Rules Tests ====================

    #[test]
    fn first_run_is_empty() {
        let (storage, _dir) = create_test_storage();
        assert!(storage.load_rules().unwrap().is_empty());
        assert!(storage.load_events().unwrap().is_empty());
        assert_eq!(storage.change_timestamp().unwrap(), None);
    }

    #[test]
    fn saved_rules_are_loaded() {
        let (storage, _dir) = create_test_storage();
        let rule = sample_rule();
        storage.save_rules(&[rule.clone()]).unwrap();

        let loaded = storage.load_rules().unwrap();
        assert_eq!(loaded, vec![rule]);
        assert!(!storage.dir().join("rules.json.tmp").exists());
    }

    #[test]
    fn timestamp_increases_on_every_save() {
        let (storage, _dir) = create_test_storage();
        let first = storage.save_rules(&[]).unwrap();
        let second = storage.save_rules(&[]).unwrap();
        let third = storage.save_rules(&[sample_rule()]).unwrap();

        assert!(second > first);
        assert!(third > second);
        assert_eq!(storage.change_timestamp().unwrap(), Some(third));
    }

    #[test]
    fn truncated_rules_file_is_corrupt() {
        let (storage, _dir) = create_test_storage();
        fs::write(storage.rules_path(), b"[{\"id\": \"rule_").unwrap();

        let err = storage.load_rules().unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn garbage_timestamp_is_corrupt() {
        let (storage, _dir) = create_test_storage();
        fs::write(storage.timestamp_path(), b"12ab").unwrap();
        assert!(storage.change_timestamp().unwrap_err().is_corrupt());
    }

    // ==================== Event Tests ====================

    #[test]
    fn events_round_trip_in_order() {
        let (storage, _dir) = create_test_storage();
        let rule = sample_rule();
        storage
            .append_event(&FilterEvent::blocked("violent-game.com", "proxy", &rule))
            .unwrap();
        storage
            .append_event(&FilterEvent::new(EventAction::Allowed, "news.org", "api", ""))
            .unwrap();

        let events = storage.load_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::Blocked);
        assert_eq!(events[0].rule_description, "No violent games");
        assert_eq!(events[1].hostname, "news.org");
    }

    #[test]
    fn partial_trailing_line_is_skipped() {
        let (storage, _dir) = create_test_storage();
        storage
            .append_event(&FilterEvent::new(EventAction::Blocked, "a.com", "proxy", "r"))
            .unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(storage.events_path())
            .unwrap();
        write!(file, "2024-01-01T00:00:00Z|bloc").unwrap();

        assert_eq!(storage.load_events().unwrap().len(), 1);
    }

    #[test]
    fn torn_multibyte_line_does_not_fail_read() {
        let (storage, _dir) = create_test_storage();
        storage
            .append_event(&FilterEvent::new(EventAction::Blocked, "a.com", "proxy", "r"))
            .unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(storage.events_path())
            .unwrap();
        file.write_all(b"2024-01-01T00:00:00.000Z|blocked|b.com|proxy|caf\xC3")
            .unwrap();

        let events = storage.load_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].hostname, "a.com");
    }

    #[test]
    fn clear_removes_log_and_backup() {
        let (storage, _dir) = create_test_storage();
        let storage = storage.with_rotate_threshold(10);
        storage
            .append_event(&FilterEvent::new(EventAction::Blocked, "a.com", "proxy", "r"))
            .unwrap();
        assert!(storage.backup_path().exists());

        storage.clear_events().unwrap();
        assert!(!storage.events_path().exists());
        assert!(!storage.backup_path().exists());
        assert!(storage.load_events().unwrap().is_empty());

        // Clearing twice is fine.
        storage.clear_events().unwrap();
    }

    // ==================== Rotation Tests ====================

    #[test]
    fn rotation_happens_once_past_one_megabyte() {
        let (storage, _dir) = create_test_storage();
        let description = "x".repeat(1000);
        let event = FilterEvent::new(EventAction::Blocked, "big.com", "proxy", description);

        let mut appended = 0;
        let mut rotations = 0;
        while rotations == 0 {
            if storage.append_event(&event).unwrap() {
                rotations += 1;
            }
            appended += 1;
            assert!(appended < 2000, "log never rotated");
        }

        let backup_len = fs::metadata(storage.backup_path()).unwrap().len();
        assert!(backup_len > DEFAULT_ROTATE_BYTES);
        assert_eq!(fs::metadata(storage.events_path()).unwrap().len(), 0);
        assert!(storage.load_events().unwrap().is_empty());

        // The next append starts the fresh log without rotating again.
        assert!(!storage.append_event(&event).unwrap());
        assert_eq!(storage.load_events().unwrap().len(), 1);
    }

    #[test]
    fn rotation_discards_previous_backup() {
        let (storage, _dir) = create_test_storage();
        let storage = storage.with_rotate_threshold(10);

        storage
            .append_event(&FilterEvent::new(EventAction::Blocked, "first.com", "proxy", ""))
            .unwrap();
        storage
            .append_event(&FilterEvent::new(EventAction::Blocked, "second.com", "proxy", ""))
            .unwrap();

        let backup = fs::read_to_string(storage.backup_path()).unwrap();
        assert!(backup.contains("second.com"));
        assert!(!backup.contains("first.com"));
    }
}
