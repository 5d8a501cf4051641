//! Engine-side record store.
//!
//! Holds one [`DownloadRecord`] per session, deduplicated on destination
//! file. Can be serialized to a JSON state file and loaded back, at which
//! point records left mid-flight by a previous run are sanitized.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::extras::{ExtraValue, Extras};
use crate::session::{Session, SessionRequest};
use crate::types::{progress_percent, DownloadFailure, Notification, Reason, SessionId, Status};

const STATE_VERSION: u32 = 1;

/// Persisted state of one download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: SessionId,
    pub url: String,
    pub file: String,
    pub tags: Vec<String>,
    pub status: Status,
    pub downloaded: i64,
    /// -1 while unknown.
    pub total: i64,
    pub error: Option<DownloadFailure>,
    pub extras: Extras,
    pub created_ms: u64,
    #[serde(skip, default = "unknown")]
    pub eta_ms: i64,
    #[serde(skip, default = "unknown")]
    pub bytes_per_second: i64,
}

fn check_storable(extras: &Extras) -> Result<(), EngineError> {
    match extras.unstorable_key() {
        Some(key) => Err(EngineError::Rejected(format!("extra {} is not a finite number", key))),
        None => Ok(()),
    }
}

fn unknown() -> i64 {
    -1
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl DownloadRecord {
    pub fn from_request(request: &SessionRequest) -> Self {
        Self {
            id: request.id,
            url: request.locator.clone(),
            file: request.destination.clone(),
            tags: request.tags.clone(),
            status: Status::Added,
            downloaded: 0,
            total: -1,
            error: None,
            extras: request.extras.clone(),
            created_ms: now_ms(),
            eta_ms: -1,
            bytes_per_second: -1,
        }
    }

    pub fn progress(&self) -> i32 {
        progress_percent(self.downloaded, self.total)
    }

    pub fn to_notification(&self, reason: Reason) -> Notification {
        Notification {
            id: self.id,
            url: self.url.clone(),
            file: self.file.clone(),
            status: self.status,
            progress: self.progress(),
            eta_ms: self.eta_ms,
            bytes_per_second: self.bytes_per_second,
            error: self.error.clone(),
            reason,
        }
    }

    pub fn to_session(&self) -> Session {
        Session {
            id: self.id,
            locator: self.url.clone(),
            destination: self.file.clone(),
            tags: self.tags.clone(),
            extras: self.extras.clone(),
            status: self.status,
        }
    }

    fn reset_transfer_state(&mut self) {
        self.downloaded = 0;
        self.total = -1;
        self.error = None;
    }
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    namespace: String,
    records: Vec<DownloadRecord>,
}

/// In-memory record table for one engine namespace.
pub struct DownloadStore {
    namespace: String,
    records: HashMap<SessionId, DownloadRecord>,
    file_exist_checks: bool,
    closed: bool,
}

impl DownloadStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            records: HashMap::new(),
            file_exist_checks: true,
            closed: false,
        }
    }

    /// When enabled, paused/queued records whose partial file vanished are reset.
    pub fn with_file_exist_checks(mut self, enabled: bool) -> Self {
        self.file_exist_checks = enabled;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed {
                namespace: self.namespace.clone(),
            });
        }
        Ok(())
    }

    /// Insert `record` unless one already targets the same file.
    ///
    /// Returns the stored record and whether it was newly inserted.
    pub fn insert(&mut self, record: DownloadRecord) -> Result<(DownloadRecord, bool), EngineError> {
        self.ensure_open()?;
        check_storable(&record.extras)?;
        if let Some(existing) = self.get_by_file(&record.file)? {
            log::debug!(
                "[store] {} already tracked as {}, not inserting {}",
                record.file,
                existing.id,
                record.id
            );
            return Ok((existing, false));
        }
        self.records.insert(record.id, record.clone());
        Ok((record, true))
    }

    /// Returns false if no record with this id exists.
    pub fn update(&mut self, record: DownloadRecord) -> Result<bool, EngineError> {
        self.ensure_open()?;
        check_storable(&record.extras)?;
        match self.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                Ok(true)
            }
            None => {
                log::debug!("[store] update of missing record {}", record.id);
                Ok(false)
            }
        }
    }

    /// Apply `f` to the record in place and return a copy of the result.
    pub fn modify<F>(&mut self, id: SessionId, f: F) -> Result<DownloadRecord, EngineError>
    where
        F: FnOnce(&mut DownloadRecord),
    {
        self.ensure_open()?;
        let record = self.records.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        f(record);
        Ok(record.clone())
    }

    /// Soft delete marks the record Deleted; hard delete drops it.
    pub fn delete(&mut self, id: SessionId, soft: bool) -> Result<Option<DownloadRecord>, EngineError> {
        self.ensure_open()?;
        if soft {
            Ok(self.records.get_mut(&id).map(|r| {
                r.status = Status::Deleted;
                r.clone()
            }))
        } else {
            Ok(self.records.remove(&id))
        }
    }

    pub fn get(&self, id: SessionId) -> Result<Option<DownloadRecord>, EngineError> {
        self.ensure_open()?;
        Ok(self.records.get(&id).cloned())
    }

    /// Records for the ids that exist, in request order.
    pub fn get_many(&self, ids: &[SessionId]) -> Result<Vec<DownloadRecord>, EngineError> {
        self.ensure_open()?;
        Ok(ids.iter().filter_map(|id| self.records.get(id).cloned()).collect())
    }

    pub fn get_by_file(&self, file: &str) -> Result<Option<DownloadRecord>, EngineError> {
        self.ensure_open()?;
        Ok(self.records.values().find(|r| r.file == file).cloned())
    }

    pub fn get_by_tag(&self, tag: &str) -> Result<Vec<DownloadRecord>, EngineError> {
        self.get_by_tags(&[tag])
    }

    pub fn get_by_tags(&self, tags: &[&str]) -> Result<Vec<DownloadRecord>, EngineError> {
        self.ensure_open()?;
        let mut found: Vec<DownloadRecord> = self
            .records
            .values()
            .filter(|r| r.tags.iter().any(|t| tags.contains(&t.as_str())))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_ms);
        Ok(found)
    }

    pub fn get_by_status(&self, statuses: &[Status]) -> Result<Vec<DownloadRecord>, EngineError> {
        self.ensure_open()?;
        let mut found: Vec<DownloadRecord> = self
            .records
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_ms);
        Ok(found)
    }

    /// Queued + downloading, optionally counting Added records too.
    pub fn pending_count(&self, include_added: bool) -> Result<usize, EngineError> {
        self.ensure_open()?;
        Ok(self
            .records
            .values()
            .filter(|r| match r.status {
                Status::Queued | Status::Downloading => true,
                Status::Added => include_added,
                _ => false,
            })
            .count())
    }

    pub fn replace_extras(&mut self, id: SessionId, extras: Extras) -> Result<DownloadRecord, EngineError> {
        check_storable(&extras)?;
        self.modify(id, |r| r.extras = extras)
    }

    pub fn put_extra(
        &mut self,
        id: SessionId,
        key: String,
        value: ExtraValue,
    ) -> Result<DownloadRecord, EngineError> {
        if !value.is_storable() {
            return Err(EngineError::Rejected(format!("extra {} is not a finite number", key)));
        }
        self.modify(id, |r| {
            r.extras.put(key, value);
        })
    }

    /// Remove `key` from each existing record in `ids`; missing ids are skipped.
    pub fn delete_extra_by_key(
        &mut self,
        ids: &[SessionId],
        key: &str,
    ) -> Result<Vec<DownloadRecord>, EngineError> {
        self.ensure_open()?;
        let mut touched = Vec::new();
        for id in ids {
            if let Some(record) = self.records.get_mut(id) {
                record.extras.remove(key);
                touched.push(record.clone());
            }
        }
        Ok(touched)
    }

    /// Repair records left inconsistent by an interrupted run.
    ///
    /// Returns how many records changed. `first_entry` is true only right
    /// after loading a state file.
    pub fn sanitize(&mut self, first_entry: bool) -> usize {
        let check_files = self.file_exist_checks;
        let mut updated = 0;
        for record in self.records.values_mut() {
            let changed = match record.status {
                Status::Completed => {
                    if record.total < 1 && record.downloaded > 0 {
                        record.total = record.downloaded;
                        record.error = None;
                        true
                    } else {
                        false
                    }
                }
                Status::Downloading if first_entry => {
                    record.status = if record.downloaded > 0
                        && record.total > 0
                        && record.downloaded >= record.total
                    {
                        Status::Completed
                    } else {
                        Status::Queued
                    };
                    record.error = None;
                    true
                }
                Status::Queued | Status::Paused => {
                    if record.downloaded > 0 && check_files && !Path::new(&record.file).exists() {
                        record.reset_transfer_state();
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };
            if changed {
                updated += 1;
            }
        }
        if updated > 0 {
            log::debug!("[store] sanitized {} record(s) in {}", updated, self.namespace);
        }
        updated
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        self.ensure_open()?;
        let mut records: Vec<DownloadRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.created_ms);
        let state = StateFile {
            version: STATE_VERSION,
            namespace: self.namespace.clone(),
            records,
        };
        Ok(serde_json::to_string_pretty(&state)?)
    }

    /// Load a store from its JSON state and sanitize it as a first entry.
    pub fn from_json(json: &str, file_exist_checks: bool) -> Result<Self, EngineError> {
        let state: StateFile = serde_json::from_str(json)?;
        if state.version != STATE_VERSION {
            return Err(EngineError::Rejected(format!(
                "unsupported state version {}",
                state.version
            )));
        }
        let mut store = DownloadStore::new(state.namespace).with_file_exist_checks(file_exist_checks);
        store.records = state.records.into_iter().map(|r| (r.id, r)).collect();
        store.sanitize(true);
        Ok(store)
    }

    /// Further calls fail with [`EngineError::Closed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        log::debug!("[store] {} closed", self.namespace);
    }
}
