// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The change log: one record per submitted update

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::update::{UpdateClass, UpdateRequest, UpdateType};

/// Records kept once completed
const RETAINED: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeStatus {
    Queued,
    Running,
    Done,
    /// Left to an external installer
    Delegated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: u64,
    pub name: String,
    pub update_class: UpdateClass,
    pub update_type: UpdateType,
    pub status: ChangeStatus,
    pub success: Option<bool>,
    /// Failed while aborting: the node may be inconsistent
    pub fatal: bool,
    pub messages: Vec<String>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == ChangeStatus::Done
    }
}

#[derive(Debug)]
pub struct ChangeLog {
    next_id: AtomicU64,
    records: Mutex<BTreeMap<u64, ChangeRecord>>,
    completions: broadcast::Sender<ChangeRecord>,
}

impl Default for ChangeLog {
    fn default() -> Self {
        let (completions, _) = broadcast::channel(64);
        Self {
            next_id: AtomicU64::new(1),
            records: Mutex::new(BTreeMap::new()),
            completions,
        }
    }
}

impl ChangeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a change not recorded yet
    pub fn assign_change_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record(&self, id: u64, request: &UpdateRequest) {
        let record = ChangeRecord {
            id,
            name: request.name.clone(),
            update_class: request.class(),
            update_type: request.kind,
            status: ChangeStatus::Queued,
            success: None,
            fatal: false,
            messages: vec![],
            created: Utc::now(),
            started: None,
            completed: None,
        };
        self.records.lock().insert(id, record);
    }

    pub(crate) fn started(&self, id: u64) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.status = ChangeStatus::Running;
            record.started = Some(Utc::now());
        }
    }

    /// Stamp completion and publish the record. A delegated change stays in progress.
    pub(crate) fn complete(
        &self,
        id: u64,
        success: bool,
        fatal: bool,
        messages: Vec<String>,
        delegated: bool,
    ) -> Option<ChangeRecord> {
        let record = {
            let mut records = self.records.lock();
            let record = records.get_mut(&id)?;
            record.success = Some(success);
            record.fatal = fatal;
            record.messages = messages;
            if delegated && success {
                record.status = ChangeStatus::Delegated;
            } else {
                record.status = ChangeStatus::Done;
                record.completed = Some(Utc::now());
            }
            let record = record.clone();
            Self::prune(&mut records);
            record
        };
        /* nobody listening is fine */
        let _ = self.completions.send(record.clone());
        Some(record)
    }

    fn prune(records: &mut BTreeMap<u64, ChangeRecord>) {
        let done: Vec<u64> = records
            .values()
            .filter(|r| r.is_complete())
            .map(|r| r.id)
            .collect();
        if done.len() > RETAINED {
            for id in &done[..done.len() - RETAINED] {
                records.remove(id);
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<ChangeRecord> {
        self.records.lock().get(&id).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<ChangeRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Completed records, as they complete
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeRecord> {
        self.completions.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn lifecycle() {
        let log = ChangeLog::new();
        let mut completions = log.subscribe();
        let request = UpdateRequest::chute_named(UpdateType::Stop, "hello");
        let id = log.assign_change_id();
        log.record(id, &request);
        assert_eq!(log.get(id).unwrap().status, ChangeStatus::Queued);

        log.started(id);
        assert!(log.get(id).unwrap().started.is_some());

        let done = log
            .complete(id, false, false, vec!["boom".to_string()], false)
            .unwrap();
        assert_eq!(done.status, ChangeStatus::Done);
        assert_eq!(done.success, Some(false));
        let published = completions.recv().await.unwrap();
        assert_eq!(published, done);
        assert_eq!(log.list().len(), 1);
    }

    #[test]
    fn delegated_changes_stay_in_progress() {
        let log = ChangeLog::new();
        let id = log.assign_change_id();
        log.record(id, &UpdateRequest::chute_named(UpdateType::Update, "pdinstall"));
        let record = log.complete(id, true, false, vec![], true).unwrap();
        assert_eq!(record.status, ChangeStatus::Delegated);
        assert!(record.completed.is_none());
    }

    #[test]
    fn ids_increase() {
        let log = ChangeLog::new();
        let a = log.assign_change_id();
        assert!(log.assign_change_id() > a);
    }
}
