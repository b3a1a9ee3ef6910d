// crates/core/src/jobs/registry.rs
//! In-memory store of research job records.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::{JobId, JobRecord, JobUpdate, ResearchParams};
use crate::error::JobError;

/// Keyed store of [`JobRecord`]s.
///
/// Each record has a single writer (the executor owning that job id) and any
/// number of readers. Records are never evicted here.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `pending` record for `id`.
    pub fn create(&self, id: JobId, params: ResearchParams) -> Result<(), JobError> {
        let mut jobs = self.write();
        if jobs.contains_key(&id) {
            return Err(JobError::AlreadyExists { job_id: id });
        }
        jobs.insert(id, JobRecord::new(id, params));
        Ok(())
    }

    /// Merge `update` into the record for `id`.
    pub fn update(&self, id: JobId, update: JobUpdate) -> Result<(), JobError> {
        let mut jobs = self.write();
        let record = jobs.get_mut(&id).ok_or(JobError::not_found(id))?;
        record.apply(update);
        Ok(())
    }

    /// Snapshot of the record for `id`.
    pub fn get(&self, id: JobId) -> Result<JobRecord, JobError> {
        self.read().get(&id).cloned().ok_or(JobError::not_found(id))
    }

    /// Snapshots of every record, most recently created first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<_> = self.read().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading jobs map: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing jobs map: {e}");
            e.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobStatus;

    #[test]
    fn test_create_then_get_is_pending() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        registry.create(id, ResearchParams::new("Acme")).unwrap();

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.params.company, "Acme");
        assert!(record.result.is_none());
        assert!(record.error_message.is_none());
    }

    #[test]
    fn test_create_duplicate_fails() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        registry.create(id, ResearchParams::new("Acme")).unwrap();

        let err = registry.create(id, ResearchParams::new("Other")).unwrap_err();
        assert!(matches!(err, JobError::AlreadyExists { job_id } if job_id == id));
        assert_eq!(registry.get(id).unwrap().params.company, "Acme");
    }

    #[test]
    fn test_update_and_get_unknown_fail() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        assert!(matches!(
            registry.update(id, JobUpdate::status(JobStatus::Processing)),
            Err(JobError::NotFound { .. })
        ));
        assert!(matches!(registry.get(id), Err(JobError::NotFound { .. })));
    }

    #[test]
    fn test_update_refreshes_last_update() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        registry.create(id, ResearchParams::new("Acme")).unwrap();
        let created = registry.get(id).unwrap().last_update;

        registry
            .update(
                id,
                JobUpdate::status(JobStatus::Completed).with_result(serde_json::json!({"ok": true})),
            )
            .unwrap();

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result, Some(serde_json::json!({"ok": true})));
        assert!(record.last_update >= created);
    }

    #[test]
    fn test_list_returns_every_record() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty());
        for name in ["a", "b", "c"] {
            registry.create(JobId::new(), ResearchParams::new(name)).unwrap();
        }
        assert_eq!(registry.len(), 3);
        let list = registry.list();
        assert_eq!(list.len(), 3);
        assert!(list.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }
}
