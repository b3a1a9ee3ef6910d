// crates/core/src/jobs/supervisor.rs
//! Entry point for submitting research jobs.

use std::sync::Arc;

use tracing::Instrument;

use super::broadcast::{StatusBroadcaster, Subscription};
use super::pipeline::{PipelineExecutor, Stage, StageList};
use super::registry::JobRegistry;
use super::types::{JobId, JobRecord, ResearchParams};
use crate::config::EngineConfig;
use crate::error::JobError;

/// Allocates job ids and launches one executor per submission.
///
/// Submission is fire-and-forget: the spawned task's handle is dropped, and
/// progress is observable only through [`get_status`](Self::get_status) and
/// [`subscribe`](Self::subscribe).
pub struct JobSupervisor {
    registry: Arc<JobRegistry>,
    broadcaster: Arc<StatusBroadcaster>,
    stages: StageList,
}

impl JobSupervisor {
    pub fn new(
        registry: Arc<JobRegistry>,
        broadcaster: Arc<StatusBroadcaster>,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            stages: stages.into(),
        }
    }

    /// Build a supervisor with its own registry and broadcaster.
    pub fn from_config(config: &EngineConfig, stages: Vec<Arc<dyn Stage>>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let broadcaster = StatusBroadcaster::new(Arc::clone(&registry), config.subscriber_buffer);
        Self::new(registry, broadcaster, stages)
    }

    /// Register a new job and start its pipeline. Returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, params: ResearchParams) -> Result<JobId, JobError> {
        let job_id = JobId::new();
        self.registry.create(job_id, params.clone())?;
        metrics::counter!("research_jobs_submitted_total").increment(1);

        let span = tracing::info_span!("research_job", job_id = %job_id, company = %params.company);
        let executor = PipelineExecutor::new(
            job_id,
            params,
            Arc::clone(&self.stages),
            Arc::clone(&self.registry),
            Arc::clone(&self.broadcaster),
        );
        tokio::spawn(executor.run().instrument(span));

        tracing::info!(job_id = %job_id, stages = self.stages.len(), "research job submitted");
        Ok(job_id)
    }

    /// Read-only snapshot of a job's record.
    pub fn get_status(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        self.registry.get(job_id)
    }

    /// Every known job, most recent first.
    pub fn list(&self) -> Vec<JobRecord> {
        self.registry.list()
    }

    /// Subscribe to a job's status events (replay first, then live).
    pub fn subscribe(&self, job_id: JobId) -> Result<Subscription, JobError> {
        self.broadcaster.subscribe(job_id)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::jobs::pipeline::stage_fn;
    use crate::jobs::state::StatePatch;
    use crate::jobs::types::{JobStatus, StatusEvent};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn config(subscriber_buffer: usize) -> EngineConfig {
        EngineConfig {
            subscriber_buffer,
            ..EngineConfig::default()
        }
    }

    async fn wait_terminal(supervisor: &JobSupervisor, id: JobId) -> JobRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let record = supervisor.get_status(id).unwrap();
                if record.status.is_terminal() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never reached a terminal status")
    }

    #[tokio::test]
    async fn test_submit_returns_before_pipeline_finishes() {
        let gate = Arc::new(Notify::new());
        let stage_gate = Arc::clone(&gate);
        let supervisor = JobSupervisor::from_config(
            &config(16),
            vec![stage_fn("wait", move |_| {
                let gate = Arc::clone(&stage_gate);
                async move {
                    gate.notified().await;
                    Ok(StatePatch::new().set("x", 1))
                }
            })],
        );

        let id = supervisor.submit(ResearchParams::new("Acme")).unwrap();
        let status = supervisor.get_status(id).unwrap().status;
        assert!(matches!(status, JobStatus::Pending | JobStatus::Processing));

        gate.notify_one();
        let record = wait_terminal(&supervisor, id).await;
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.result.is_some());
    }

    #[tokio::test]
    async fn test_each_submission_gets_a_fresh_id() {
        let supervisor = JobSupervisor::from_config(&config(16), Vec::new());
        let a = supervisor.submit(ResearchParams::new("Acme")).unwrap();
        let b = supervisor.submit(ResearchParams::new("Acme")).unwrap();
        assert_ne!(a, b);
        assert_eq!(supervisor.list().len(), 2);
    }

    #[tokio::test]
    async fn test_get_status_unknown_job() {
        let supervisor = JobSupervisor::from_config(&config(16), Vec::new());
        assert!(matches!(
            supervisor.get_status(JobId::new()),
            Err(JobError::NotFound { .. })
        ));
        assert!(supervisor.subscribe(JobId::new()).is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_single_replay() {
        let supervisor = JobSupervisor::from_config(
            &config(16),
            vec![stage_fn("a", |_| async { Ok(StatePatch::new().set("x", 1)) })],
        );
        let id = supervisor.submit(ResearchParams::new("Acme")).unwrap();
        let record = wait_terminal(&supervisor, id).await;

        let mut sub = supervisor.subscribe(id).unwrap();
        let replay = sub.recv().await.unwrap();
        assert_eq!(replay.status, JobStatus::Completed);
        assert_eq!(replay.result, record.result);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_jobs_do_not_affect_other_jobs() {
        let supervisor = JobSupervisor::from_config(
            &config(16),
            vec![stage_fn("maybe_fail", |state: crate::jobs::state::AccumulatedState| async move {
                if state.params().company == "Broken" {
                    Err(StageError::new("upstream unavailable"))
                } else {
                    Ok(StatePatch::new().set("ok", true))
                }
            })],
        );
        let bad = supervisor.submit(ResearchParams::new("Broken")).unwrap();
        let good = supervisor.submit(ResearchParams::new("Acme")).unwrap();

        let bad = wait_terminal(&supervisor, bad).await;
        let good = wait_terminal(&supervisor, good).await;
        assert_eq!(bad.status, JobStatus::Error);
        assert_eq!(bad.error_message.as_deref(), Some("upstream unavailable"));
        assert_eq!(good.status, JobStatus::Completed);
        assert_eq!(good.result.unwrap()["state"], json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_fifty_subscribers_all_see_terminal_event() {
        let gate = Arc::new(Notify::new());
        let stage_gate = Arc::clone(&gate);
        let mut stages = vec![stage_fn("gate", move |_| {
            let gate = Arc::clone(&stage_gate);
            async move {
                gate.notified().await;
                Ok(StatePatch::new())
            }
        })];
        for i in 0..10 {
            stages.push(stage_fn(format!("step{i}"), move |_| async move {
                Ok(StatePatch::new().set(format!("k{i}"), i))
            }));
        }
        let supervisor = JobSupervisor::from_config(&config(4), stages);
        let id = supervisor.submit(ResearchParams::new("Acme")).unwrap();

        let mut subscribers: Vec<_> = (0..50).map(|_| supervisor.subscribe(id).unwrap()).collect();
        let mut stalled = supervisor.subscribe(id).unwrap();
        gate.notify_one();

        let readers: Vec<_> = subscribers
            .drain(..)
            .map(|mut sub| {
                tokio::spawn(async move {
                    let mut last: Option<StatusEvent> = None;
                    while let Some(event) = sub.recv().await {
                        last = Some(event);
                    }
                    last
                })
            })
            .collect();
        for reader in readers {
            let last = reader.await.unwrap().expect("no events received");
            assert_eq!(last.status, JobStatus::Completed);
        }

        wait_terminal(&supervisor, id).await;
        let buffered: Vec<_> = std::iter::from_fn(|| stalled.try_recv()).collect();
        assert!(buffered.len() <= 4);
        assert_eq!(buffered.last().unwrap().status, JobStatus::Completed);
        assert!(stalled.dropped() > 0);
    }
}
