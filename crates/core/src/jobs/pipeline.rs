// crates/core/src/jobs/pipeline.rs
//! Staged pipeline executor.
//!
//! Runs an ordered list of [`Stage`]s for one job, folds each stage's patch
//! into the [`AccumulatedState`], publishes one event per stage and records
//! the terminal status in the [`JobRegistry`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{json, Map, Value};

use super::broadcast::{JobPublisher, StatusBroadcaster};
use super::registry::JobRegistry;
use super::sanitize::{find_reserved_key, sanitize, sanitize_state};
use super::state::{AccumulatedState, StatePatch};
use super::types::{JobId, JobStatus, JobUpdate, ResearchParams, StatusEvent};
use crate::error::{JobError, StageError};

/// One unit of pipeline work.
///
/// A stage reads the accumulated state written by earlier stages and returns
/// the keys it wants to set. It may perform arbitrary I/O.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short identifier used in logs, metrics and event payloads.
    fn name(&self) -> &str;

    /// Human-readable description published once the stage has completed.
    fn completed_message(&self, params: &ResearchParams) -> String {
        format!("Completed {} for {}", self.name(), params.company)
    }

    /// Extra fields for the stage's completion event, typically the document
    /// it just wrote. Values are sanitized and merged under the step fields.
    fn completed_result(
        &self,
        _patch: &StatePatch,
        _params: &ResearchParams,
    ) -> Option<Map<String, Value>> {
        None
    }

    async fn run(&self, state: &AccumulatedState) -> Result<StatePatch, StageError>;
}

/// Ordered, shareable stage list.
pub type StageList = Arc<[Arc<dyn Stage>]>;

/// A [`Stage`] backed by an async closure over a snapshot of the state.
pub struct FnStage<F> {
    name: String,
    message: Option<String>,
    f: F,
}

impl<F> FnStage<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            message: None,
            f,
        }
    }

    /// Fixed completion message instead of the default.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(AccumulatedState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StatePatch, StageError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn completed_message(&self, params: &ResearchParams) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("Completed {} for {}", self.name, params.company))
    }

    async fn run(&self, state: &AccumulatedState) -> Result<StatePatch, StageError> {
        (self.f)(state.clone()).await
    }
}

/// Shorthand for `Arc::new(FnStage::new(name, f))`.
pub fn stage_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Stage>
where
    F: Fn(AccumulatedState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StatePatch, StageError>> + Send + 'static,
{
    Arc::new(FnStage::new(name, f))
}

/// What a finished executor observed. Mostly useful to tests; in production
/// the outcome is only observable through the registry and broadcaster.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub status: JobStatus,
    pub state: AccumulatedState,
    pub stages_completed: usize,
    pub error: Option<String>,
}

/// Executes the stage list for exactly one job id.
pub struct PipelineExecutor {
    job_id: JobId,
    params: ResearchParams,
    stages: StageList,
    registry: Arc<JobRegistry>,
    broadcaster: Arc<StatusBroadcaster>,
}

impl PipelineExecutor {
    pub fn new(
        job_id: JobId,
        params: ResearchParams,
        stages: StageList,
        registry: Arc<JobRegistry>,
        broadcaster: Arc<StatusBroadcaster>,
    ) -> Self {
        Self {
            job_id,
            params,
            stages,
            registry,
            broadcaster,
        }
    }

    /// Run every stage and drive the job to a terminal status.
    pub async fn run(self) -> PipelineOutcome {
        let publisher = self.broadcaster.publisher(self.job_id);
        let mut state = AccumulatedState::for_job(self.params.clone(), publisher.clone());
        let mut completed = 0;

        let result = AssertUnwindSafe(self.drive(&publisher, &mut state, &mut completed))
            .catch_unwind()
            .await;

        let (status, error) = match result {
            Ok(Ok(())) => (JobStatus::Completed, None),
            Ok(Err(err @ (JobError::StageFailure { .. } | JobError::SanitizationDefect(_)))) => {
                tracing::warn!(job_id = %self.job_id, error = %err, "research job aborted");
                (JobStatus::Error, Some(err.error_message()))
            }
            Ok(Err(err)) => {
                tracing::error!(job_id = %self.job_id, error = %err, "research job failed");
                (JobStatus::Failed, Some(err.error_message()))
            }
            Err(panic) => {
                let message = format!("Internal error: {}", panic_message(panic.as_ref()));
                tracing::error!(job_id = %self.job_id, error = %message, "research job panicked");
                (JobStatus::Failed, Some(message))
            }
        };
        if let Some(message) = &error {
            self.finish_with_error(&publisher, status, message);
        }

        metrics::counter!("research_jobs_finished_total", "status" => status.as_str()).increment(1);
        PipelineOutcome {
            status,
            state,
            stages_completed: completed,
            error,
        }
    }

    async fn drive(
        &self,
        publisher: &JobPublisher,
        state: &mut AccumulatedState,
        completed: &mut usize,
    ) -> Result<(), JobError> {
        let company = &self.params.company;
        let total = self.stages.len();

        self.registry
            .update(self.job_id, JobUpdate::status(JobStatus::Processing))?;
        publisher.publish(
            StatusEvent::new(
                self.job_id,
                JobStatus::Processing,
                format!("Starting research for {company}"),
            )
            .with_result(json!({ "step": "start", "total_steps": total })),
        );

        for (index, stage) in self.stages.iter().enumerate() {
            let started = Instant::now();
            tracing::debug!(stage = stage.name(), step = index + 1, total, "stage started");

            let patch = stage
                .run(state)
                .await
                .map_err(|e| JobError::StageFailure {
                    stage: stage.name().to_string(),
                    message: e.message,
                })?;

            metrics::histogram!("research_stage_duration_seconds", "stage" => stage.name().to_string())
                .record(started.elapsed().as_secs_f64());
            let mut event_result = stage.completed_result(&patch, &self.params).unwrap_or_default();
            let written = state.merge(patch);
            *completed += 1;
            tracing::info!(
                stage = stage.name(),
                step = index + 1,
                total,
                keys_written = written,
                "stage completed"
            );

            event_result.insert("step".into(), json!(stage.name()));
            event_result.insert("step_index".into(), json!(index + 1));
            event_result.insert("total_steps".into(), json!(total));
            publisher.publish(
                StatusEvent::new(
                    self.job_id,
                    JobStatus::Processing,
                    stage.completed_message(&self.params),
                )
                .with_result(Value::Object(event_result)),
            );
        }

        let (report, fallback) = match state.locate_artifact() {
            Some(artifact) => (sanitize(artifact), false),
            None => {
                tracing::warn!(company = %company, "no report produced; using fallback report");
                (json!(fallback_report(&self.params, *completed)), true)
            }
        };

        let sanitized = sanitize_state(state);
        if let Some(path) = find_reserved_key(&sanitized) {
            return Err(JobError::SanitizationDefect(format!(
                "reserved key '{path}' survived sanitization"
            )));
        }

        let result = json!({
            "company": company,
            "report": report,
            "fallback": fallback,
            "steps_completed": *completed,
            "state": sanitized,
        });
        self.registry.update(
            self.job_id,
            JobUpdate::status(JobStatus::Completed).with_result(result.clone()),
        )?;
        publisher.publish(
            StatusEvent::new(
                self.job_id,
                JobStatus::Completed,
                format!("Research completed for {company}"),
            )
            .with_result(result),
        );
        tracing::info!(fallback, steps = *completed, "research job completed");
        Ok(())
    }

    fn finish_with_error(&self, publisher: &JobPublisher, status: JobStatus, message: &str) {
        if let Err(e) = self
            .registry
            .update(self.job_id, JobUpdate::status(status).with_error(message))
        {
            tracing::error!(job_id = %self.job_id, error = %e, "could not record job failure");
        }
        publisher.publish(
            StatusEvent::new(
                self.job_id,
                status,
                format!("Research failed for {}", self.params.company),
            )
            .with_error(message),
        );
    }
}

/// Deterministic stand-in report built from the task inputs when no stage
/// produced one.
pub fn fallback_report(params: &ResearchParams, steps: usize) -> String {
    let company = &params.company;
    let mut report = format!("# {company} Research Report\n\n");
    report.push_str(&format!(
        "Research on {company} finished {steps} pipeline step(s) without producing a \
         written report. This summary was generated from the submitted details.\n\n"
    ));

    report.push_str("## Company Details\n\n");
    let details = [
        ("Website", &params.company_url),
        ("Industry", &params.industry),
        ("Headquarters", &params.hq_location),
    ];
    let mut any = false;
    for (label, value) in details {
        if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
            report.push_str(&format!("- **{label}:** {value}\n"));
            any = true;
        }
    }
    if !any {
        report.push_str("- No additional company details were provided.\n");
    }

    if let Some(help) = params
        .help_description
        .as_deref()
        .filter(|v| !v.trim().is_empty())
    {
        report.push_str(&format!("\n## How We Can Help\n\n{help}\n"));
    }
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::broadcast::Subscription;
    use crate::jobs::state::StateValue;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        registry: Arc<JobRegistry>,
        broadcaster: Arc<StatusBroadcaster>,
        id: JobId,
        params: ResearchParams,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            let registry = Arc::new(JobRegistry::new());
            let broadcaster = StatusBroadcaster::new(Arc::clone(&registry), capacity);
            let id = JobId::new();
            let mut params = ResearchParams::new("Acme");
            params.industry = Some("Robotics".to_string());
            registry.create(id, params.clone()).unwrap();
            Self {
                registry,
                broadcaster,
                id,
                params,
            }
        }

        fn executor(&self, stages: Vec<Arc<dyn Stage>>) -> PipelineExecutor {
            PipelineExecutor::new(
                self.id,
                self.params.clone(),
                stages.into(),
                Arc::clone(&self.registry),
                Arc::clone(&self.broadcaster),
            )
        }
    }

    struct PanickingStage;

    #[async_trait]
    impl Stage for PanickingStage {
        fn name(&self) -> &str {
            "boom"
        }

        async fn run(&self, _state: &AccumulatedState) -> Result<StatePatch, StageError> {
            panic!("stage exploded");
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<StatusEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    fn yields(name: &str, key: &'static str, value: i64) -> Arc<dyn Stage> {
        stage_fn(name, move |_| async move { Ok(StatePatch::new().set(key, value)) })
    }

    #[tokio::test]
    async fn test_two_stages_complete_with_fallback() {
        let h = Harness::new(16);
        let mut sub = h.broadcaster.subscribe(h.id).unwrap();

        let outcome = h
            .executor(vec![yields("a", "x", 1), yields("b", "y", 2)])
            .run()
            .await;
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.stages_completed, 2);

        let events = drain(&mut sub);
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Processing,
                JobStatus::Processing,
                JobStatus::Completed,
            ]
        );
        assert_eq!(events[2].message, "Completed a for Acme");
        assert_eq!(events[3].message, "Completed b for Acme");
        assert_eq!(events[3].result.as_ref().unwrap()["step_index"], 2);

        let result = events[4].result.clone().unwrap();
        assert_eq!(result["fallback"], true);
        assert_eq!(result["state"], json!({"x": 1, "y": 2}));
        assert!(result["report"].as_str().unwrap().starts_with("# Acme Research Report"));

        let record = h.registry.get(h.id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result, Some(result));
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_failing_stage_aborts_pipeline() {
        let h = Harness::new(16);
        let mut sub = h.broadcaster.subscribe(h.id).unwrap();
        let third_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&third_ran);

        let outcome = h
            .executor(vec![
                yields("a", "x", 1),
                stage_fn("b", |_| async { Err(StageError::new("timeout")) }),
                stage_fn("c", move |_| {
                    let flag = Arc::clone(&flag);
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(StatePatch::new().set("z", 3))
                    }
                }),
            ])
            .run()
            .await;

        assert_eq!(outcome.status, JobStatus::Error);
        assert_eq!(outcome.stages_completed, 1);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
        assert!(!third_ran.load(Ordering::SeqCst));
        assert_eq!(sanitize_state(&outcome.state), json!({"x": 1}));

        let record = h.registry.get(h.id).unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("timeout"));
        assert!(record.result.is_none());

        let events = drain(&mut sub);
        let last = events.last().unwrap();
        assert_eq!(last.status, JobStatus::Error);
        assert_eq!(last.error.as_deref(), Some("timeout"));
        assert!(last.result.is_none());
        assert_eq!(
            events.iter().filter(|e| e.status == JobStatus::Processing).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_replay_matches_error_record() {
        let h = Harness::new(16);
        h.executor(vec![
            yields("a", "x", 1),
            stage_fn("b", |_| async { Err(StageError::new("timeout")) }),
        ])
        .run()
        .await;

        let record = h.registry.get(h.id).unwrap();
        let mut late = h.broadcaster.subscribe(h.id).unwrap();
        let replay = late.recv().await.unwrap();
        assert_eq!(replay.status, record.status);
        assert_eq!(replay.error, record.error_message);
        assert_eq!(replay.result, record.result);
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stage_sees_earlier_keys() {
        let h = Harness::new(16);
        let outcome = h
            .executor(vec![
                yields("a", "x", 20),
                stage_fn("b", |state: AccumulatedState| async move {
                    match state.get("x") {
                        Some(StateValue::Int(x)) => Ok(StatePatch::new().set("y", x + 1)),
                        _ => Err(StageError::new("x missing")),
                    }
                }),
            ])
            .run()
            .await;
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(sanitize_state(&outcome.state), json!({"x": 20, "y": 21}));
    }

    #[tokio::test]
    async fn test_top_level_artifact_wins() {
        let h = Harness::new(16);
        let outcome = h
            .executor(vec![stage_fn("write", |state: AccumulatedState| async move {
                Ok(StatePatch::new()
                    .set("report", "# Top")
                    .set("editor", state.extended_map("editor", "report", "# Nested")))
            })])
            .run()
            .await;
        assert_eq!(outcome.status, JobStatus::Completed);

        let result = h.registry.get(h.id).unwrap().result.unwrap();
        assert_eq!(result["report"], "# Top");
        assert_eq!(result["fallback"], false);
        assert_eq!(result["state"]["editor"]["report"], "# Nested");
    }

    #[tokio::test]
    async fn test_nested_artifact_used_when_top_level_missing() {
        let h = Harness::new(16);
        h.executor(vec![stage_fn("write", |state: AccumulatedState| async move {
            Ok(StatePatch::new().set("editor", state.extended_map("editor", "report", "# Nested")))
        })])
        .run()
        .await;

        let result = h.registry.get(h.id).unwrap().result.unwrap();
        assert_eq!(result["report"], "# Nested");
        assert_eq!(result["fallback"], false);
    }

    #[tokio::test]
    async fn test_panicking_stage_marks_job_failed() {
        let h = Harness::new(16);
        let mut sub = h.broadcaster.subscribe(h.id).unwrap();
        let outcome = h
            .executor(vec![
                yields("a", "x", 1),
                Arc::new(PanickingStage),
            ])
            .run()
            .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        let record = h.registry.get(h.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("Internal error: stage exploded")
        );
        let last = drain(&mut sub).pop().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_stage_can_publish_through_reserved_publisher() {
        let h = Harness::new(16);
        let mut sub = h.broadcaster.subscribe(h.id).unwrap();
        h.executor(vec![stage_fn("talk", |state: AccumulatedState| async move {
            let Some(publisher) = state.publisher() else {
                return Err(StageError::new("no publisher"));
            };
            assert_eq!(state.job_id(), Some(publisher.job_id()));
            publisher.progress("halfway", json!({"substep": "start"}));
            Ok(StatePatch::new())
        })])
        .run()
        .await;

        let messages: Vec<_> = drain(&mut sub).into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                "Research job for Acme is pending",
                "Starting research for Acme",
                "halfway",
                "Completed talk for Acme",
                "Research completed for Acme",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_job_fails_without_running_stages() {
        let registry = Arc::new(JobRegistry::new());
        let broadcaster = StatusBroadcaster::new(Arc::clone(&registry), 4);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let outcome = PipelineExecutor::new(
            JobId::new(),
            ResearchParams::new("Ghost"),
            vec![stage_fn("a", move |_| {
                flag.store(true, Ordering::SeqCst);
                async { Ok(StatePatch::new()) }
            })]
            .into(),
            registry,
            broadcaster,
        )
        .run()
        .await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fallback_report_is_deterministic() {
        let mut params = ResearchParams::new("Acme");
        params.industry = Some("Robotics".to_string());
        params.help_description = Some("We build data pipelines.".to_string());

        let report = fallback_report(&params, 3);
        assert_eq!(report, fallback_report(&params, 3));
        assert!(report.contains("finished 3 pipeline step(s)"));
        assert!(report.contains("- **Industry:** Robotics"));
        assert!(!report.contains("Website"));
        assert!(report.contains("## How We Can Help\n\nWe build data pipelines."));

        let bare = fallback_report(&ResearchParams::new("Solo"), 0);
        assert!(bare.contains("No additional company details were provided."));
    }
}
