//! Orchestration entry point.
//!
//! Validates a start request, declares the broker topology, writes the
//! initial job record, and publishes the first-stage message. Everything
//! after that is driven by the stage workers.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::broker::MessageBroker;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, ResultExt};
use crate::store::ProgressStore;
use crate::types::{PipelineJob, Stage, StageMessage, StageParameters};

/// Front door of the pipeline: admits jobs and seeds the first stage.
pub struct PipelineOrchestrator<B: MessageBroker> {
    config: PipelineConfig,
    broker: Arc<B>,
    store: Arc<dyn ProgressStore>,
}

impl<B: MessageBroker> PipelineOrchestrator<B> {
    pub fn new(config: PipelineConfig, broker: Arc<B>, store: Arc<dyn ProgressStore>) -> Self {
        Self {
            config,
            broker,
            store,
        }
    }

    /// Declare the exchange, one queue per stage, and their bindings.
    /// Idempotent, safe to call on every start.
    pub fn declare_topology(&self) -> Result<()> {
        self.broker.declare_exchange(&self.config.exchange)?;
        for stage in Stage::ALL {
            let queue = self.config.queue_name(stage);
            self.broker.declare_queue(&queue)?;
            self.broker
                .bind_queue(&queue, &self.config.exchange, self.config.routing_key(stage))?;
        }
        Ok(())
    }

    /// Admit a job under a caller-chosen id.
    ///
    /// Validation failures (bad parameters, missing input, duplicate id)
    /// are returned synchronously before anything is published; the
    /// first-stage message goes out only after the job record is stored.
    pub fn start(
        &self,
        job_id: impl Into<String>,
        input_path: &Path,
        parameters: StageParameters,
    ) -> Result<()> {
        let job_id = job_id.into();
        parameters.validate()?;
        if !input_path.is_file() {
            return Err(PipelineError::Validation(format!(
                "input dataset not found: {}",
                input_path.display()
            )));
        }

        self.declare_topology()?;

        let job = PipelineJob::new(&job_id, input_path.to_path_buf(), parameters.clone());
        self.store.insert(job)?;

        let msg = StageMessage {
            job_id: job_id.clone(),
            artifact_path: input_path.to_path_buf(),
            stage: Stage::FillMissing,
            parameters,
            percentage_completed: 0,
        };
        self.broker
            .publish(
                &self.config.exchange,
                self.config.routing_key(Stage::FillMissing),
                &msg.to_bytes()?,
            )
            .context(format!("publishing first stage for job '{job_id}'"))?;

        info!(job_id = %job_id, input = %input_path.display(), "job submitted");
        Ok(())
    }

    /// Admit a job under a freshly generated id and return it.
    pub fn submit(&self, input_path: &Path, parameters: StageParameters) -> Result<String> {
        let suffix: u32 = rand::random();
        let job_id = format!("job-{}-{suffix:08x}", Utc::now().timestamp_millis());
        self.start(&job_id, input_path, parameters)?;
        Ok(job_id)
    }

    /// Snapshot of a job's progress.
    pub fn job(&self, job_id: &str) -> Result<Option<PipelineJob>> {
        self.store.get(job_id)
    }

    /// All known jobs.
    pub fn jobs(&self) -> Result<Vec<PipelineJob>> {
        self.store.list()
    }

    /// Remove a job record and its artifacts. In-flight messages for the
    /// job complete as no-ops.
    pub fn delete(&self, job_id: &str) -> Result<Option<PipelineJob>> {
        self.store.delete(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessBroker;
    use crate::store::MemoryStore;
    use crate::types::{FillMethod, JobStatus};
    use crate::utils::write_csv_atomic;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dataset-pipeline-orchestrator-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_dataset(dir: &Path) -> PathBuf {
        let path = dir.join("data.csv");
        let mut df = df!["x" => [1.0f64, 2.0, 3.0]].unwrap();
        write_csv_atomic(&mut df, &path).unwrap();
        path
    }

    fn orchestrator() -> PipelineOrchestrator<InProcessBroker> {
        PipelineOrchestrator::new(
            PipelineConfig::default(),
            Arc::new(InProcessBroker::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_start_stores_then_publishes() {
        let dir = scratch_dir("start");
        let input = write_dataset(&dir);
        let orch = orchestrator();

        orch.start("job-1", &input, StageParameters::default())
            .unwrap();

        let job = orch.job("job-1").unwrap().unwrap();
        assert_eq!(job.current_stage, Stage::FillMissing);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.percentage_completed, 0);
        assert_eq!(job.output_path, None);

        let queue = orch.config.queue_name(Stage::FillMissing);
        assert_eq!(orch.broker.queue_depth(&queue).unwrap(), 1);
        let delivery = orch.broker.receive(&queue).await.unwrap();
        let msg = StageMessage::from_bytes(delivery.payload()).unwrap();
        delivery.ack();
        assert_eq!(msg.job_id, "job-1");
        assert_eq!(msg.stage, Stage::FillMissing);
        assert_eq!(msg.artifact_path, input);
        assert_eq!(msg.percentage_completed, 0);
    }

    #[test]
    fn test_invalid_parameters_rejected_before_publish() {
        let dir = scratch_dir("badparams");
        let input = write_dataset(&dir);
        let orch = orchestrator();

        let params = StageParameters {
            fill_method: FillMethod::Constant,
            fill_value: None,
            ..Default::default()
        };
        let err = orch.start("job-1", &input, params).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        // No record, no topology side effects worth a message.
        assert!(orch.job("job-1").unwrap().is_none());
    }

    #[test]
    fn test_missing_input_rejected() {
        let orch = orchestrator();
        let err = orch
            .start(
                "job-1",
                Path::new("definitely/not/here.csv"),
                StageParameters::default(),
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(orch.job("job-1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_job_id_rejected() {
        let dir = scratch_dir("duplicate");
        let input = write_dataset(&dir);
        let orch = orchestrator();

        orch.start("job-1", &input, StageParameters::default())
            .unwrap();
        let err = orch
            .start("job-1", &input, StageParameters::default())
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        // Only the first submission reached the queue.
        let queue = orch.config.queue_name(Stage::FillMissing);
        assert_eq!(orch.broker.queue_depth(&queue).unwrap(), 1);
    }

    #[test]
    fn test_submit_generates_distinct_ids() {
        let dir = scratch_dir("submit");
        let input = write_dataset(&dir);
        let orch = orchestrator();

        let a = orch.submit(&input, StageParameters::default()).unwrap();
        let b = orch.submit(&input, StageParameters::default()).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("job-"));
        assert_eq!(orch.jobs().unwrap().len(), 2);
    }
}
