//! Stage workers.
//!
//! One [`StageWorker`] per stage consumes that stage's queue, runs the
//! transform on a blocking task, records the outcome in the progress
//! store, notifies observers, and republishes for the next stage. The
//! settlement rules per delivery:
//!
//! - malformed payload: reject without requeue (poison message);
//! - transform failure: record `failed`, notify, ack; terminal for the
//!   job, never retried;
//! - store/broker failure after a successful transform: reject with
//!   requeue, so the broker redelivers and the idempotent transform
//!   re-runs against the same deterministic output path;
//! - success: upsert, notify, publish the next stage (if any), ack. The
//!   completion write always precedes the next-stage publish.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::{Delivery, MessageBroker};
use crate::config::PipelineConfig;
use crate::error::{Result, TransformError};
use crate::notifier::{ProgressEvent, ProgressNotifier};
use crate::store::ProgressStore;
use crate::transforms::{StageTransform, transform_for};
use crate::types::{JobStatus, JobUpdate, Stage, StageMessage};

/// Consumer loop for one pipeline stage.
pub struct StageWorker<B: MessageBroker> {
    config: PipelineConfig,
    broker: Arc<B>,
    store: Arc<dyn ProgressStore>,
    notifier: Arc<dyn ProgressNotifier>,
    transform: Arc<dyn StageTransform>,
}

impl<B: MessageBroker> StageWorker<B> {
    /// Create a worker for `stage` with the built-in transform.
    pub fn new(
        stage: Stage,
        config: PipelineConfig,
        broker: Arc<B>,
        store: Arc<dyn ProgressStore>,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Self {
        Self::with_transform(config, broker, store, notifier, transform_for(stage))
    }

    /// Create a worker with an injected transform. The worker's stage is
    /// the transform's stage.
    pub fn with_transform(
        config: PipelineConfig,
        broker: Arc<B>,
        store: Arc<dyn ProgressStore>,
        notifier: Arc<dyn ProgressNotifier>,
        transform: Arc<dyn StageTransform>,
    ) -> Self {
        Self {
            config,
            broker,
            store,
            notifier,
            transform,
        }
    }

    /// The stage this worker consumes.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.transform.stage()
    }

    /// Consume the stage queue until the task is aborted.
    ///
    /// Errors only when the queue itself is unavailable; per-message
    /// failures are settled on the delivery and never end the loop.
    pub async fn run(self) -> Result<()> {
        let queue = self.config.queue_name(self.stage());
        info!(stage = %self.stage(), queue = %queue, "stage worker started");
        loop {
            let delivery = self.broker.receive(&queue).await?;
            self.process_one(delivery).await;
        }
    }

    /// Handle a single delivery end to end, settling it on every path.
    pub async fn process_one(&self, delivery: Delivery) {
        let stage = self.stage();

        let msg = match StageMessage::from_bytes(delivery.payload()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(stage = %stage, error = %e, "rejecting malformed message");
                delivery.reject(false);
                return;
            }
        };
        if msg.stage != stage {
            warn!(
                stage = %stage,
                message_stage = %msg.stage,
                job_id = %msg.job_id,
                "rejecting misrouted message"
            );
            delivery.reject(false);
            return;
        }

        debug!(stage = %stage, job_id = %msg.job_id, artifact = %msg.artifact_path.display(),
            "processing stage message");

        let transform = self.transform.clone();
        let input = msg.artifact_path.clone();
        let params = msg.parameters.clone();
        let outcome = tokio::task::spawn_blocking(move || transform.transform(&input, &params))
            .await
            .unwrap_or_else(|join_err| {
                Err(TransformError::Failed(format!(
                    "transform panicked: {join_err}"
                )))
            });

        match outcome {
            Ok(output) => self.complete(&msg, output, delivery).await,
            Err(e) => self.fail(&msg, &e, delivery),
        }
    }

    /// Successful transform: record the checkpoint, notify, publish the
    /// next stage, ack.
    async fn complete(
        &self,
        msg: &StageMessage,
        output: std::path::PathBuf,
        delivery: Delivery,
    ) {
        let stage = self.stage();
        let checkpoint = stage.checkpoint();
        let status = if stage.is_final() {
            JobStatus::Completed
        } else {
            JobStatus::Pending
        };

        let update = JobUpdate::new()
            .stage(stage)
            .status(status)
            .percentage(checkpoint)
            .output_path(output.clone());

        let snapshot = match self.store.upsert(&msg.job_id, &update) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(stage = %stage, job_id = %msg.job_id, error = %e,
                    "store unavailable after transform, requeueing");
                delivery.reject(true);
                return;
            }
        };
        let Some(snapshot) = snapshot else {
            // Job was deleted mid-flight; the work is discarded quietly.
            debug!(stage = %stage, job_id = %msg.job_id, "job deleted, dropping completion");
            delivery.ack();
            return;
        };

        info!(stage = %stage, job_id = %msg.job_id, percentage = checkpoint,
            output = %output.display(), "stage completed");
        self.notifier.notify(ProgressEvent::new(
            &msg.job_id,
            stage,
            snapshot.status,
            snapshot.percentage_completed,
            stage.display_name(),
        ));

        if let Some(next) = stage.next() {
            let next_msg = StageMessage {
                job_id: msg.job_id.clone(),
                artifact_path: output,
                stage: next,
                parameters: msg.parameters.clone(),
                percentage_completed: checkpoint,
            };
            let published = next_msg.to_bytes().and_then(|bytes| {
                self.broker
                    .publish(&self.config.exchange, self.config.routing_key(next), &bytes)
            });
            if let Err(e) = published {
                warn!(stage = %stage, job_id = %msg.job_id, error = %e,
                    "publish to next stage failed, requeueing");
                delivery.reject(true);
                return;
            }
        }

        delivery.ack();
    }

    /// Failed transform: record `failed`, notify, ack. Terminal.
    fn fail(&self, msg: &StageMessage, cause: &TransformError, delivery: Delivery) {
        let stage = self.stage();
        error!(stage = %stage, job_id = %msg.job_id, error = %cause, "stage transform failed");

        let mut update = JobUpdate::new().stage(stage).status(JobStatus::Failed);
        // A failed final stage must not report 100, which is reserved for
        // completed jobs; earlier stages record their own checkpoint.
        if !stage.is_final() {
            update = update.percentage(stage.checkpoint());
        }

        match self.store.upsert(&msg.job_id, &update) {
            Ok(Some(snapshot)) => {
                self.notifier.notify(ProgressEvent::new(
                    &msg.job_id,
                    stage,
                    JobStatus::Failed,
                    snapshot.percentage_completed,
                    cause.to_string(),
                ));
                delivery.ack();
            }
            Ok(None) => {
                debug!(stage = %stage, job_id = %msg.job_id, "job deleted, dropping failure");
                delivery.ack();
            }
            Err(e) => {
                warn!(stage = %stage, job_id = %msg.job_id, error = %e,
                    "store unavailable while recording failure, requeueing");
                delivery.reject(true);
            }
        }
    }
}
