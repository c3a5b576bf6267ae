//! Asynchronous multi-stage dataset preprocessing pipeline.
//!
//! Every submitted CSV dataset traverses a fixed three-stage pipeline
//! (fill-missing, then detect-outliers, then feature-extraction) driven
//! by messages on a broker. A durable progress store tracks each job's
//! stage, status, and checkpoint percentage (33/66/100), and a
//! best-effort notifier streams snapshots to observers.
//!
//! Delivery is at-least-once: workers acknowledge a message only after
//! the stage's result is recorded, and every transform writes its output
//! to a path determined by its input, so redelivered messages re-run
//! harmlessly.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataset_pipeline::{
//!     BroadcastNotifier, InProcessBroker, MemoryStore, PipelineConfig,
//!     PipelineOrchestrator, ProgressStore, Stage, StageParameters, StageWorker,
//! };
//!
//! # async fn run() -> dataset_pipeline::Result<()> {
//! let config = PipelineConfig::default();
//! let broker = Arc::new(InProcessBroker::new());
//! let store: Arc<dyn ProgressStore> = Arc::new(MemoryStore::new());
//! let notifier = Arc::new(BroadcastNotifier::new(config.notifier_capacity));
//!
//! for stage in Stage::ALL {
//!     let worker = StageWorker::new(
//!         stage,
//!         config.clone(),
//!         broker.clone(),
//!         store.clone(),
//!         notifier.clone(),
//!     );
//!     tokio::spawn(worker.run());
//! }
//!
//! let orchestrator = PipelineOrchestrator::new(config, broker, store);
//! let job_id =
//!     orchestrator.submit("uploads/train.csv".as_ref(), StageParameters::default())?;
//! println!("submitted {job_id}");
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod store;
pub mod transforms;
pub mod types;
pub mod utils;
pub mod worker;

pub use broker::{Delivery, InProcessBroker, MessageBroker};
pub use config::{ConfigValidationError, PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, Result, ResultExt, TransformError};
pub use notifier::{
    BroadcastNotifier, ClosureNotifier, NullNotifier, ProgressEvent, ProgressNotifier,
};
pub use orchestrator::PipelineOrchestrator;
pub use store::{JsonStore, MemoryStore, ProgressStore};
pub use transforms::{
    DetectOutliersTransform, FeatureExtractionTransform, FillMissingTransform, StageTransform,
    transform_for,
};
pub use types::{
    FillMethod, JobStatus, JobUpdate, OutlierMethod, ParseStageError, PipelineJob, Stage,
    StageMessage, StageParameters,
};
pub use worker::StageWorker;
