//! The adaptive, checkpointable, parallel crawl engine.
//!
//! Module map:
//! - [`frontier`]: shared frontier / visited / in-flight store
//! - [`controller`]: closed-loop rate governor and published setpoints
//! - [`worker`]: browser-backed fetch loop
//! - [`manager`]: pool supervision, termination, checkpoint cadence
//! - [`checkpoint`]: durable snapshots and resume
//! - [`crawl_types`]: shared vocabulary

pub mod checkpoint;
pub mod controller;
pub mod crawl_types;
pub mod frontier;
pub mod manager;
pub mod worker;

pub use checkpoint::{
    CHECKPOINT_VERSION, Checkpoint, CheckpointError, CheckpointManager, ControllerSnapshot,
    WindowSample,
};
pub use controller::{
    Adjustment, DEFAULT_WINDOW_SIZE, RateController, Setpoints, Tunables, decide,
};
pub use crawl_types::{
    CrawlError, CrawlResult, CrawlSummary, Disposition, DocMetadata, FrontierEntry, Outcome,
    PageResult, StatusClass,
};
pub use frontier::{CrawlStore, EnqueueOutcome};
pub use manager::run_crawl;
pub use worker::{Counters, Worker, WorkerExit, WorkerShared, looks_rate_limited};
