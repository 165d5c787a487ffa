//! pz-client: client library for the PZ Server photo-z catalog service.
//!
//! Provides the remote-process orchestration state machine (pipeline
//! descriptors, job submission, bounded polling, cancellation) and the
//! multi-step product upload workflow (file transfer, schema discovery,
//! column association, finalization).

pub mod api;
pub mod cli;
pub mod client;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod product;
pub mod upload;

// Re-export commonly used types
pub use client::PzClient;
pub use error::{ClientError, ProcessError, ProductError, UploadError};
pub use pipeline::PipelineDescriptor;
pub use process::{
    CombineCatalogsProcess, ManagedProcess, PollOutcome, PollingSupervisor, Process, ProcessInfo,
    ProcessStatus, ProductRef, Selector, StopOutcome, TrainingSetProcess,
};
pub use product::Product;
pub use upload::{ColumnRole, Upload, UploadRequest};
