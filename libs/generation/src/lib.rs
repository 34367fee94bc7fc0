//! Credit-gated photo generation pipeline
//!
//! A request debits one credit and creates a `processing` generated photo in
//! a single transaction ([`service::GenerationService`]), then enqueues a
//! task ([`queue::TaskQueue`]). A worker ([`worker::GenerationWorker`])
//! downloads the original, restyles it through the image edit API
//! ([`image_edit::ImageEditClient`]), uploads the result and moves the row to
//! `finished` or `failed`. [`sweep`] recovers rows left behind by crashed
//! workers.

pub mod config;
pub mod error;
pub mod image_edit;
pub mod models;
pub mod queue;
pub mod repository;
pub mod service;
pub mod sweep;
pub mod worker;

pub use config::GenerationSettings;
pub use error::{GenerationError, GenerationResult};
pub use service::GenerationService;
pub use worker::GenerationWorker;
