//! # TOSSE Core
//!
//! Core logic for the TOSSE cough-triage demo.
//!
//! This crate contains the workflow and data operations behind the mobile shell:
//! - Patient registration and validation
//! - The simulated acoustic analysis engine
//! - The persisted history of analyses (a single JSON blob under the data directory)
//! - Plain-text history export
//! - The screen sequencer that ties the steps together
//!
//! **No presentation concerns**: rendering, HTTP servers and command-line parsing belong in
//! `api-rest` and `tosse-cli`.

pub mod analysis;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod export;
pub mod patient;
pub mod store;
pub mod workflow;

pub use analysis::{AnalysisResult, Condition, DiagnosisProbabilities, ResultId, RiskLevel};
pub use config::CoreConfig;
pub use constants::DEFAULT_DATA_DIR;
pub use engine::{AnalysisStage, Analyzer, AudioSample, ProgressSender, StubAnalyzer};
pub use error::{TriageError, TriageResult, ValidationError};
pub use patient::{PatientData, PatientDraft};
pub use store::{HistoryRecord, ResultStore};
pub use tosse_types::{NonEmptyText, TextError};
pub use workflow::{Screen, WorkflowController};
