//! # Concepts Core
//!
//! The concept expression engine behind the order-entry screen configuration.
//!
//! A configuration document embeds small boolean expressions over named "concepts". This
//! crate:
//! - discovers the concepts and expression sites a document references ([`extractor`]),
//! - keeps a shared store of each concept's value and derived state ([`store`]),
//! - parses and evaluates the expression language against any concept map ([`expression`]),
//! - wires those together for one loaded document ([`manager`]),
//! - persists named concept snapshots for exercising expressions ([`harness`]).
//!
//! **No front-end concerns**: rendering, editors and argument parsing belong in the binaries.

pub mod concept;
pub mod config;
pub mod constants;
pub mod display;
pub mod error;
pub mod expression;
pub mod extractor;
pub mod harness;
pub mod manager;
pub mod storage;
pub mod store;

pub use concept::{ConceptInstance, ConceptMap};
pub use config::{EngineConfig, FieldConventions};
pub use error::{ConceptError, ConceptResult};
pub use expression::{ConceptExpression, ExpressionError, ExpressionResult};
pub use extractor::{extract, ExpressionSite, ExtractionResult, SiteKind};
pub use harness::{TestCase, TestPatient, TestPatientManager};
pub use manager::{ConceptManager, SiteEvaluation};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use store::{ConceptEvent, ConceptStateStore, StoredConcept};
