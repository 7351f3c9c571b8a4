//! # OMRS Core
//!
//! Core mapping logic for the OpenMRS ⇄ FHIR DiagnosticReport bridge.
//!
//! This crate translates between FHIR DiagnosticReports and the native encounter/Obs model:
//! - Obs-tree classification into concept buckets
//! - Observation ⇄ Obs conversion, including interpretation codes
//! - Recursive result-tree building and flattening
//! - ICU and Microbiology report handlers behind a category registry
//!
//! **No storage engine**: persistence is reached through the traits in [`store`].
//! [`memory::InMemoryStore`] implements them for tests and the CLI.

pub mod classifier;
pub mod config;
pub mod constants;
pub mod context;
pub mod convert;
pub mod error;
pub mod federation;
pub mod handler;
pub mod memory;
pub mod model;
pub mod registry;
pub mod store;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use config::BridgeConfig;
pub use context::RequestContext;
pub use error::{BridgeError, BridgeResult};
pub use federation::{HttpReportSource, RemoteReportSource};
pub use handler::{DiagnosticReportHandler, IcuHandler, MicrobiologyHandler};
pub use memory::InMemoryStore;
pub use registry::{HandlerRegistry, ServiceCategory};
pub use store::ClinicalStore;
