//! FHIR wire/boundary support for the OpenMRS bridge.
//!
//! This crate provides **wire models** and **JSON parse/render helpers** for the FHIR
//! resources the bridge exchanges with external systems:
//! - DiagnosticReport (with contained Observations and ImagingStudies)
//! - Observation, ImagingStudy, Patient
//! - Bundle (search results from a federated server)
//!
//! This crate focuses on:
//! - FHIR structural alignment (STU3-shaped, JSON)
//! - serialisation/deserialisation
//! - literal and local reference handling
//!
//! It knows nothing about OpenMRS; translation to the native model lives in `omrs-core`.

pub mod bundle;
pub mod datatypes;
pub mod diagnostic_report;
pub mod imaging_study;
pub mod observation;
pub mod patient;
pub mod resource;

pub use bundle::{Bundle, BundleEntry};
pub use datatypes::{Attachment, CodeableConcept, Coding, Quantity, Reference, ResourceId};
pub use diagnostic_report::{DiagnosticReport, Performer};
pub use imaging_study::ImagingStudy;
pub use observation::{Observation, ObservationRelated, ObservationValue};
pub use patient::{HumanName, NameUse, Patient};
pub use resource::Resource;

/// Code system for DiagnosticReport service categories (HL7 v2 table 0074).
pub const SYSTEM_V2_0074: &str = "http://hl7.org/fhir/v2/0074";

/// Code system for observation interpretation codes (HL7 v2 table 0078).
pub const SYSTEM_V2_0078: &str = "http://hl7.org/fhir/v2/0078";

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
