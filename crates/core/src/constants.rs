//! Constants used throughout the bridge core crate.
//!
//! Resource type names, audit reasons and default configuration values live here so that
//! handlers, the registry and the CLI agree on them.

/// FHIR resource type of a report (and the prefix of report identifiers).
pub const DIAGNOSTIC_REPORT: &str = "DiagnosticReport";

/// FHIR resource type used for result nodes.
pub const OBSERVATION: &str = "Observation";

/// FHIR resource type used for imaging study references.
pub const IMAGING_STUDY: &str = "ImagingStudy";

/// FHIR resource type used for report subjects.
pub const PATIENT: &str = "Patient";

/// FHIR resource type used for performers.
pub const PRACTITIONER: &str = "Practitioner";

/// FHIR resource type a visit is exposed as in `DiagnosticReport.context`.
pub const VISIT_CONTEXT: &str = "Encounter";

/// Status given to reconstructed Observations.
pub const OBSERVATION_STATUS_FINAL: &str = "final";

/// Audit reason recorded when a report is retired.
pub const RETIRE_VOID_REASON: &str = "Voided by FHIR Request.";

/// Prefix of the audit reason recorded when an update replaces stored values.
pub const UPDATE_VOID_REASON_PREFIX: &str = "Due to update DiagnosticReport on";

/// Heading of an aggregated unprocessable-input message.
pub const REQUEST_ISSUE_LIST: &str = "The request cannot be processed due to the following issues";

/// Encounter type used when a report carries no service category.
pub const DEFAULT_ENCOUNTER_TYPE: &str = "DEFAULT";

/// Encounter role whose providers are reported as performers.
pub const DEFAULT_PERFORMER_ROLE: &str = "Unknown";

pub const RESULT_CONCEPT_CODE: &str = "DIAGNOSTIC_REPORT_RESULT";
pub const PRESENTED_FORM_CONCEPT_CODE: &str = "DIAGNOSTIC_REPORT_PRESENTED_FORM";
pub const NAME_CONCEPT_CODE: &str = "DIAGNOSTIC_REPORT_NAME";
pub const STATUS_CONCEPT_CODE: &str = "DIAGNOSTIC_REPORT_STATUS";
pub const IMAGING_STUDY_CONCEPT_CODE: &str = "DIAGNOSTIC_REPORT_IMAGING_STUDY";
