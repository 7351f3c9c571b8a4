//! Resource envelope keyed by `resourceType`, plus JSON parse/render helpers.

use crate::bundle::Bundle;
use crate::diagnostic_report::DiagnosticReport;
use crate::imaging_study::ImagingStudy;
use crate::observation::Observation;
use crate::patient::Patient;
use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};

/// Any resource the bridge reads or writes.
///
/// Resource types the bridge does not model deserialize as [`Resource::Unsupported`] so that
/// mixed search bundles still parse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    DiagnosticReport(Box<DiagnosticReport>),
    Observation(Box<Observation>),
    ImagingStudy(Box<ImagingStudy>),
    Patient(Box<Patient>),
    Bundle(Box<Bundle>),
    #[serde(other)]
    Unsupported,
}

impl Resource {
    pub fn resource_type(&self) -> &'static str {
        match self {
            Resource::DiagnosticReport(_) => "DiagnosticReport",
            Resource::Observation(_) => "Observation",
            Resource::ImagingStudy(_) => "ImagingStudy",
            Resource::Patient(_) => "Patient",
            Resource::Bundle(_) => "Bundle",
            Resource::Unsupported => "Unsupported",
        }
    }

    /// Parse a resource from FHIR JSON text.
    ///
    /// This uses `serde_path_to_error` to surface a best-effort path (e.g. `issued`) to the
    /// failing field when the JSON does not match the wire schema.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if the JSON is malformed or a field has an
    /// unexpected type.
    pub fn parse_json(json_text: &str) -> FhirResult<Resource> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);

        match serde_path_to_error::deserialize::<_, Resource>(&mut deserializer) {
            Ok(parsed) => Ok(parsed),
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                Err(FhirError::Translation(format!(
                    "Resource schema mismatch at {path}: {source}"
                )))
            }
        }
    }

    /// Render as pretty-printed FHIR JSON.
    pub fn render_json(&self) -> FhirResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn into_diagnostic_report(self) -> FhirResult<DiagnosticReport> {
        match self {
            Resource::DiagnosticReport(report) => Ok(*report),
            other => Err(unexpected("DiagnosticReport", &other)),
        }
    }

    pub fn into_bundle(self) -> FhirResult<Bundle> {
        match self {
            Resource::Bundle(bundle) => Ok(*bundle),
            other => Err(unexpected("Bundle", &other)),
        }
    }

    pub fn into_imaging_study(self) -> FhirResult<ImagingStudy> {
        match self {
            Resource::ImagingStudy(study) => Ok(*study),
            other => Err(unexpected("ImagingStudy", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Resource) -> FhirError {
    FhirError::InvalidInput(format!(
        "Expected resourceType '{expected}', got '{}'",
        got.resource_type()
    ))
}

impl From<DiagnosticReport> for Resource {
    fn from(report: DiagnosticReport) -> Self {
        Resource::DiagnosticReport(Box::new(report))
    }
}

impl From<Observation> for Resource {
    fn from(observation: Observation) -> Self {
        Resource::Observation(Box::new(observation))
    }
}

impl From<ImagingStudy> for Resource {
    fn from(study: ImagingStudy) -> Self {
        Resource::ImagingStudy(Box::new(study))
    }
}
