//! FHIR DiagnosticReport wire model.
//!
//! Observations that belong to a report travel in `contained` and are referenced from
//! `result` (and from each other's `related`) as `#<local-id>`.

use crate::datatypes::{Attachment, CodeableConcept, Reference};
use crate::imaging_study::ImagingStudy;
use crate::observation::Observation;
use crate::resource::Resource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `DiagnosticReport.performer`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CodeableConcept>,
    pub actor: Reference,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contained: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    /// Visit the report was produced in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer: Vec<Performer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imaging_study: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presented_form: Vec<Attachment>,
}

impl DiagnosticReport {
    /// Category code of the first coding, e.g. `MB` or `ICU`.
    pub fn category_code(&self) -> Option<&str> {
        self.category.as_ref().and_then(CodeableConcept::first_code)
    }

    /// Look up a contained Observation by local id (without the `#`).
    pub fn contained_observation(&self, local_id: &str) -> Option<&Observation> {
        self.contained.iter().find_map(|r| match r {
            Resource::Observation(obs) if obs.id.as_deref() == Some(local_id) => Some(obs.as_ref()),
            _ => None,
        })
    }

    /// Look up a contained ImagingStudy by local id (without the `#`).
    pub fn contained_imaging_study(&self, local_id: &str) -> Option<&ImagingStudy> {
        self.contained.iter().find_map(|r| match r {
            Resource::ImagingStudy(study) if study.id.as_deref() == Some(local_id) => {
                Some(study.as_ref())
            }
            _ => None,
        })
    }
}
