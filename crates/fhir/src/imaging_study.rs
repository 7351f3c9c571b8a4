//! FHIR ImagingStudy wire model.

use crate::datatypes::Reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagingStudy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// DICOM Study Instance UID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_series: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_instances: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ImagingStudy {
    /// Required-field check. Returns one message per missing or malformed field.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self.uid.as_deref().map(str::trim) {
            None | Some("") => errors.push("ImagingStudy.uid is required".to_string()),
            Some(uid) if !uid.chars().all(|c| c.is_ascii_digit() || c == '.') => {
                errors.push(format!("ImagingStudy.uid '{uid}' is not a DICOM UID"))
            }
            Some(_) => {}
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_uid_is_reported() {
        let errors = ImagingStudy::default().validate();
        assert_eq!(errors, vec!["ImagingStudy.uid is required".to_string()]);
    }

    #[test]
    fn dicom_uid_passes_validation() {
        let study = ImagingStudy {
            uid: Some("1.2.840.113619.2.55.3".into()),
            ..ImagingStudy::default()
        };
        assert!(study.validate().is_empty());

        let bad = ImagingStudy {
            uid: Some("urn:oid:abc".into()),
            ..ImagingStudy::default()
        };
        assert_eq!(bad.validate().len(), 1);
    }
}
