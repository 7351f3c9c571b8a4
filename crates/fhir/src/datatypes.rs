//! FHIR general-purpose data types shared by the resource wire models.
//!
//! Only the subset of each datatype that the bridge reads or writes is modelled. Unknown JSON
//! members are ignored on input so that payloads from richer FHIR servers still parse.

use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A code defined by a terminology system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(
        system: impl Into<String>,
        code: impl Into<String>,
        display: Option<String>,
    ) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            display,
        }
    }
}

/// A concept expressed as one or more codings plus optional free text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }

    /// Display-only concept, used for performer roles.
    pub fn from_display(display: impl Into<String>) -> Self {
        Self::from_coding(Coding {
            display: Some(display.into()),
            ..Coding::default()
        })
    }

    /// First non-empty code across the codings.
    pub fn first_code(&self) -> Option<&str> {
        self.coding
            .iter()
            .filter_map(|c| c.code.as_deref())
            .find(|c| !c.trim().is_empty())
    }
}

/// A reference from one resource to another.
///
/// `reference` is either a literal `<ResourceType>/<id>` or a local `#<id>` pointing into the
/// `contained` list of the enclosing resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn to(id: &ResourceId) -> Self {
        Self {
            reference: Some(id.to_string()),
            display: None,
        }
    }

    pub fn contained(local_id: &str) -> Self {
        Self {
            reference: Some(format!("#{local_id}")),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// The local id when this is a `#id` reference into `contained`.
    pub fn local_id(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .and_then(|r| r.strip_prefix('#'))
            .filter(|id| !id.is_empty())
    }
}

/// Content in a format defined elsewhere (used for `presentedForm`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Base64-encoded payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<chrono::DateTime<chrono::Utc>>,
}

/// A measured amount.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A literal resource identifier of the form `<ResourceType>/<uuid>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    resource_type: String,
    id: Uuid,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, id: Uuid) -> Self {
        Self {
            resource_type: resource_type.into(),
            id,
        }
    }

    /// Parse `<ResourceType>/<uuid>`.
    ///
    /// Absolute URLs are accepted as well; only the last two path segments are used, so
    /// `http://host/fhir/Observation/<uuid>` yields the same value as `Observation/<uuid>`.
    /// A `_history/<version>` suffix is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidReference`] when no type/id pair can be extracted and
    /// [`FhirError::InvalidUuid`] when the id part is not a UUID.
    pub fn parse(reference: &str) -> FhirResult<Self> {
        let trimmed = reference.trim().trim_end_matches('/');
        let trimmed = match trimmed.find("/_history/") {
            Some(pos) => &trimmed[..pos],
            None => trimmed,
        };

        let mut segments = trimmed.rsplit('/');
        let (id, resource_type) = match (segments.next(), segments.next()) {
            (Some(id), Some(resource_type)) if !id.is_empty() && !resource_type.is_empty() => {
                (id, resource_type)
            }
            _ => {
                return Err(FhirError::InvalidReference(format!(
                    "expected <ResourceType>/<id>, got '{reference}'"
                )))
            }
        };

        if !resource_type.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(FhirError::InvalidReference(format!(
                "'{resource_type}' is not a resource type in '{reference}'"
            )));
        }

        let id = Uuid::parse_str(id)
            .map_err(|_| FhirError::InvalidUuid(format!("invalid id '{id}' in '{reference}'")))?;

        Ok(Self {
            resource_type: resource_type.to_string(),
            id,
        })
    }

    /// Parse a reference that must point at `expected_type`.
    pub fn parse_typed(reference: &str, expected_type: &str) -> FhirResult<Self> {
        let parsed = Self::parse(reference)?;
        if parsed.resource_type != expected_type {
            return Err(FhirError::InvalidReference(format!(
                "expected a {expected_type} reference, got '{reference}'"
            )));
        }
        Ok(parsed)
    }

    /// Accept either a bare UUID or a `<ResourceType>/<uuid>` literal for `expected_type`.
    pub fn parse_id_or_reference(input: &str, expected_type: &str) -> FhirResult<Uuid> {
        if let Ok(id) = Uuid::parse_str(input.trim()) {
            return Ok(id);
        }
        Ok(Self::parse_typed(input, expected_type)?.id)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "7f4c2e9d-4b0a-4f3a-9a2c-0e9a6b5d1c88";

    #[test]
    fn parses_relative_and_absolute_references() {
        let relative = ResourceId::parse(&format!("Observation/{ID}")).expect("relative");
        let absolute =
            ResourceId::parse(&format!("http://example.org/fhir/Observation/{ID}/_history/2"))
                .expect("absolute");

        assert_eq!(relative, absolute);
        assert_eq!(relative.resource_type(), "Observation");
        assert_eq!(relative.to_string(), format!("Observation/{ID}"));
    }

    #[test]
    fn rejects_reference_without_type() {
        let err = ResourceId::parse(ID).expect_err("bare id is not a literal reference");
        assert!(matches!(err, FhirError::InvalidReference(_)));
    }

    #[test]
    fn rejects_non_uuid_id() {
        let err = ResourceId::parse("Observation/abc").expect_err("non uuid");
        assert!(matches!(err, FhirError::InvalidUuid(_)));
    }

    #[test]
    fn typed_parse_checks_resource_type() {
        let err = ResourceId::parse_typed(&format!("Patient/{ID}"), "Observation")
            .expect_err("wrong type");
        assert!(matches!(err, FhirError::InvalidReference(_)));

        let id = ResourceId::parse_id_or_reference(ID, "DiagnosticReport").expect("bare uuid");
        assert_eq!(id.to_string(), ID);
    }

    #[test]
    fn local_reference_is_detected() {
        let reference = Reference::contained("obs-1");
        assert_eq!(reference.local_id(), Some("obs-1"));
        assert_eq!(Reference::default().local_id(), None);
        assert_eq!(Reference::to(&ResourceId::parse(&format!("Patient/{ID}")).unwrap()).local_id(), None);
    }

    #[test]
    fn first_code_skips_blank_codings() {
        let concept = CodeableConcept {
            coding: vec![
                Coding {
                    display: Some("role".into()),
                    ..Coding::default()
                },
                Coding::new("http://hl7.org/fhir/v2/0074", "MB", None),
            ],
            text: None,
        };
        assert_eq!(concept.first_code(), Some("MB"));
    }
}
