//! Bridge runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into handlers. The
//! concept table replaces per-handler hardcoded concept lookups: every bucket is bound to one
//! well-known concept code here and nowhere else.

use crate::classifier::ConceptBucket;
use crate::constants::{
    DEFAULT_ENCOUNTER_TYPE, DEFAULT_PERFORMER_ROLE, IMAGING_STUDY_CONCEPT_CODE, NAME_CONCEPT_CODE,
    PRESENTED_FORM_CONCEPT_CODE, RESULT_CONCEPT_CODE, STATUS_CONCEPT_CODE,
};
use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Bucket tag → well-known concept code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConceptTable {
    pub result: String,
    pub presented_form: String,
    pub name: String,
    pub status: String,
    pub imaging_study: String,
}

impl Default for ConceptTable {
    fn default() -> Self {
        Self {
            result: RESULT_CONCEPT_CODE.into(),
            presented_form: PRESENTED_FORM_CONCEPT_CODE.into(),
            name: NAME_CONCEPT_CODE.into(),
            status: STATUS_CONCEPT_CODE.into(),
            imaging_study: IMAGING_STUDY_CONCEPT_CODE.into(),
        }
    }
}

impl ConceptTable {
    pub fn code_for(&self, bucket: ConceptBucket) -> &str {
        match bucket {
            ConceptBucket::Result => &self.result,
            ConceptBucket::PresentedForm => &self.presented_form,
            ConceptBucket::Name => &self.name,
            ConceptBucket::Status => &self.status,
            ConceptBucket::ImagingStudy => &self.imaging_study,
        }
    }

    pub fn bucket_for(&self, concept_code: &str) -> Option<ConceptBucket> {
        ConceptBucket::ALL
            .into_iter()
            .find(|bucket| self.code_for(*bucket) == concept_code)
    }
}

/// FHIR `category` code ⇄ encounter type name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceCategoryMapping {
    pub code: String,
    pub encounter_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default)]
    pub concepts: ConceptTable,
    #[serde(default = "default_service_categories")]
    pub service_categories: Vec<ServiceCategoryMapping>,
    #[serde(default = "default_encounter_type")]
    pub default_encounter_type: String,
    #[serde(default = "default_performer_role")]
    pub performer_role: String,
    /// Base URL of the federated radiology/microbiology FHIR server.
    #[serde(default)]
    pub radiology_server_url: Option<String>,
}

fn default_service_categories() -> Vec<ServiceCategoryMapping> {
    vec![
        ServiceCategoryMapping {
            code: "ICU".into(),
            encounter_type: "ICU".into(),
        },
        ServiceCategoryMapping {
            code: "MB".into(),
            encounter_type: "Microbiology".into(),
        },
    ]
}

fn default_encounter_type() -> String {
    DEFAULT_ENCOUNTER_TYPE.into()
}

fn default_performer_role() -> String {
    DEFAULT_PERFORMER_ROLE.into()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            concepts: ConceptTable::default(),
            service_categories: default_service_categories(),
            default_encounter_type: default_encounter_type(),
            performer_role: default_performer_role(),
            radiology_server_url: None,
        }
    }
}

impl BridgeConfig {
    /// Parse configuration from YAML text and validate it.
    ///
    /// Missing sections fall back to their defaults; unknown keys are rejected. Schema errors
    /// carry a best-effort path to the offending field.
    pub fn from_yaml(yaml_text: &str) -> BridgeResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);

        let config = match serde_path_to_error::deserialize::<_, BridgeConfig>(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(BridgeError::Config(format!(
                    "schema mismatch at {path}: {source}"
                )));
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let mut seen = HashSet::new();
        for bucket in ConceptBucket::ALL {
            let code = self.concepts.code_for(bucket);
            if code.trim().is_empty() {
                return Err(BridgeError::Config(format!(
                    "concept code for {bucket:?} cannot be empty"
                )));
            }
            if !seen.insert(code) {
                return Err(BridgeError::Config(format!(
                    "concept code '{code}' is bound to more than one bucket"
                )));
            }
        }

        let mut codes = HashSet::new();
        for mapping in &self.service_categories {
            if mapping.code.trim().is_empty() || mapping.encounter_type.trim().is_empty() {
                return Err(BridgeError::Config(
                    "service category mappings need a code and an encounter type".into(),
                ));
            }
            if !codes.insert(mapping.code.as_str()) {
                return Err(BridgeError::Config(format!(
                    "service category '{}' is mapped twice",
                    mapping.code
                )));
            }
        }

        if self.default_encounter_type.trim().is_empty() {
            return Err(BridgeError::Config(
                "default_encounter_type cannot be empty".into(),
            ));
        }

        if let Some(url) = &self.radiology_server_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(BridgeError::Config(format!(
                    "radiology_server_url must be an http(s) URL, got '{url}'"
                )));
            }
        }

        Ok(())
    }

    /// Encounter type name for a report category; absent categories use the default type and
    /// unmapped codes are taken as the encounter type name itself.
    pub fn encounter_type_for<'a>(&'a self, category_code: Option<&'a str>) -> &'a str {
        match category_code {
            None => &self.default_encounter_type,
            Some(code) => self
                .service_categories
                .iter()
                .find(|m| m.code == code)
                .map(|m| m.encounter_type.as_str())
                .unwrap_or(code),
        }
    }

    /// Category code for an encounter type name (reverse of [`Self::encounter_type_for`]).
    pub fn category_for<'a>(&'a self, encounter_type: &'a str) -> &'a str {
        self.service_categories
            .iter()
            .find(|m| m.encounter_type == encounter_type)
            .map(|m| m.code.as_str())
            .unwrap_or(encounter_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = BridgeConfig::from_yaml("{}").expect("defaults");
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn category_mapping_is_bidirectional() {
        let config = BridgeConfig::default();
        assert_eq!(config.encounter_type_for(Some("MB")), "Microbiology");
        assert_eq!(config.category_for("Microbiology"), "MB");
        assert_eq!(config.encounter_type_for(None), DEFAULT_ENCOUNTER_TYPE);
        assert_eq!(config.encounter_type_for(Some("LAB")), "LAB");
        assert_eq!(config.category_for("LAB"), "LAB");

        let incoming = String::from("RAD");
        assert_eq!(config.encounter_type_for(Some(incoming.as_str())), "RAD");
    }

    #[test]
    fn rejects_unknown_keys_with_path() {
        let err = BridgeConfig::from_yaml("concepts:\n  result: R\n  colour: blue\n")
            .expect_err("unknown key");
        match err {
            BridgeError::Config(msg) => assert!(msg.contains("concepts"), "{msg}"),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_shared_concept_codes() {
        let yaml = r#"
concepts:
  result: SAME
  presented_form: SAME
  name: N
  status: S
  imaging_study: I
"#;
        let err = BridgeConfig::from_yaml(yaml).expect_err("duplicate concept");
        assert!(err.to_string().contains("SAME"));
    }

    #[test]
    fn rejects_non_http_server_url() {
        let err = BridgeConfig::from_yaml("radiology_server_url: ftp://pacs\n")
            .expect_err("bad url");
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "performer_role: Lab Technician\nradiology_server_url: https://pacs.example.org/fhir"
        )
        .expect("write config");

        let config = BridgeConfig::load(file.path()).expect("load config");
        assert_eq!(config.performer_role, "Lab Technician");
        assert_eq!(
            config.radiology_server_url.as_deref(),
            Some("https://pacs.example.org/fhir")
        );
        assert_eq!(config.concepts, ConceptTable::default());
    }
}
