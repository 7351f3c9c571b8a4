//! FHIR Bundle wire model (search results only).

use crate::diagnostic_report::DiagnosticReport;
use crate::resource::Resource;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    pub fn searchset(resources: Vec<Resource>) -> Self {
        Self {
            bundle_type: Some("searchset".to_string()),
            total: u32::try_from(resources.len()).ok(),
            entry: resources
                .into_iter()
                .map(|r| BundleEntry {
                    full_url: None,
                    resource: Some(r),
                })
                .collect(),
        }
    }

    /// DiagnosticReport entries, in bundle order. Entries of other types are skipped.
    pub fn diagnostic_reports(&self) -> impl Iterator<Item = &DiagnosticReport> {
        self.entry.iter().filter_map(|e| match &e.resource {
            Some(Resource::DiagnosticReport(report)) => Some(report.as_ref()),
            _ => None,
        })
    }
}
