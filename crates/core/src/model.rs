//! Native clinical domain model: encounters owning forests of Obs.
//!
//! These types mirror the OpenMRS data model closely enough for the bridge. Every persistent
//! object gets its UUID at construction time, the way OpenMRS objects do, so an unsaved Obs can
//! already be referred to by its future identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A coded concept (what was measured, or a coded answer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub uuid: Uuid,
    /// Stable code used for lookups and for bucket classification.
    pub code: String,
    pub name: String,
}

impl Concept {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterType {
    pub uuid: Uuid,
    pub name: String,
}

impl EncounterType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterRole {
    pub uuid: Uuid,
    pub name: String,
}

impl EncounterRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub uuid: Uuid,
    pub name: String,
}

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub uuid: Uuid,
    pub given_name: String,
    pub family_name: String,
}

impl Patient {
    pub fn new(given_name: impl Into<String>, family_name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            given_name: given_name.into(),
            family_name: family_name.into(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
            .trim()
            .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub uuid: Uuid,
    pub patient: Uuid,
    pub started: DateTime<Utc>,
}

impl Visit {
    pub fn new(patient: Uuid, started: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            patient,
            started,
        }
    }
}

/// Soft-delete audit data. Voided objects are never physically removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInfo {
    pub reason: String,
    pub voided_by: String,
    pub date_voided: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterProvider {
    pub provider: Provider,
    pub role: EncounterRole,
}

/// A clinical encounter; the native container for one diagnostic report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub uuid: Uuid,
    pub encounter_datetime: DateTime<Utc>,
    pub patient: Uuid,
    pub encounter_type: EncounterType,
    pub visit: Option<Uuid>,
    #[serde(default)]
    pub providers: Vec<EncounterProvider>,
    #[serde(default)]
    pub voided: Option<VoidInfo>,
}

impl Encounter {
    pub fn new(
        patient: Uuid,
        encounter_type: EncounterType,
        encounter_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            encounter_datetime,
            patient,
            encounter_type,
            visit: None,
            providers: Vec::new(),
            voided: None,
        }
    }

    pub fn is_voided(&self) -> bool {
        self.voided.is_some()
    }

    pub fn providers_by_role<'a>(&'a self, role_name: &'a str) -> impl Iterator<Item = &'a Provider> {
        self.providers
            .iter()
            .filter(move |ep| ep.role.name == role_name)
            .map(|ep| &ep.provider)
    }
}

/// Clinical interpretation flag of an Obs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Interpretation {
    Normal,
    Abnormal,
    CriticallyAbnormal,
    Low,
    High,
    Resistant,
    Intermediate,
    Susceptible,
    Positive,
    Negative,
}

/// The value carried by a leaf Obs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ObsValue {
    Numeric { value: f64, units: Option<String> },
    Text(String),
    DateTime(DateTime<Utc>),
    Coded(Concept),
}

/// Binary payload of a complex Obs (attachments).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexData {
    pub title: Option<String>,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
    pub url: Option<String>,
    pub creation: Option<DateTime<Utc>>,
}

/// How much of a complex Obs payload a read returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComplexView {
    /// Full payload.
    Raw,
    /// Metadata and URL only.
    Hyperlink,
}

impl ComplexData {
    pub fn view(&self, view: ComplexView) -> ComplexData {
        match view {
            ComplexView::Raw => self.clone(),
            ComplexView::Hyperlink => ComplexData {
                data: Vec::new(),
                ..self.clone()
            },
        }
    }
}

/// One observation node. A node with group members carries no value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obs {
    pub uuid: Uuid,
    pub person: Uuid,
    pub concept: Concept,
    pub obs_datetime: Option<DateTime<Utc>>,
    pub encounter: Option<Uuid>,
    /// Owning group, if this Obs is a group member.
    pub obs_group: Option<Uuid>,
    pub value: Option<ObsValue>,
    pub interpretation: Option<Interpretation>,
    pub comment: Option<String>,
    #[serde(default)]
    pub complex: Option<ComplexData>,
    #[serde(default)]
    pub voided: Option<VoidInfo>,
}

impl Obs {
    pub fn new(person: Uuid, concept: Concept, obs_datetime: Option<DateTime<Utc>>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            person,
            concept,
            obs_datetime,
            encounter: None,
            obs_group: None,
            value: None,
            interpretation: None,
            comment: None,
            complex: None,
            voided: None,
        }
    }

    /// A fresh unsaved copy of the clinical content (concept, value, interpretation,
    /// comment, payload) with a new identity and no links.
    pub fn copy_content(&self) -> Self {
        Self {
            value: self.value.clone(),
            interpretation: self.interpretation,
            comment: self.comment.clone(),
            complex: self.complex.clone(),
            ..Obs::new(self.person, self.concept.clone(), self.obs_datetime)
        }
    }

    pub fn is_voided(&self) -> bool {
        self.voided.is_some()
    }
}
