//! FHIR Observation wire model.
//!
//! `value[x]` is a choice element on the wire; it is carried as one optional member per
//! supported type and exposed to callers as the [`ObservationValue`] tagged union.

use crate::datatypes::{CodeableConcept, Quantity, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The `value[x]` of an Observation.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservationValue {
    Quantity(Quantity),
    String(String),
    DateTime(DateTime<Utc>),
    CodeableConcept(CodeableConcept),
}

/// A link from one Observation to another (`Observation.related`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRelated {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<String>,
    pub target: Reference,
}

/// Relation type used for group members when flattening an Obs group.
pub const RELATION_HAS_MEMBER: &str = "has-member";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub code: CodeableConcept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_codeable_concept: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<ObservationRelated>,
}

impl Observation {
    /// The populated `value[x]`, if any. When a payload carries more than one choice member
    /// the first in declaration order wins.
    pub fn value(&self) -> Option<ObservationValue> {
        if let Some(q) = &self.value_quantity {
            return Some(ObservationValue::Quantity(q.clone()));
        }
        if let Some(s) = &self.value_string {
            return Some(ObservationValue::String(s.clone()));
        }
        if let Some(dt) = self.value_date_time {
            return Some(ObservationValue::DateTime(dt));
        }
        self.value_codeable_concept
            .clone()
            .map(ObservationValue::CodeableConcept)
    }

    /// Replace `value[x]`; `None` clears every choice member.
    pub fn set_value(&mut self, value: Option<ObservationValue>) {
        self.value_quantity = None;
        self.value_string = None;
        self.value_date_time = None;
        self.value_codeable_concept = None;

        match value {
            Some(ObservationValue::Quantity(q)) => self.value_quantity = Some(q),
            Some(ObservationValue::String(s)) => self.value_string = Some(s),
            Some(ObservationValue::DateTime(dt)) => self.value_date_time = Some(dt),
            Some(ObservationValue::CodeableConcept(c)) => self.value_codeable_concept = Some(c),
            None => {}
        }
    }

    pub fn has_value(&self) -> bool {
        self.value_quantity.is_some()
            || self.value_string.is_some()
            || self.value_date_time.is_some()
            || self.value_codeable_concept.is_some()
    }

    /// Add a `has-member` related link.
    pub fn add_member(&mut self, target: Reference) {
        self.related.push(ObservationRelated {
            relation_type: Some(RELATION_HAS_MEMBER.to_string()),
            target,
        });
    }
}
