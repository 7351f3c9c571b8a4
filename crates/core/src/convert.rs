//! Single-node translation between FHIR wire resources and native Obs.
//!
//! Write-path functions never fail on bad input: field problems are pushed onto an `issues`
//! list and the node is skipped, so the caller can report every problem of a request at once.
//! Only store failures are returned as errors.

use crate::constants::{OBSERVATION_STATUS_FINAL, PATIENT};
use crate::model::{ComplexData, Concept, Interpretation, Obs, ObsValue};
use crate::store::{MetadataStore, StoreResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use fhir::{
    Attachment, CodeableConcept, Coding, ImagingStudy, Observation, ObservationValue, Quantity,
    Reference, ResourceId, SYSTEM_V2_0078,
};
use uuid::Uuid;

/// Internal interpretation ⇄ HL7 v2 table 0078 code. Flags not listed have no external form.
const INTERPRETATION_CODES: [(Interpretation, &str); 5] = [
    (Interpretation::Resistant, "R"),
    (Interpretation::Intermediate, "I"),
    (Interpretation::Susceptible, "S"),
    (Interpretation::Positive, "POS"),
    (Interpretation::Negative, "NEG"),
];

pub fn encode_interpretation(interpretation: Option<Interpretation>) -> Option<CodeableConcept> {
    let interpretation = interpretation?;
    INTERPRETATION_CODES
        .iter()
        .find(|(internal, _)| *internal == interpretation)
        .map(|(_, code)| {
            CodeableConcept::from_coding(Coding::new(SYSTEM_V2_0078, *code, None))
        })
}

/// Decode the first coding only. Unknown systems or codes mean "no interpretation".
pub fn decode_interpretation(concept: Option<&CodeableConcept>) -> Option<Interpretation> {
    let coding = concept?.coding.first()?;
    if coding.system.as_deref() != Some(SYSTEM_V2_0078) {
        return None;
    }
    let code = coding.code.as_deref()?;
    INTERPRETATION_CODES
        .iter()
        .find(|(_, external)| *external == code)
        .map(|(internal, _)| *internal)
}

/// Values a parent supplies to every node it converts on the write path.
#[derive(Clone, Copy, Debug)]
pub struct NodeContext {
    pub person: Uuid,
    pub issued: DateTime<Utc>,
}

/// Values a report supplies to every Observation it reconstructs on the read path.
#[derive(Clone, Debug)]
pub struct ReadContext {
    pub patient: Uuid,
    pub patient_display: String,
    pub issued: DateTime<Utc>,
}

impl ReadContext {
    pub fn subject(&self) -> Reference {
        Reference::to(&ResourceId::new(PATIENT, self.patient)).with_display(&self.patient_display)
    }
}

/// Build an unsaved Obs from one Observation. Links (encounter, group) are left to the
/// caller, as is the value/interpretation policy for branch nodes.
pub fn observation_to_obs<S>(
    observation: &Observation,
    ctx: &NodeContext,
    store: &S,
    issues: &mut Vec<String>,
) -> StoreResult<Option<Obs>>
where
    S: MetadataStore + ?Sized,
{
    let Some(code) = observation.code.first_code() else {
        issues.push("Observation.code is required".to_string());
        return Ok(None);
    };
    let Some(concept) = store.concept_by_code(code)? else {
        issues.push(format!("Concept for Observation.code '{code}' not found"));
        return Ok(None);
    };

    let value = match observation.value() {
        None => None,
        Some(value) => match obs_value(value, code, store, issues)? {
            Some(v) => Some(v),
            None => return Ok(None),
        },
    };

    let obs_datetime = observation.effective_date_time.or(Some(ctx.issued));
    let mut obs = Obs::new(ctx.person, concept, obs_datetime);
    obs.value = value;
    obs.interpretation = decode_interpretation(observation.interpretation.as_ref());
    obs.comment = observation.comment.clone();
    Ok(Some(obs))
}

fn obs_value<S>(
    value: ObservationValue,
    code: &str,
    store: &S,
    issues: &mut Vec<String>,
) -> StoreResult<Option<ObsValue>>
where
    S: MetadataStore + ?Sized,
{
    let converted = match value {
        ObservationValue::Quantity(Quantity { value: Some(v), unit }) => ObsValue::Numeric {
            value: v,
            units: unit,
        },
        ObservationValue::Quantity(Quantity { value: None, .. }) => {
            issues.push(format!(
                "Observation.valueQuantity.value is required for '{code}'"
            ));
            return Ok(None);
        }
        ObservationValue::String(text) => ObsValue::Text(text),
        ObservationValue::DateTime(dt) => ObsValue::DateTime(dt),
        ObservationValue::CodeableConcept(answer) => {
            let Some(answer_code) = answer.first_code() else {
                issues.push(format!(
                    "Observation.valueCodeableConcept for '{code}' has no code"
                ));
                return Ok(None);
            };
            match store.concept_by_code(answer_code)? {
                Some(concept) => ObsValue::Coded(concept),
                None => {
                    issues.push(format!(
                        "Concept for Observation.valueCodeableConcept '{answer_code}' not found"
                    ));
                    return Ok(None);
                }
            }
        }
    };
    Ok(Some(converted))
}

/// Reconstruct an Observation from a stored Obs under a fresh transient id.
pub fn obs_to_observation(obs: &Obs, ctx: &ReadContext) -> Observation {
    let mut observation = Observation {
        id: Some(Uuid::new_v4().to_string()),
        status: Some(OBSERVATION_STATUS_FINAL.to_string()),
        code: concept_to_codeable(&obs.concept),
        subject: Some(ctx.subject()),
        effective_date_time: obs.obs_datetime,
        issued: Some(ctx.issued),
        interpretation: encode_interpretation(obs.interpretation),
        comment: obs.comment.clone(),
        ..Observation::default()
    };
    observation.set_value(obs.value.as_ref().map(|value| match value {
        ObsValue::Numeric { value, units } => ObservationValue::Quantity(Quantity {
            value: Some(*value),
            unit: units.clone(),
        }),
        ObsValue::Text(text) => ObservationValue::String(text.clone()),
        ObsValue::DateTime(dt) => ObservationValue::DateTime(*dt),
        ObsValue::Coded(concept) => ObservationValue::CodeableConcept(concept_to_codeable(concept)),
    }));
    observation
}

fn concept_to_codeable(concept: &Concept) -> CodeableConcept {
    CodeableConcept::from_coding(Coding {
        system: None,
        code: Some(concept.code.clone()),
        display: Some(concept.name.clone()),
    })
}

/// Presented form → complex Obs. `creation` defaults to the report's issued date.
pub fn attachment_to_obs(
    attachment: &Attachment,
    concept: &Concept,
    ctx: &NodeContext,
    issues: &mut Vec<String>,
) -> Option<Obs> {
    let data = match attachment.data.as_deref() {
        None => Vec::new(),
        Some(encoded) => match STANDARD.decode(encoded.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                issues.push(format!(
                    "DiagnosticReport.presentedForm '{}' data is not valid base64: {e}",
                    attachment.title.as_deref().unwrap_or("untitled")
                ));
                return None;
            }
        },
    };

    let mut obs = Obs::new(ctx.person, concept.clone(), Some(ctx.issued));
    obs.complex = Some(ComplexData {
        title: attachment.title.clone(),
        mime_type: attachment.content_type.clone(),
        data,
        url: attachment.url.clone(),
        creation: attachment.creation.or(Some(ctx.issued)),
    });
    Some(obs)
}

/// Complex Obs → presented form. Obs without a payload yield nothing.
pub fn obs_to_attachment(obs: &Obs) -> Option<Attachment> {
    let complex = obs.complex.as_ref()?;
    Some(Attachment {
        content_type: complex.mime_type.clone(),
        data: (!complex.data.is_empty()).then(|| STANDARD.encode(&complex.data)),
        url: complex.url.clone(),
        title: complex.title.clone(),
        creation: complex.creation,
    })
}

/// ImagingStudy → Obs holding the study UID. The study must already have passed
/// [`ImagingStudy::validate`].
pub fn imaging_study_to_obs(study: &ImagingStudy, concept: &Concept, ctx: &NodeContext) -> Obs {
    let mut obs = Obs::new(
        ctx.person,
        concept.clone(),
        study.started.or(Some(ctx.issued)),
    );
    obs.value = study.uid.clone().map(ObsValue::Text);
    obs.comment = study.description.clone();
    obs
}

/// Imaging Obs → `ImagingStudy/<obs uuid>` reference, displayed as the study UID.
pub fn obs_to_imaging_reference(obs: &Obs) -> Reference {
    let reference = Reference::to(&ResourceId::new(crate::constants::IMAGING_STUDY, obs.uuid));
    match &obs.value {
        Some(ObsValue::Text(uid)) => reference.with_display(uid),
        _ => reference,
    }
}
