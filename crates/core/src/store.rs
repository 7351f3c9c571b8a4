//! Persistence collaborator interfaces.
//!
//! The bridge never owns storage. Handlers talk to these traits, which an OpenMRS-backed
//! implementation (or [`crate::memory::InMemoryStore`]) provides. Transaction boundaries belong
//! to the implementation.

use crate::model::{
    ComplexView, Concept, Encounter, EncounterRole, EncounterType, Obs, Patient, Provider, Visit,
    VoidInfo,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} '{uuid}' not found")]
    Missing { entity: &'static str, uuid: Uuid },
    #[error("integrity violation: {0}")]
    Integrity(String),
    /// A business rule refused a state-changing operation.
    #[error("{0}")]
    Rejected(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait EncounterStore {
    fn encounter_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Encounter>>;

    /// Insert or replace an encounter; returns the stored copy.
    fn save_encounter(&mut self, encounter: Encounter) -> StoreResult<Encounter>;

    /// Void an encounter together with all of its Obs.
    fn void_encounter(&mut self, uuid: Uuid, void: VoidInfo) -> StoreResult<Encounter>;
}

pub trait ObsStore {
    fn obs_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Obs>>;

    /// Insert or replace an Obs. The encounter and group it points at must already exist.
    fn save_obs(&mut self, obs: Obs) -> StoreResult<Obs>;

    /// Void an Obs and, recursively, its group members.
    fn void_obs(&mut self, uuid: Uuid, void: VoidInfo) -> StoreResult<()>;

    /// Obs of an encounter that belong to no group, in insertion order.
    fn top_level_obs(&self, encounter: Uuid, include_voided: bool) -> StoreResult<Vec<Obs>>;

    /// Direct members of an Obs group, in insertion order.
    fn group_members(&self, group: Uuid, include_voided: bool) -> StoreResult<Vec<Obs>>;

    /// An Obs with its complex payload rendered through `view`.
    fn complex_obs(&self, uuid: Uuid, view: ComplexView) -> StoreResult<Option<Obs>>;
}

pub trait PatientStore {
    fn patient_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Patient>>;
}

pub trait VisitStore {
    fn visit_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Visit>>;
}

pub trait ProviderStore {
    fn provider_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Provider>>;
}

/// Concept dictionary and encounter metadata.
pub trait MetadataStore {
    fn concept_by_code(&self, code: &str) -> StoreResult<Option<Concept>>;
    fn encounter_type_by_name(&self, name: &str) -> StoreResult<Option<EncounterType>>;
    fn encounter_role_by_name(&self, name: &str) -> StoreResult<Option<EncounterRole>>;
}

/// Everything a report handler needs from persistence.
pub trait ClinicalStore:
    EncounterStore + ObsStore + PatientStore + VisitStore + ProviderStore + MetadataStore
{
}

impl<T> ClinicalStore for T where
    T: EncounterStore + ObsStore + PatientStore + VisitStore + ProviderStore + MetadataStore
{
}
