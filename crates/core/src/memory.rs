//! In-memory implementation of the store traits.
//!
//! Used by tests and by the CLI, which persists it as a JSON snapshot between runs. It enforces
//! the integrity rules the handlers rely on: an Obs can only point at an encounter and a group
//! that already exist, and voiding cascades to group members.

use crate::config::BridgeConfig;
use crate::model::{
    ComplexView, Concept, Encounter, EncounterRole, EncounterType, Obs, Patient, Provider, Visit,
    VoidInfo,
};
use crate::store::{
    EncounterStore, MetadataStore, ObsStore, PatientStore, ProviderStore, StoreError,
    StoreResult, VisitStore,
};
use crate::classifier::ConceptBucket;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Business rule consulted before an encounter is voided. An error aborts the void and is
/// returned from [`EncounterStore::void_encounter`] unchanged.
pub type VoidGuard = fn(&Encounter) -> StoreResult<()>;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InMemoryStore {
    #[serde(default)]
    patients: Vec<Patient>,
    #[serde(default)]
    visits: Vec<Visit>,
    #[serde(default)]
    providers: Vec<Provider>,
    #[serde(default)]
    concepts: Vec<Concept>,
    #[serde(default)]
    encounter_types: Vec<EncounterType>,
    #[serde(default)]
    encounter_roles: Vec<EncounterRole>,
    #[serde(default)]
    encounters: Vec<Encounter>,
    #[serde(default)]
    obs: Vec<Obs>,
    #[serde(skip)]
    void_guard: Option<VoidGuard>,
}

impl InMemoryStore {
    /// A store holding the metadata `config` refers to: one concept per bucket, one encounter
    /// type per category mapping plus the default type, and the performer role.
    pub fn seeded(config: &BridgeConfig) -> Self {
        let mut store = Self::default();
        for bucket in ConceptBucket::ALL {
            let code = config.concepts.code_for(bucket);
            store.add_concept(Concept::new(code, format!("{bucket:?}")));
        }
        for mapping in &config.service_categories {
            store.add_encounter_type(EncounterType::new(mapping.encounter_type.clone()));
        }
        store.add_encounter_type(EncounterType::new(config.default_encounter_type.clone()));
        store.add_encounter_role(EncounterRole::new(config.performer_role.clone()));
        store
    }

    pub fn load_snapshot(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Backend(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| StoreError::Backend(format!("parse {}: {e}", path.display())))
    }

    pub fn write_snapshot(&self, path: &Path) -> StoreResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::Backend(format!("serialise snapshot: {e}")))?;
        std::fs::write(path, text)
            .map_err(|e| StoreError::Backend(format!("write {}: {e}", path.display())))
    }

    pub fn set_void_guard(&mut self, guard: VoidGuard) {
        self.void_guard = Some(guard);
    }

    pub fn add_patient(&mut self, patient: Patient) -> Patient {
        upsert(&mut self.patients, patient.clone(), |p| p.uuid == patient.uuid);
        patient
    }

    pub fn add_visit(&mut self, visit: Visit) -> Visit {
        upsert(&mut self.visits, visit.clone(), |v| v.uuid == visit.uuid);
        visit
    }

    pub fn add_provider(&mut self, provider: Provider) -> Provider {
        upsert(&mut self.providers, provider.clone(), |p| p.uuid == provider.uuid);
        provider
    }

    /// Concepts are keyed by code; re-adding a code replaces the previous concept.
    pub fn add_concept(&mut self, concept: Concept) -> Concept {
        upsert(&mut self.concepts, concept.clone(), |c| c.code == concept.code);
        concept
    }

    pub fn add_encounter_type(&mut self, encounter_type: EncounterType) -> EncounterType {
        upsert(&mut self.encounter_types, encounter_type.clone(), |t| {
            t.name == encounter_type.name
        });
        encounter_type
    }

    pub fn add_encounter_role(&mut self, role: EncounterRole) -> EncounterRole {
        upsert(&mut self.encounter_roles, role.clone(), |r| r.name == role.name);
        role
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn encounters(&self) -> &[Encounter] {
        &self.encounters
    }

    /// Every Obs of an encounter at any depth, voided ones included. This is the audit view.
    pub fn encounter_history(&self, encounter: Uuid) -> Vec<&Obs> {
        self.obs
            .iter()
            .filter(|o| o.encounter == Some(encounter))
            .collect()
    }

    fn obs_index(&self, uuid: Uuid) -> Option<usize> {
        self.obs.iter().position(|o| o.uuid == uuid)
    }

    fn void_obs_tree(&mut self, root: usize, void: &VoidInfo) {
        let mut pending = vec![root];
        while let Some(index) = pending.pop() {
            let uuid = self.obs[index].uuid;
            if self.obs[index].voided.is_none() {
                self.obs[index].voided = Some(void.clone());
            }
            pending.extend(
                self.obs
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| o.obs_group == Some(uuid))
                    .map(|(i, _)| i),
            );
        }
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, matches: impl Fn(&T) -> bool) {
    match items.iter().position(matches) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

impl EncounterStore for InMemoryStore {
    fn encounter_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Encounter>> {
        Ok(self.encounters.iter().find(|e| e.uuid == uuid).cloned())
    }

    fn save_encounter(&mut self, encounter: Encounter) -> StoreResult<Encounter> {
        if !self.patients.iter().any(|p| p.uuid == encounter.patient) {
            return Err(StoreError::Integrity(format!(
                "encounter {} refers to unknown patient {}",
                encounter.uuid, encounter.patient
            )));
        }
        if let Some(visit) = encounter.visit {
            if !self.visits.iter().any(|v| v.uuid == visit) {
                return Err(StoreError::Integrity(format!(
                    "encounter {} refers to unknown visit {visit}",
                    encounter.uuid
                )));
            }
        }
        upsert(&mut self.encounters, encounter.clone(), |e| {
            e.uuid == encounter.uuid
        });
        Ok(encounter)
    }

    fn void_encounter(&mut self, uuid: Uuid, void: VoidInfo) -> StoreResult<Encounter> {
        let index = self
            .encounters
            .iter()
            .position(|e| e.uuid == uuid)
            .ok_or(StoreError::Missing {
                entity: "Encounter",
                uuid,
            })?;

        if let Some(guard) = self.void_guard {
            guard(&self.encounters[index])?;
        }

        self.encounters[index].voided = Some(void.clone());
        let roots: Vec<usize> = self
            .obs
            .iter()
            .enumerate()
            .filter(|(_, o)| o.encounter == Some(uuid) && o.obs_group.is_none())
            .map(|(i, _)| i)
            .collect();
        for root in roots {
            self.void_obs_tree(root, &void);
        }

        Ok(self.encounters[index].clone())
    }
}

impl ObsStore for InMemoryStore {
    fn obs_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Obs>> {
        Ok(self.obs.iter().find(|o| o.uuid == uuid).cloned())
    }

    fn save_obs(&mut self, obs: Obs) -> StoreResult<Obs> {
        if !self.patients.iter().any(|p| p.uuid == obs.person) {
            return Err(StoreError::Integrity(format!(
                "obs {} refers to unknown person {}",
                obs.uuid, obs.person
            )));
        }
        if let Some(encounter) = obs.encounter {
            if !self.encounters.iter().any(|e| e.uuid == encounter) {
                return Err(StoreError::Integrity(format!(
                    "obs {} refers to unsaved encounter {encounter}",
                    obs.uuid
                )));
            }
        }
        if let Some(group) = obs.obs_group {
            if group == obs.uuid {
                return Err(StoreError::Integrity(format!(
                    "obs {} cannot be its own group",
                    obs.uuid
                )));
            }
            match self.obs.iter().find(|o| o.uuid == group) {
                None => {
                    return Err(StoreError::Integrity(format!(
                        "obs {} refers to unsaved group {group}",
                        obs.uuid
                    )))
                }
                Some(parent) if parent.is_voided() => {
                    return Err(StoreError::Integrity(format!(
                        "obs {} cannot join voided group {group}",
                        obs.uuid
                    )))
                }
                Some(_) => {}
            }
        }

        upsert(&mut self.obs, obs.clone(), |o| o.uuid == obs.uuid);
        Ok(obs)
    }

    fn void_obs(&mut self, uuid: Uuid, void: VoidInfo) -> StoreResult<()> {
        let index = self.obs_index(uuid).ok_or(StoreError::Missing {
            entity: "Obs",
            uuid,
        })?;
        self.void_obs_tree(index, &void);
        Ok(())
    }

    fn top_level_obs(&self, encounter: Uuid, include_voided: bool) -> StoreResult<Vec<Obs>> {
        Ok(self
            .obs
            .iter()
            .filter(|o| o.encounter == Some(encounter) && o.obs_group.is_none())
            .filter(|o| include_voided || !o.is_voided())
            .cloned()
            .collect())
    }

    fn group_members(&self, group: Uuid, include_voided: bool) -> StoreResult<Vec<Obs>> {
        Ok(self
            .obs
            .iter()
            .filter(|o| o.obs_group == Some(group))
            .filter(|o| include_voided || !o.is_voided())
            .cloned()
            .collect())
    }

    fn complex_obs(&self, uuid: Uuid, view: ComplexView) -> StoreResult<Option<Obs>> {
        Ok(self.obs.iter().find(|o| o.uuid == uuid).map(|o| {
            let mut obs = o.clone();
            obs.complex = o.complex.as_ref().map(|c| c.view(view));
            obs
        }))
    }
}

impl PatientStore for InMemoryStore {
    fn patient_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Patient>> {
        Ok(self.patients.iter().find(|p| p.uuid == uuid).cloned())
    }
}

impl VisitStore for InMemoryStore {
    fn visit_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Visit>> {
        Ok(self.visits.iter().find(|v| v.uuid == uuid).cloned())
    }
}

impl ProviderStore for InMemoryStore {
    fn provider_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Provider>> {
        Ok(self.providers.iter().find(|p| p.uuid == uuid).cloned())
    }
}

impl MetadataStore for InMemoryStore {
    fn concept_by_code(&self, code: &str) -> StoreResult<Option<Concept>> {
        Ok(self.concepts.iter().find(|c| c.code == code).cloned())
    }

    fn encounter_type_by_name(&self, name: &str) -> StoreResult<Option<EncounterType>> {
        Ok(self.encounter_types.iter().find(|t| t.name == name).cloned())
    }

    fn encounter_role_by_name(&self, name: &str) -> StoreResult<Option<EncounterRole>> {
        Ok(self.encounter_roles.iter().find(|r| r.name == name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn void_info() -> VoidInfo {
        VoidInfo {
            reason: "test".into(),
            voided_by: "tester".into(),
            date_voided: Utc::now(),
        }
    }

    fn store_with_encounter() -> (InMemoryStore, Patient, Encounter) {
        let mut store = InMemoryStore::seeded(&BridgeConfig::default());
        let patient = store.add_patient(Patient::new("Amina", "Yusuf"));
        let encounter = store
            .save_encounter(Encounter::new(
                patient.uuid,
                EncounterType::new("ICU"),
                Utc::now(),
            ))
            .expect("save encounter");
        (store, patient, encounter)
    }

    #[test]
    fn child_cannot_be_saved_before_its_group() {
        let (mut store, patient, encounter) = store_with_encounter();
        let mut child = Obs::new(patient.uuid, Concept::new("ABX", "Antibiotic"), None);
        child.encounter = Some(encounter.uuid);
        child.obs_group = Some(Uuid::new_v4());

        let err = store.save_obs(child).expect_err("orphan child");
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[test]
    fn obs_cannot_attach_to_unsaved_encounter() {
        let (mut store, patient, _) = store_with_encounter();
        let mut obs = Obs::new(patient.uuid, Concept::new("X", "X"), None);
        obs.encounter = Some(Uuid::new_v4());

        assert!(matches!(
            store.save_obs(obs),
            Err(StoreError::Integrity(_))
        ));
    }

    #[test]
    fn voiding_a_group_voids_members_but_keeps_history() {
        let (mut store, patient, encounter) = store_with_encounter();
        let mut group = Obs::new(patient.uuid, Concept::new("GRP", "Group"), None);
        group.encounter = Some(encounter.uuid);
        let group = store.save_obs(group).expect("group");

        let mut member = Obs::new(patient.uuid, Concept::new("M", "Member"), None);
        member.encounter = Some(encounter.uuid);
        member.obs_group = Some(group.uuid);
        store.save_obs(member).expect("member");

        store.void_obs(group.uuid, void_info()).expect("void");

        assert!(store
            .top_level_obs(encounter.uuid, false)
            .expect("top level")
            .is_empty());
        assert!(store
            .group_members(group.uuid, false)
            .expect("members")
            .is_empty());
        assert_eq!(store.group_members(group.uuid, true).expect("members").len(), 1);
        assert_eq!(store.encounter_history(encounter.uuid).len(), 2);
    }

    #[test]
    fn void_guard_rejects_encounter_void() {
        let (mut store, _, encounter) = store_with_encounter();
        store.set_void_guard(|_| Err(StoreError::Rejected("encounter is locked".to_string())));

        let err = store
            .void_encounter(encounter.uuid, void_info())
            .expect_err("guard rejects");
        match err {
            StoreError::Rejected(msg) => assert_eq!(msg, "encounter is locked"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let (store, _, encounter) = store_with_encounter();
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("store.json");

        store.write_snapshot(&path).expect("write");
        let loaded = InMemoryStore::load_snapshot(&path).expect("load");

        assert_eq!(
            loaded.encounter_by_uuid(encounter.uuid).expect("lookup"),
            Some(encounter)
        );
        assert!(loaded
            .concept_by_code(crate::constants::RESULT_CONCEPT_CODE)
            .expect("concept")
            .is_some());
    }
}
