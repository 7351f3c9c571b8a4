//! DiagnosticReport ⇄ Encounter/Obs orchestration shared by every handler.
//!
//! Handlers differ only in their [`ResultPolicy`]. The write path resolves and converts the
//! whole report before the store is touched, so a rejected request leaves nothing behind.

use crate::classifier::{classify, classify_nested, BucketMap, ConceptBucket};
use crate::config::BridgeConfig;
use crate::constants::{
    DIAGNOSTIC_REPORT, IMAGING_STUDY, OBSERVATION, PATIENT, PRACTITIONER,
    RETIRE_VOID_REASON, UPDATE_VOID_REASON_PREFIX, VISIT_CONTEXT,
};
use crate::context::RequestContext;
use crate::convert::{
    attachment_to_obs, imaging_study_to_obs, obs_to_attachment, obs_to_imaging_reference,
    obs_to_observation, observation_to_obs, NodeContext, ReadContext,
};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{
    ComplexView, Concept, Encounter, EncounterProvider, EncounterType, Obs, ObsValue, Patient,
};
use crate::store::{ClinicalStore, StoreError, StoreResult};
use crate::tree::{fold_tree, Node};
use chrono::{DateTime, Utc};
use fhir::{
    CodeableConcept, Coding, DiagnosticReport, ImagingStudy, Observation, Performer, Reference,
    Resource, ResourceId, SYSTEM_V2_0074,
};
use std::fmt;
use uuid::Uuid;

/// Which levels of a result tree keep their interpretation flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpretationLevels {
    LeavesOnly,
    EveryLevel,
}

/// Per-handler nesting conventions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResultPolicy {
    pub interpretation: InterpretationLevels,
    /// Descend into top-level groups whose concept matches no bucket when reading.
    pub nested_classification: bool,
    /// Map `imagingStudy` references; when false they are ignored with a warning.
    pub imaging_studies: bool,
}

enum ResultSource {
    Inline(Observation),
    Stored(Obs),
}

impl ResultSource {
    fn key(&self) -> ResultKey {
        match self {
            ResultSource::Inline(observation) => {
                ResultKey::Contained(observation.id.clone().unwrap_or_default())
            }
            ResultSource::Stored(obs) => ResultKey::Stored(obs.uuid),
        }
    }
}

/// Identity of a result node, compared along the path from its root to detect cycles.
#[derive(PartialEq, Eq)]
enum ResultKey {
    Contained(String),
    Stored(Uuid),
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKey::Contained(id) => write!(f, "#{id}"),
            ResultKey::Stored(uuid) => write!(f, "{OBSERVATION}/{uuid}"),
        }
    }
}

struct ReportHeader {
    patient: Patient,
    encounter_type: EncounterType,
    issued: DateTime<Utc>,
    visit: Option<Uuid>,
    providers: Vec<EncounterProvider>,
}

#[derive(Default)]
struct ReportContent {
    result_group: Option<Concept>,
    results: Vec<Node<Obs>>,
    imaging_group: Option<Concept>,
    imaging: Vec<Obs>,
    presented_forms: Vec<Obs>,
    name: Option<Obs>,
    status: Option<Obs>,
}

struct Flattened {
    id: String,
    observations: Vec<Observation>,
}

#[derive(Clone, Debug)]
pub(crate) struct ReportMapper {
    policy: ResultPolicy,
}

impl ReportMapper {
    pub(crate) fn new(policy: ResultPolicy) -> Self {
        Self { policy }
    }

    pub(crate) fn policy(&self) -> ResultPolicy {
        self.policy
    }

    pub(crate) fn get_by_id(
        &self,
        ctx: &RequestContext<'_>,
        id: &str,
    ) -> BridgeResult<DiagnosticReport> {
        tracing::debug!("get DiagnosticReport {id}");
        let encounter = find_encounter(ctx.store(), id)?;
        if encounter.is_voided() {
            return Err(not_found(id));
        }
        self.read(ctx, &encounter)
    }

    pub(crate) fn save(
        &self,
        ctx: &mut RequestContext<'_>,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport> {
        tracing::debug!(
            "save DiagnosticReport with {} result(s), category {:?}",
            report.result.len(),
            report.category_code()
        );
        let (header, content) = self.prepare(ctx, &report, None)?;

        let mut encounter = Encounter::new(
            header.patient.uuid,
            header.encounter_type,
            header.issued,
        );
        encounter.visit = header.visit;
        encounter.providers = header.providers;
        let encounter = ctx.store_mut().save_encounter(encounter)?;

        let saved = self.persist(ctx, &encounter, content)?;
        tracing::info!(
            "saved DiagnosticReport {} ({saved} obs) for patient {} as {}",
            encounter.uuid,
            encounter.patient,
            ctx.user()
        );
        self.read(ctx, &encounter)
    }

    pub(crate) fn update(
        &self,
        ctx: &mut RequestContext<'_>,
        id: &str,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport> {
        tracing::debug!("update DiagnosticReport {id}");
        let mut encounter = find_encounter(ctx.store(), id)?;
        if encounter.is_voided() {
            return Err(not_found(id));
        }

        let (header, content) = self.prepare(ctx, &report, Some(&encounter))?;
        encounter.encounter_datetime = header.issued;
        encounter.encounter_type = header.encounter_type;
        if header.visit.is_some() {
            encounter.visit = header.visit;
        }
        if !header.providers.is_empty() {
            encounter.providers = header.providers;
        }
        let encounter = ctx.store_mut().save_encounter(encounter)?;

        let void = ctx.void_info(format!(
            "{UPDATE_VOID_REASON_PREFIX} {}",
            ctx.now().to_rfc3339()
        ));
        let buckets = self.classify(ctx.store(), ctx.config(), encounter.uuid)?;
        let mut replaced = vec![
            ConceptBucket::Result,
            ConceptBucket::PresentedForm,
            ConceptBucket::Name,
            ConceptBucket::Status,
        ];
        if !content.imaging.is_empty() {
            replaced.push(ConceptBucket::ImagingStudy);
        }
        let mut voided = 0;
        for bucket in replaced {
            for obs in buckets.get(bucket) {
                ctx.store_mut().void_obs(obs.uuid, void.clone())?;
                voided += 1;
            }
        }

        let saved = self.persist(ctx, &encounter, content)?;
        tracing::info!(
            "updated DiagnosticReport {}: voided {voided} obs group(s), saved {saved} obs",
            encounter.uuid
        );
        self.read(ctx, &encounter)
    }

    pub(crate) fn retire(&self, ctx: &mut RequestContext<'_>, id: &str) -> BridgeResult<()> {
        let encounter = find_encounter(ctx.store(), id)?;
        if encounter.is_voided() {
            tracing::debug!("DiagnosticReport {} already retired", encounter.uuid);
            return Ok(());
        }

        let void = ctx.void_info(RETIRE_VOID_REASON);
        match ctx.store_mut().void_encounter(encounter.uuid, void) {
            Ok(_) => {
                tracing::info!("retired DiagnosticReport {} as {}", encounter.uuid, ctx.user());
                Ok(())
            }
            Err(cause) => {
                tracing::warn!("retire of DiagnosticReport {} failed: {cause}", encounter.uuid);
                Err(BridgeError::OperationNotPermitted(format!(
                    "OpenMRS has failed to retire Encounter '{}' due to : {cause}",
                    encounter.uuid
                )))
            }
        }
    }

    fn classify(
        &self,
        store: &dyn ClinicalStore,
        config: &BridgeConfig,
        encounter: Uuid,
    ) -> StoreResult<BucketMap> {
        let top_level = store.top_level_obs(encounter, false)?;
        if self.policy.nested_classification {
            classify_nested(top_level, &config.concepts, store)
        } else {
            Ok(classify(top_level, &config.concepts))
        }
    }

    // ---- read path ----

    fn read(&self, ctx: &RequestContext<'_>, encounter: &Encounter) -> BridgeResult<DiagnosticReport> {
        let store = ctx.store();
        let config = ctx.config();
        let patient = store
            .patient_by_uuid(encounter.patient)?
            .ok_or(StoreError::Missing {
                entity: "Patient",
                uuid: encounter.patient,
            })?;
        let rctx = ReadContext {
            patient: patient.uuid,
            patient_display: patient.display_name(),
            issued: encounter.encounter_datetime,
        };
        let buckets = self.classify(store, config, encounter.uuid)?;

        let type_name = encounter.encounter_type.name.as_str();
        let mut report = DiagnosticReport {
            id: Some(encounter.uuid.to_string()),
            issued: Some(encounter.encounter_datetime),
            subject: Some(rctx.subject()),
            category: Some(CodeableConcept::from_coding(Coding::new(
                SYSTEM_V2_0074,
                config.category_for(type_name),
                Some(type_name.to_string()),
            ))),
            context: encounter
                .visit
                .map(|visit| Reference::to(&ResourceId::new(VISIT_CONTEXT, visit))),
            performer: encounter
                .providers_by_role(&config.performer_role)
                .map(|provider| Performer {
                    role: Some(CodeableConcept::from_display(&config.performer_role)),
                    actor: Reference::to(&ResourceId::new(PRACTITIONER, provider.uuid))
                        .with_display(&provider.name),
                })
                .collect(),
            ..DiagnosticReport::default()
        };

        for group in buckets.get(ConceptBucket::Result) {
            for root in store.group_members(group.uuid, false)? {
                let flat = flatten(store, root, &rctx)?;
                report.result.push(Reference::contained(&flat.id));
                report
                    .contained
                    .extend(flat.observations.into_iter().map(Resource::from));
            }
        }

        for group in buckets.get(ConceptBucket::ImagingStudy) {
            for study in store.group_members(group.uuid, false)? {
                report.imaging_study.push(obs_to_imaging_reference(&study));
            }
        }

        for form in buckets.get(ConceptBucket::PresentedForm) {
            if let Some(obs) = store.complex_obs(form.uuid, ComplexView::Raw)? {
                report.presented_form.extend(obs_to_attachment(&obs));
            }
        }

        if let Some(name) = buckets.get(ConceptBucket::Name).first() {
            if let Some(ObsValue::Text(token)) = &name.value {
                let (system, code) = split_code_token(token);
                report.code = Some(CodeableConcept::from_coding(Coding {
                    system: system.map(str::to_string),
                    code: Some(code.to_string()),
                    display: name.comment.clone(),
                }));
            }
        }

        if let Some(status) = buckets.get(ConceptBucket::Status).first() {
            if let Some(ObsValue::Text(value)) = &status.value {
                report.status = Some(value.clone());
            }
        }

        Ok(report)
    }

    // ---- write path ----

    fn prepare(
        &self,
        ctx: &RequestContext<'_>,
        report: &DiagnosticReport,
        existing: Option<&Encounter>,
    ) -> BridgeResult<(ReportHeader, ReportContent)> {
        let store = ctx.store();
        let config = ctx.config();
        let mut issues = Vec::new();

        let patient = resolve_subject(store, report, &mut issues)?;
        if let (Some(patient), Some(existing)) = (&patient, existing) {
            if patient.uuid != existing.patient {
                issues.push("DiagnosticReport.subject cannot change on update".to_string());
            }
        }
        if report.issued.is_none() {
            issues.push("DiagnosticReport.issued is required".to_string());
        }
        let node_ctx = NodeContext {
            person: patient.as_ref().map_or(Uuid::nil(), |p| p.uuid),
            issued: report.issued.unwrap_or(ctx.now()),
        };

        let type_name = config.encounter_type_for(report.category_code());
        let encounter_type = store.encounter_type_by_name(type_name)?;
        if encounter_type.is_none() {
            issues.push(format!("Encounter type '{type_name}' not found"));
        }

        let visit = resolve_visit(store, report, patient.as_ref(), &mut issues)?;
        let providers = resolve_performers(store, config, report, &mut issues)?;

        let mut content = ReportContent::default();

        let resolved = resolve_results(store, report, &mut issues)?;
        content.results = self.convert_results(store, resolved, &node_ctx, &mut issues)?;
        if !content.results.is_empty() {
            content.result_group =
                bucket_concept(store, config, ConceptBucket::Result, &mut issues)?;
        }

        if self.policy.imaging_studies {
            if !report.imaging_study.is_empty() {
                if let Some(concept) =
                    bucket_concept(store, config, ConceptBucket::ImagingStudy, &mut issues)?
                {
                    content.imaging =
                        resolve_imaging(ctx, report, &concept, &node_ctx, &mut issues)?;
                    content.imaging_group = Some(concept);
                }
            }
        } else if !report.imaging_study.is_empty() {
            tracing::warn!(
                "ignoring {} imaging study reference(s) on a {type_name} report",
                report.imaging_study.len()
            );
        }

        if !report.presented_form.is_empty() {
            if let Some(concept) =
                bucket_concept(store, config, ConceptBucket::PresentedForm, &mut issues)?
            {
                content.presented_forms = report
                    .presented_form
                    .iter()
                    .filter_map(|form| attachment_to_obs(form, &concept, &node_ctx, &mut issues))
                    .collect();
            }
        }

        if let Some(code) = &report.code {
            let coding = code
                .coding
                .iter()
                .find(|c| c.code.as_deref().is_some_and(|v| !v.trim().is_empty()));
            let value = match coding {
                Some(c) => c
                    .code
                    .as_deref()
                    .map(|v| code_token(c.system.as_deref(), v)),
                None => code.text.clone(),
            };
            match value {
                Some(value) => {
                    if let Some(concept) =
                        bucket_concept(store, config, ConceptBucket::Name, &mut issues)?
                    {
                        let mut obs = Obs::new(node_ctx.person, concept, Some(node_ctx.issued));
                        obs.value = Some(ObsValue::Text(value));
                        obs.comment = coding.and_then(|c| c.display.clone());
                        content.name = Some(obs);
                    }
                }
                None => tracing::warn!("DiagnosticReport.code carries no code or text; not stored"),
            }
        }

        if let Some(status) = report.status.as_deref().filter(|s| !s.trim().is_empty()) {
            if let Some(concept) = bucket_concept(store, config, ConceptBucket::Status, &mut issues)?
            {
                let mut obs = Obs::new(node_ctx.person, concept, Some(node_ctx.issued));
                obs.value = Some(ObsValue::Text(status.to_string()));
                content.status = Some(obs);
            }
        }

        match (patient, encounter_type, report.issued) {
            (Some(patient), Some(encounter_type), Some(issued)) if issues.is_empty() => Ok((
                ReportHeader {
                    patient,
                    encounter_type,
                    issued,
                    visit,
                    providers,
                },
                content,
            )),
            _ => Err(BridgeError::UnprocessableInput(issues)),
        }
    }

    fn convert_results(
        &self,
        store: &dyn ClinicalStore,
        roots: Vec<Node<ResultSource>>,
        node_ctx: &NodeContext,
        issues: &mut Vec<String>,
    ) -> StoreResult<Vec<Node<Obs>>> {
        let mut converted = Vec::with_capacity(roots.len());
        for root in roots {
            let tree = root.try_map(|source, is_leaf, _| -> StoreResult<Option<Obs>> {
                let obs = match source {
                    ResultSource::Inline(observation) => {
                        observation_to_obs(&observation, node_ctx, store, issues)?
                    }
                    ResultSource::Stored(stored) => {
                        let mut copy = stored.copy_content();
                        copy.person = node_ctx.person;
                        copy.obs_datetime = copy.obs_datetime.or(Some(node_ctx.issued));
                        Some(copy)
                    }
                };
                Ok(obs.map(|obs| self.apply_policy(obs, is_leaf)))
            })?;
            if let Ok(tree) = tree.try_map(|obs, _, _| obs.ok_or(())) {
                converted.push(tree);
            }
        }
        Ok(converted)
    }

    /// Branch nodes never carry a value; their interpretation depends on the policy.
    fn apply_policy(&self, mut obs: Obs, is_leaf: bool) -> Obs {
        if !is_leaf {
            obs.value = None;
            if self.policy.interpretation == InterpretationLevels::LeavesOnly {
                obs.interpretation = None;
            }
        }
        obs
    }

    /// Persist converted content under a saved encounter. Returns the number of Obs written.
    fn persist(
        &self,
        ctx: &mut RequestContext<'_>,
        encounter: &Encounter,
        content: ReportContent,
    ) -> BridgeResult<usize> {
        let store = ctx.store_mut();
        let issued = encounter.encounter_datetime;
        let mut saved = 0;

        if let Some(concept) = content.result_group {
            let group = store.save_obs(top_level(
                Obs::new(encounter.patient, concept, Some(issued)),
                encounter,
            ))?;
            saved += 1;
            for tree in content.results {
                saved += save_tree(store, encounter.uuid, group.uuid, tree)?;
            }
        }

        if let Some(concept) = content.imaging_group {
            if !content.imaging.is_empty() {
                let group = store.save_obs(top_level(
                    Obs::new(encounter.patient, concept, Some(issued)),
                    encounter,
                ))?;
                saved += 1;
                for mut study in content.imaging {
                    study.encounter = Some(encounter.uuid);
                    study.obs_group = Some(group.uuid);
                    store.save_obs(study)?;
                    saved += 1;
                }
            }
        }

        let singles = content
            .presented_forms
            .into_iter()
            .chain(content.name)
            .chain(content.status);
        for obs in singles {
            store.save_obs(top_level(obs, encounter))?;
            saved += 1;
        }

        Ok(saved)
    }
}

fn not_found(id: &str) -> BridgeError {
    BridgeError::NotFound(format!("{DIAGNOSTIC_REPORT} '{id}' not found"))
}

fn find_encounter(store: &dyn ClinicalStore, id: &str) -> BridgeResult<Encounter> {
    let uuid =
        ResourceId::parse_id_or_reference(id, DIAGNOSTIC_REPORT).map_err(|_| not_found(id))?;
    store.encounter_by_uuid(uuid)?.ok_or_else(|| not_found(id))
}

fn top_level(mut obs: Obs, encounter: &Encounter) -> Obs {
    obs.encounter = Some(encounter.uuid);
    obs.obs_group = None;
    obs
}

/// Save a converted tree parent-first under `group`.
fn save_tree(
    store: &mut dyn ClinicalStore,
    encounter: Uuid,
    group: Uuid,
    root: Node<Obs>,
) -> StoreResult<usize> {
    let mut saved = 0;
    let mut pending = vec![(root, group)];
    while let Some((Node { value: mut obs, children }, parent)) = pending.pop() {
        obs.encounter = Some(encounter);
        obs.obs_group = Some(parent);
        let obs = store.save_obs(obs)?;
        saved += 1;
        pending.extend(children.into_iter().rev().map(|child| (child, obs.uuid)));
    }
    Ok(saved)
}

fn flatten(store: &dyn ClinicalStore, root: Obs, rctx: &ReadContext) -> StoreResult<Flattened> {
    fold_tree(
        root,
        |obs, _| store.group_members(obs.uuid, false),
        |obs, children: Vec<Flattened>, _| {
            let mut observation = obs_to_observation(&obs, rctx);
            let mut descendants = Vec::new();
            for child in children {
                observation.add_member(Reference::contained(&child.id));
                descendants.extend(child.observations);
            }
            let id = observation.id.clone().unwrap_or_default();
            let mut observations = vec![observation];
            observations.extend(descendants);
            Ok(Flattened { id, observations })
        },
    )
}

fn literal_reference(reference: &Reference) -> Option<&str> {
    reference
        .reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
}

fn resolve_subject(
    store: &dyn ClinicalStore,
    report: &DiagnosticReport,
    issues: &mut Vec<String>,
) -> StoreResult<Option<Patient>> {
    let Some(reference) = report.subject.as_ref().and_then(literal_reference) else {
        issues.push("DiagnosticReport.subject is required".to_string());
        return Ok(None);
    };
    let id = match ResourceId::parse_typed(reference, PATIENT) {
        Ok(id) => id,
        Err(e) => {
            issues.push(format!("DiagnosticReport.subject '{reference}' is invalid: {e}"));
            return Ok(None);
        }
    };
    let patient = store.patient_by_uuid(id.id())?;
    if patient.is_none() {
        issues.push(format!("Patient '{}' not found", id.id()));
    }
    Ok(patient)
}

fn resolve_visit(
    store: &dyn ClinicalStore,
    report: &DiagnosticReport,
    patient: Option<&Patient>,
    issues: &mut Vec<String>,
) -> StoreResult<Option<Uuid>> {
    let Some(reference) = report.context.as_ref().and_then(literal_reference) else {
        return Ok(None);
    };
    let id = match ResourceId::parse(reference) {
        Ok(id) => id,
        Err(e) => {
            issues.push(format!("DiagnosticReport.context '{reference}' is invalid: {e}"));
            return Ok(None);
        }
    };
    match store.visit_by_uuid(id.id())? {
        None => {
            issues.push(format!("Visit '{}' not found", id.id()));
            Ok(None)
        }
        Some(visit) => {
            if let Some(patient) = patient {
                if visit.patient != patient.uuid {
                    issues.push(format!(
                        "Visit '{}' belongs to a different patient",
                        visit.uuid
                    ));
                }
            }
            Ok(Some(visit.uuid))
        }
    }
}

fn resolve_performers(
    store: &dyn ClinicalStore,
    config: &BridgeConfig,
    report: &DiagnosticReport,
    issues: &mut Vec<String>,
) -> StoreResult<Vec<EncounterProvider>> {
    if report.performer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(role) = store.encounter_role_by_name(&config.performer_role)? else {
        issues.push(format!(
            "Encounter role '{}' not found",
            config.performer_role
        ));
        return Ok(Vec::new());
    };

    let mut providers = Vec::new();
    for (index, performer) in report.performer.iter().enumerate() {
        let Some(reference) = literal_reference(&performer.actor) else {
            issues.push(format!("DiagnosticReport.performer[{index}].actor is required"));
            continue;
        };
        let id = match ResourceId::parse_typed(reference, PRACTITIONER) {
            Ok(id) => id,
            Err(e) => {
                issues.push(format!(
                    "DiagnosticReport.performer[{index}].actor '{reference}' is invalid: {e}"
                ));
                continue;
            }
        };
        match store.provider_by_uuid(id.id())? {
            Some(provider) => providers.push(EncounterProvider {
                provider,
                role: role.clone(),
            }),
            None => issues.push(format!("Practitioner '{}' not found", id.id())),
        }
    }
    Ok(providers)
}

fn bucket_concept(
    store: &dyn ClinicalStore,
    config: &BridgeConfig,
    bucket: ConceptBucket,
    issues: &mut Vec<String>,
) -> StoreResult<Option<Concept>> {
    let code = config.concepts.code_for(bucket);
    let concept = store.concept_by_code(code)?;
    if concept.is_none() {
        issues.push(format!(
            "Concept '{code}' for {bucket:?} is missing from the concept dictionary"
        ));
    }
    Ok(concept)
}

/// Resolve one `result` or `related` target: contained `#id` first, then a stored Obs.
fn resolve_result(
    store: &dyn ClinicalStore,
    report: &DiagnosticReport,
    reference: &Reference,
    field: &str,
    issues: &mut Vec<String>,
) -> StoreResult<Option<ResultSource>> {
    if let Some(local) = reference.local_id() {
        return Ok(match report.contained_observation(local) {
            Some(observation) => Some(ResultSource::Inline(observation.clone())),
            None => {
                issues.push(format!(
                    "{field} refers to missing contained Observation '#{local}'"
                ));
                None
            }
        });
    }

    let Some(literal) = literal_reference(reference) else {
        issues.push(format!("{field} has no reference"));
        return Ok(None);
    };
    let id = match ResourceId::parse_typed(literal, OBSERVATION) {
        Ok(id) => id,
        Err(e) => {
            issues.push(format!("{field} '{literal}' cannot be resolved: {e}"));
            return Ok(None);
        }
    };
    match store.obs_by_uuid(id.id())? {
        Some(obs) if !obs.is_voided() => Ok(Some(ResultSource::Stored(obs))),
        _ => {
            issues.push(format!("{field} '{literal}' cannot be resolved: Observation not found"));
            Ok(None)
        }
    }
}

fn resolve_results(
    store: &dyn ClinicalStore,
    report: &DiagnosticReport,
    issues: &mut Vec<String>,
) -> StoreResult<Vec<Node<ResultSource>>> {
    let mut roots = Vec::new();
    for (index, reference) in report.result.iter().enumerate() {
        let field = format!("DiagnosticReport.result[{index}]");
        let Some(root) = resolve_result(store, report, reference, &field, issues)? else {
            continue;
        };
        // Keys of the nodes from the root down to the node being expanded.
        let mut path: Vec<ResultKey> = Vec::new();
        let tree = fold_tree(
            root,
            |source, depth| -> StoreResult<Vec<ResultSource>> {
                path.truncate(depth);
                path.push(source.key());
                let mut children = Vec::new();
                match source {
                    ResultSource::Inline(observation) => {
                        for (i, related) in observation.related.iter().enumerate() {
                            let related_field = format!(
                                "Observation '{}'.related[{i}]",
                                observation.id.as_deref().unwrap_or("?")
                            );
                            if let Some(child) =
                                resolve_result(store, report, &related.target, &related_field, issues)?
                            {
                                children.push((related_field, child));
                            }
                        }
                    }
                    ResultSource::Stored(obs) => {
                        for member in store.group_members(obs.uuid, false)? {
                            let member_field = format!("{OBSERVATION} '{}' member", obs.uuid);
                            children.push((member_field, ResultSource::Stored(member)));
                        }
                    }
                }
                Ok(children
                    .into_iter()
                    .filter_map(|(child_field, child)| {
                        let key = child.key();
                        if path.contains(&key) {
                            issues.push(format!(
                                "{child_field} '{key}' forms a cycle under {field}"
                            ));
                            None
                        } else {
                            Some(child)
                        }
                    })
                    .collect())
            },
            |source, children, _| Ok(Node {
                value: source,
                children,
            }),
        )?;
        roots.push(tree);
    }
    Ok(roots)
}

/// Resolve `imagingStudy` references: contained study, stored imaging Obs, then the radiology
/// server.
fn resolve_imaging(
    ctx: &RequestContext<'_>,
    report: &DiagnosticReport,
    concept: &Concept,
    node_ctx: &NodeContext,
    issues: &mut Vec<String>,
) -> StoreResult<Vec<Obs>> {
    let store = ctx.store();
    let mut studies = Vec::new();

    let push_study =
        |study: &ImagingStudy, field: &str, studies: &mut Vec<Obs>, issues: &mut Vec<String>| {
            let errors = study.validate();
            if errors.is_empty() {
                studies.push(imaging_study_to_obs(study, concept, node_ctx));
            } else {
                issues.extend(errors.into_iter().map(|e| format!("{field}: {e}")));
            }
        };

    for (index, reference) in report.imaging_study.iter().enumerate() {
        let field = format!("DiagnosticReport.imagingStudy[{index}]");

        if let Some(local) = reference.local_id() {
            match report.contained_imaging_study(local) {
                Some(study) => push_study(study, &field, &mut studies, issues),
                None => issues.push(format!(
                    "{field} refers to missing contained ImagingStudy '#{local}'"
                )),
            }
            continue;
        }

        let Some(literal) = literal_reference(reference) else {
            issues.push(format!("{field} has no reference"));
            continue;
        };

        if let Ok(id) = ResourceId::parse_typed(literal, IMAGING_STUDY) {
            if let Some(stored) = store.obs_by_uuid(id.id())? {
                if !stored.is_voided() && stored.concept.code == concept.code {
                    let mut copy = stored.copy_content();
                    copy.person = node_ctx.person;
                    studies.push(copy);
                    continue;
                }
            }
        }

        let Some(logical_id) = logical_id(literal, IMAGING_STUDY) else {
            issues.push(format!("{field} '{literal}' is not an ImagingStudy reference"));
            continue;
        };
        let Some(remote) = ctx.remote() else {
            issues.push(format!(
                "{field} '{literal}' is not stored locally and no radiology server is configured"
            ));
            continue;
        };
        tracing::debug!("fetching ImagingStudy {logical_id} from the radiology server");
        match remote.read_imaging_study(logical_id) {
            Ok(study) => push_study(&study, &field, &mut studies, issues),
            Err(e) => issues.push(format!("{field} '{literal}' could not be fetched: {e}")),
        }
    }

    Ok(studies)
}

/// Report code stored as a `system|code` token so the coding system survives a round trip.
fn code_token(system: Option<&str>, code: &str) -> String {
    match system.map(str::trim).filter(|s| !s.is_empty()) {
        Some(system) => format!("{system}|{code}"),
        None => code.to_string(),
    }
}

/// Inverse of [`code_token`]. Values without a URI before the bar are a bare code.
fn split_code_token(token: &str) -> (Option<&str>, &str) {
    match token.split_once('|') {
        Some((system, code)) if system.contains(':') => (Some(system), code),
        _ => (None, token),
    }
}

/// The id segment following `resource_type` in a literal or absolute reference.
fn logical_id<'a>(reference: &'a str, resource_type: &str) -> Option<&'a str> {
    let mut segments = reference.split('/');
    segments.by_ref().find(|segment| *segment == resource_type)?;
    segments.next().filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_id_handles_relative_and_absolute_references() {
        assert_eq!(logical_id("ImagingStudy/abc", IMAGING_STUDY), Some("abc"));
        assert_eq!(
            logical_id("https://pacs.example.org/fhir/ImagingStudy/77/_history/2", IMAGING_STUDY),
            Some("77")
        );
        assert_eq!(logical_id("Observation/abc", IMAGING_STUDY), None);
        assert_eq!(logical_id("ImagingStudy/", IMAGING_STUDY), None);
    }

    #[test]
    fn code_tokens_keep_the_system() {
        let token = code_token(Some("http://loinc.org"), "600-7");
        assert_eq!(token, "http://loinc.org|600-7");
        assert_eq!(split_code_token(&token), (Some("http://loinc.org"), "600-7"));
        assert_eq!(code_token(None, "600-7"), "600-7");
        assert_eq!(split_code_token("Gram stain | culture"), (None, "Gram stain | culture"));
    }

    #[test]
    fn policy_clears_branch_values_and_optionally_interpretation() {
        let mut branch = Obs::new(Uuid::new_v4(), Concept::new("ORG", "Organism"), None);
        branch.value = Some(ObsValue::Text("E. coli".into()));
        branch.interpretation = Some(crate::model::Interpretation::Positive);

        let leaves_only = ReportMapper::new(ResultPolicy {
            interpretation: InterpretationLevels::LeavesOnly,
            nested_classification: true,
            imaging_studies: true,
        });
        let every_level = ReportMapper::new(ResultPolicy {
            interpretation: InterpretationLevels::EveryLevel,
            ..leaves_only.policy()
        });

        let cleared = leaves_only.apply_policy(branch.clone(), false);
        assert_eq!(cleared.value, None);
        assert_eq!(cleared.interpretation, None);

        let kept = every_level.apply_policy(branch.clone(), false);
        assert_eq!(kept.value, None);
        assert_eq!(kept.interpretation, branch.interpretation);

        let leaf = leaves_only.apply_policy(branch.clone(), true);
        assert_eq!(leaf, branch);
    }
}
