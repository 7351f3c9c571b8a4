//! Fixtures shared by handler and registry tests.

use crate::config::BridgeConfig;
use crate::context::RequestContext;
use crate::federation::{FederationError, FederationResult, RemoteReportSource};
use crate::memory::InMemoryStore;
use crate::model::{Concept, Patient, Provider, Visit};
use chrono::{DateTime, TimeZone, Utc};
use fhir::{
    Bundle, CodeableConcept, Coding, DiagnosticReport, ImagingStudy, Observation, Performer,
    Reference, Resource, ResourceId, SYSTEM_V2_0074, SYSTEM_V2_0078,
};
use std::cell::RefCell;

pub(crate) fn issued() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap()
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 14, 0, 0).unwrap()
}

pub(crate) struct Fixture {
    pub store: InMemoryStore,
    pub config: BridgeConfig,
    pub patient: Patient,
    pub provider: Provider,
    pub visit: Visit,
}

impl Fixture {
    pub fn new() -> Self {
        let config = BridgeConfig::default();
        let mut store = InMemoryStore::seeded(&config);
        for (code, name) in [
            ("CULTURE", "Blood culture"),
            ("ORGANISM", "Organism"),
            ("AMPICILLIN", "Ampicillin"),
            ("GENTAMICIN", "Gentamicin"),
            ("HEART_RATE", "Heart rate"),
            ("E_COLI", "Escherichia coli"),
        ] {
            store.add_concept(Concept::new(code, name));
        }
        let patient = store.add_patient(Patient::new("Amina", "Yusuf"));
        let provider = store.add_provider(Provider::new("Dr Okafor"));
        let visit = store.add_visit(Visit::new(patient.uuid, issued()));
        Self {
            store,
            config,
            patient,
            provider,
            visit,
        }
    }
}

pub(crate) fn context<'a>(
    store: &'a mut InMemoryStore,
    config: &'a BridgeConfig,
) -> RequestContext<'a> {
    RequestContext::new(store, config, "tester").at(now())
}

pub(crate) fn coded(system: &str, code: &str) -> CodeableConcept {
    CodeableConcept::from_coding(Coding::new(system, code, None))
}

pub(crate) fn observation(id: &str, code: &str) -> Observation {
    Observation {
        id: Some(id.to_string()),
        code: coded("http://loinc.org", code),
        ..Observation::default()
    }
}

pub(crate) fn report_for(patient: &Patient, category: &str) -> DiagnosticReport {
    DiagnosticReport {
        status: Some("final".into()),
        category: Some(coded(SYSTEM_V2_0074, category)),
        subject: Some(Reference::to(&ResourceId::new("Patient", patient.uuid))),
        issued: Some(issued()),
        ..DiagnosticReport::default()
    }
}

pub(crate) fn with_performer(mut report: DiagnosticReport, provider: &Provider) -> DiagnosticReport {
    report.performer.push(Performer {
        role: None,
        actor: Reference::to(&ResourceId::new("Practitioner", provider.uuid)),
    });
    report
}

/// Culture → organism → two antibiotics, with interpretations on the organism and the leaves.
pub(crate) fn susceptibility_report(patient: &Patient, category: &str) -> DiagnosticReport {
    let mut culture = observation("culture", "CULTURE");
    culture.add_member(Reference::contained("organism"));

    let mut organism = observation("organism", "ORGANISM");
    organism.value_string = Some("E. coli".into());
    organism.interpretation = Some(coded(SYSTEM_V2_0078, "POS"));
    organism.add_member(Reference::contained("amp"));
    organism.add_member(Reference::contained("gent"));

    let mut amp = observation("amp", "AMPICILLIN");
    amp.value_string = Some(">16 mg/L".into());
    amp.interpretation = Some(coded(SYSTEM_V2_0078, "R"));

    let mut gent = observation("gent", "GENTAMICIN");
    gent.value_string = Some("<=1 mg/L".into());
    gent.interpretation = Some(coded(SYSTEM_V2_0078, "S"));

    let mut report = report_for(patient, category);
    report.result.push(Reference::contained("culture"));
    report.contained = vec![culture, organism, amp, gent]
        .into_iter()
        .map(Resource::from)
        .collect();
    report
}

/// Levels of the contained Observation tree rooted at `local_id`.
pub(crate) fn levels(report: &DiagnosticReport, local_id: &str) -> usize {
    let Some(root) = report.contained_observation(local_id) else {
        return 0;
    };
    1 + root
        .related
        .iter()
        .filter_map(|r| r.target.local_id())
        .map(|child| levels(report, child))
        .max()
        .unwrap_or(0)
}

/// The contained Observation a `#id` reference points at.
pub(crate) fn resolve<'r>(report: &'r DiagnosticReport, reference: &Reference) -> &'r Observation {
    let local = reference.local_id().expect("contained reference");
    report
        .contained_observation(local)
        .expect("contained observation")
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    pub reports: Vec<DiagnosticReport>,
    pub studies: Vec<ImagingStudy>,
    pub searches: RefCell<Vec<(String, String)>>,
}

impl RemoteReportSource for FakeRemote {
    fn search_reports(&self, given_name: &str, category_code: &str) -> FederationResult<Bundle> {
        self.searches
            .borrow_mut()
            .push((given_name.to_string(), category_code.to_string()));
        Ok(Bundle::searchset(
            self.reports.iter().cloned().map(Resource::from).collect(),
        ))
    }

    fn read_imaging_study(&self, id: &str) -> FederationResult<ImagingStudy> {
        self.studies
            .iter()
            .find(|s| s.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| FederationError::Status {
                status: 404,
                url: format!("http://fake/ImagingStudy/{id}"),
            })
    }
}
