//! Intensive care reports: flat vital-sign style results, interpretation kept at every level.

use super::mapper::{InterpretationLevels, ReportMapper, ResultPolicy};
use super::DiagnosticReportHandler;
use crate::context::RequestContext;
use crate::error::BridgeResult;
use crate::registry::ServiceCategory;
use fhir::DiagnosticReport;

#[derive(Clone, Debug)]
pub struct IcuHandler {
    mapper: ReportMapper,
}

impl IcuHandler {
    pub fn new() -> Self {
        Self {
            mapper: ReportMapper::new(ResultPolicy {
                interpretation: InterpretationLevels::EveryLevel,
                nested_classification: false,
                imaging_studies: false,
            }),
        }
    }

    pub fn policy(&self) -> ResultPolicy {
        self.mapper.policy()
    }
}

impl Default for IcuHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticReportHandler for IcuHandler {
    fn service_category(&self) -> ServiceCategory {
        ServiceCategory::Icu
    }

    fn get_by_id(&self, ctx: &RequestContext<'_>, id: &str) -> BridgeResult<DiagnosticReport> {
        self.mapper.get_by_id(ctx, id)
    }

    fn save(
        &self,
        ctx: &mut RequestContext<'_>,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport> {
        self.mapper.save(ctx, report)
    }

    fn update(
        &self,
        ctx: &mut RequestContext<'_>,
        id: &str,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport> {
        self.mapper.update(ctx, id, report)
    }

    fn retire(&self, ctx: &mut RequestContext<'_>, id: &str) -> BridgeResult<()> {
        self.mapper.retire(ctx, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::test_support::{
        context, issued, levels, observation, report_for, resolve, susceptibility_report,
        with_performer, Fixture,
    };
    use fhir::{Quantity, Reference, Resource, SYSTEM_V2_0074, SYSTEM_V2_0078};

    #[test]
    fn save_then_get_round_trips_report_header() {
        let mut fx = Fixture::new();
        let handler = IcuHandler::new();

        let mut heart_rate = observation("hr", "HEART_RATE");
        heart_rate.value_quantity = Some(Quantity {
            value: Some(112.0),
            unit: Some("/min".into()),
        });
        let mut report = with_performer(report_for(&fx.patient, "ICU"), &fx.provider);
        report.context = Some(Reference::to(&fhir::ResourceId::new("Encounter", fx.visit.uuid)));
        report.result.push(Reference::contained("hr"));
        report.contained.push(Resource::from(heart_rate));

        let mut ctx = context(&mut fx.store, &fx.config);
        let saved = handler.save(&mut ctx, report).expect("save");
        let id = saved.id.clone().expect("id");
        let read = handler.get_by_id(&ctx, &id).expect("get");

        assert_eq!(read.id, saved.id);
        assert_eq!(read.issued, Some(issued()));
        assert_eq!(
            read.subject.as_ref().and_then(|s| s.reference.clone()),
            Some(format!("Patient/{}", fx.patient.uuid))
        );
        assert_eq!(
            read.subject.as_ref().and_then(|s| s.display.clone()),
            Some("Amina Yusuf".to_string())
        );
        let category = read.category.as_ref().expect("category");
        assert_eq!(category.coding[0].system.as_deref(), Some(SYSTEM_V2_0074));
        assert_eq!(category.coding[0].code.as_deref(), Some("ICU"));
        assert_eq!(read.status.as_deref(), Some("final"));
        assert_eq!(
            read.context.as_ref().and_then(|c| c.reference.clone()),
            Some(format!("Encounter/{}", fx.visit.uuid))
        );
        assert_eq!(read.performer.len(), 1);
        assert_eq!(
            read.performer[0].actor.display.as_deref(),
            Some("Dr Okafor")
        );

        assert_eq!(read.result.len(), 1);
        let hr = resolve(&read, &read.result[0]);
        assert_eq!(hr.value_quantity.as_ref().and_then(|q| q.value), Some(112.0));
        assert_eq!(hr.status.as_deref(), Some("final"));

        let by_reference = handler
            .get_by_id(&ctx, &format!("DiagnosticReport/{id}"))
            .expect("get by reference");
        assert_eq!(by_reference.id, read.id);
    }

    #[test]
    fn interpretation_is_kept_on_every_level() {
        let mut fx = Fixture::new();
        let handler = IcuHandler::new();
        let report = susceptibility_report(&fx.patient, "ICU");

        let mut ctx = context(&mut fx.store, &fx.config);
        let saved = handler.save(&mut ctx, report).expect("save");

        assert_eq!(levels(&saved, saved.result[0].local_id().expect("local")), 3);
        let culture = resolve(&saved, &saved.result[0]);
        let organism = resolve(&saved, &culture.related[0].target);
        assert!(!organism.has_value());
        let code = organism
            .interpretation
            .as_ref()
            .map(|i| (i.coding[0].system.clone(), i.coding[0].code.clone()));
        assert_eq!(
            code,
            Some((Some(SYSTEM_V2_0078.to_string()), Some("POS".to_string())))
        );
    }

    #[test]
    fn imaging_studies_are_ignored() {
        let mut fx = Fixture::new();
        let handler = IcuHandler::new();
        let mut report = report_for(&fx.patient, "ICU");
        report
            .imaging_study
            .push(Reference::contained("missing-study"));

        let mut ctx = context(&mut fx.store, &fx.config);
        let saved = handler.save(&mut ctx, report).expect("save");
        assert!(saved.imaging_study.is_empty());
    }

    #[test]
    fn subject_name_search_is_not_permitted() {
        let mut fx = Fixture::new();
        let handler = IcuHandler::new();
        let mut ctx = context(&mut fx.store, &fx.config);

        let err = handler
            .get_by_subject_name(&mut ctx, "Amina")
            .expect_err("not supported");
        assert!(matches!(err, BridgeError::OperationNotPermitted(_)));
    }

    #[test]
    fn missing_required_fields_are_reported_together() {
        let mut fx = Fixture::new();
        let handler = IcuHandler::new();
        let mut report = report_for(&fx.patient, "ICU");
        report.subject = None;
        report.issued = None;

        let mut ctx = context(&mut fx.store, &fx.config);
        let err = handler.save(&mut ctx, report).expect_err("invalid");
        assert_eq!(
            err.issues(),
            &[
                "DiagnosticReport.subject is required".to_string(),
                "DiagnosticReport.issued is required".to_string(),
            ]
        );
        drop(ctx);
        assert!(fx.store.encounters().is_empty());
    }
}
