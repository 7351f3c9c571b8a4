//! Microbiology reports.
//!
//! Results nest culture → organism → antibiotic susceptibility. Only leaves keep their
//! interpretation. Reports may carry imaging studies and can be pulled from the federated
//! server by patient name.

use super::mapper::{InterpretationLevels, ReportMapper, ResultPolicy};
use super::DiagnosticReportHandler;
use crate::context::RequestContext;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::ServiceCategory;
use fhir::{CodeableConcept, Coding, DiagnosticReport, SYSTEM_V2_0074};

#[derive(Clone, Debug)]
pub struct MicrobiologyHandler {
    mapper: ReportMapper,
}

impl MicrobiologyHandler {
    pub fn new() -> Self {
        Self {
            mapper: ReportMapper::new(ResultPolicy {
                interpretation: InterpretationLevels::LeavesOnly,
                nested_classification: true,
                imaging_studies: true,
            }),
        }
    }

    pub fn policy(&self) -> ResultPolicy {
        self.mapper.policy()
    }
}

impl Default for MicrobiologyHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticReportHandler for MicrobiologyHandler {
    fn service_category(&self) -> ServiceCategory {
        ServiceCategory::Microbiology
    }

    fn get_by_id(&self, ctx: &RequestContext<'_>, id: &str) -> BridgeResult<DiagnosticReport> {
        self.mapper.get_by_id(ctx, id)
    }

    fn get_by_subject_name(
        &self,
        ctx: &mut RequestContext<'_>,
        name: &str,
    ) -> BridgeResult<Vec<DiagnosticReport>> {
        let remote = ctx.remote().ok_or_else(|| {
            BridgeError::Config("no federation endpoint configured for report search".into())
        })?;
        let category = self.service_category().code();
        let bundle = remote.search_reports(name, category)?;
        let found: Vec<DiagnosticReport> = bundle.diagnostic_reports().cloned().collect();
        tracing::info!(
            "federation returned {} {category} report(s) for '{name}'",
            found.len()
        );

        let mut local = Vec::with_capacity(found.len());
        for mut report in found {
            report.id = None;
            report.category.get_or_insert_with(|| {
                CodeableConcept::from_coding(Coding::new(SYSTEM_V2_0074, category, None))
            });
            local.push(self.mapper.save(ctx, report)?);
        }
        Ok(local)
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
