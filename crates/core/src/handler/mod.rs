//! DiagnosticReport handlers.
//!
//! One handler per clinical service category. They share the mapping in [`mapper`] and differ
//! in how they nest and interpret result trees.

mod icu;
mod mapper;
mod microbiology;

pub use icu::IcuHandler;
pub use mapper::{InterpretationLevels, ResultPolicy};
pub use microbiology::MicrobiologyHandler;

use crate::context::RequestContext;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::ServiceCategory;
use fhir::DiagnosticReport;

pub trait DiagnosticReportHandler {
    fn service_category(&self) -> ServiceCategory;

    /// Read a report by `<uuid>` or `DiagnosticReport/<uuid>`. Retired reports are not found.
    fn get_by_id(&self, ctx: &RequestContext<'_>, id: &str) -> BridgeResult<DiagnosticReport>;

    /// Pull reports for a patient given name from the federation endpoint, store them locally
    /// and return the local copies.
    fn get_by_subject_name(
        &self,
        _ctx: &mut RequestContext<'_>,
        _name: &str,
    ) -> BridgeResult<Vec<DiagnosticReport>> {
        Err(BridgeError::OperationNotPermitted(format!(
            "Searching {} DiagnosticReports by subject name is not supported",
            self.service_category().code()
        )))
    }

    fn save(
        &self,
        ctx: &mut RequestContext<'_>,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport>;

    /// Replace the contents of an existing report.
    fn update(
        &self,
        ctx: &mut RequestContext<'_>,
        id: &str,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport>;

    /// Void a report. Retiring an already retired report succeeds without changes.
    fn retire(&self, ctx: &mut RequestContext<'_>, id: &str) -> BridgeResult<()>;
}
