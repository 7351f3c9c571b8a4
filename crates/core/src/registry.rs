//! Handler registry and dispatch by service category.
//!
//! Categories are an enumerated set fixed at registration time. Reads and state changes on an
//! existing report dispatch on the category derived from the stored encounter type; saves and
//! searches dispatch on the category code supplied by the caller. Unknown codes fall back to
//! the registry default.

use crate::context::RequestContext;
use crate::error::{BridgeError, BridgeResult};
use crate::handler::{DiagnosticReportHandler, IcuHandler, MicrobiologyHandler};
use crate::constants::DIAGNOSTIC_REPORT;
use fhir::{DiagnosticReport, ResourceId};
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceCategory {
    Icu,
    Microbiology,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 2] = [ServiceCategory::Icu, ServiceCategory::Microbiology];

    /// The FHIR `DiagnosticReport.category` code.
    pub fn code(self) -> &'static str {
        match self {
            ServiceCategory::Icu => "ICU",
            ServiceCategory::Microbiology => "MB",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code.trim())
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

pub struct HandlerRegistry {
    handlers: HashMap<ServiceCategory, Box<dyn DiagnosticReportHandler>>,
    default: ServiceCategory,
}

impl HandlerRegistry {
    /// An empty registry. `default` must be registered before dispatching.
    pub fn new(default: ServiceCategory) -> Self {
        Self {
            handlers: HashMap::new(),
            default,
        }
    }

    /// Register a handler under its own category, returning any handler it replaces.
    pub fn register(
        &mut self,
        handler: Box<dyn DiagnosticReportHandler>,
    ) -> Option<Box<dyn DiagnosticReportHandler>> {
        self.handlers.insert(handler.service_category(), handler)
    }

    pub fn default_category(&self) -> ServiceCategory {
        self.default
    }

    pub fn handler(&self, category: ServiceCategory) -> BridgeResult<&dyn DiagnosticReportHandler> {
        self.handlers
            .get(&category)
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                BridgeError::Config(format!("no DiagnosticReport handler registered for {category}"))
            })
    }

    /// Resolve a category code; absent or unknown codes select the default handler.
    pub fn handler_for_code(&self, code: Option<&str>) -> BridgeResult<&dyn DiagnosticReportHandler> {
        let category = match code.map(|c| (c, ServiceCategory::from_code(c))) {
            Some((_, Some(category))) => category,
            Some((unknown, None)) => {
                tracing::debug!(
                    "category '{unknown}' has no handler, using {}",
                    self.default
                );
                self.default
            }
            None => self.default,
        };
        self.handler(category)
    }

    /// Handler for an existing report, chosen by its stored encounter type. Reports that do
    /// not resolve go to the default handler, which reports them as not found.
    fn handler_for_report(
        &self,
        ctx: &RequestContext<'_>,
        id: &str,
    ) -> BridgeResult<&dyn DiagnosticReportHandler> {
        let encounter = match ResourceId::parse_id_or_reference(id, DIAGNOSTIC_REPORT) {
            Ok(uuid) => ctx.store().encounter_by_uuid(uuid)?,
            Err(_) => None,
        };
        match encounter {
            Some(encounter) => {
                let code = ctx.config().category_for(&encounter.encounter_type.name);
                self.handler_for_code(Some(code))
            }
            None => self.handler(self.default),
        }
    }

    pub fn get_by_id(&self, ctx: &RequestContext<'_>, id: &str) -> BridgeResult<DiagnosticReport> {
        self.handler_for_report(ctx, id)?.get_by_id(ctx, id)
    }

    pub fn get_by_subject_name(
        &self,
        ctx: &mut RequestContext<'_>,
        category_code: &str,
        name: &str,
    ) -> BridgeResult<Vec<DiagnosticReport>> {
        self.handler_for_code(Some(category_code))?
            .get_by_subject_name(ctx, name)
    }

    pub fn save(
        &self,
        ctx: &mut RequestContext<'_>,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport> {
        self.handler_for_code(report.category_code())?.save(ctx, report)
    }

    /// Dispatches on the stored report's category, not the incoming one.
    pub fn update(
        &self,
        ctx: &mut RequestContext<'_>,
        id: &str,
        report: DiagnosticReport,
    ) -> BridgeResult<DiagnosticReport> {
        self.handler_for_report(ctx, id)?.update(ctx, id, report)
    }

    pub fn retire(&self, ctx: &mut RequestContext<'_>, id: &str) -> BridgeResult<()> {
        self.handler_for_report(ctx, id)?.retire(ctx, id)
    }
}

impl Default for HandlerRegistry {
    /// ICU and Microbiology handlers, ICU as the default.
    fn default() -> Self {
        let mut registry = Self::new(ServiceCategory::Icu);
        registry.register(Box::new(IcuHandler::new()));
        registry.register(Box::new(MicrobiologyHandler::new()));
        registry
    }
}
