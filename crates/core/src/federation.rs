//! Remote federation endpoint.
//!
//! Microbiology reports can be pulled from a federated FHIR server, and imaging studies that
//! are neither contained nor stored locally are fetched from the radiology server. Handlers
//! only see the [`RemoteReportSource`] trait; [`HttpReportSource`] is the blocking HTTP
//! implementation.

use fhir::{Bundle, FhirError, ImagingStudy, Resource};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::Url;
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote server answered {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid server URL: {0}")]
    Url(String),

    #[error("unexpected payload: {0}")]
    Fhir(#[from] FhirError),
}

pub type FederationResult<T> = std::result::Result<T, FederationError>;

/// Read access to a federated FHIR server.
pub trait RemoteReportSource {
    /// `DiagnosticReport` search by subject given name and category code.
    fn search_reports(&self, given_name: &str, category_code: &str) -> FederationResult<Bundle>;

    /// Read one ImagingStudy by logical id.
    fn read_imaging_study(&self, id: &str) -> FederationResult<ImagingStudy>;
}

pub struct HttpReportSource {
    base: Url,
    client: Client,
}

impl HttpReportSource {
    pub fn new(base_url: &str) -> FederationResult<Self> {
        let base = parse_base(base_url)?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn get(&self, url: Url) -> FederationResult<Resource> {
        tracing::debug!("GET {url}");
        let response = self.client.get(url.clone()).header(ACCEPT, FHIR_JSON).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FederationError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text()?;
        Ok(Resource::parse_json(&body)?)
    }
}

impl RemoteReportSource for HttpReportSource {
    fn search_reports(&self, given_name: &str, category_code: &str) -> FederationResult<Bundle> {
        let url = search_url(&self.base, given_name, category_code)?;
        Ok(self.get(url)?.into_bundle()?)
    }

    fn read_imaging_study(&self, id: &str) -> FederationResult<ImagingStudy> {
        let url = read_url(&self.base, "ImagingStudy", id)?;
        Ok(self.get(url)?.into_imaging_study()?)
    }
}

/// Base URLs are normalised to end in `/` so relative joins keep the FHIR base path.
fn parse_base(base_url: &str) -> FederationResult<Url> {
    let trimmed = base_url.trim();
    let normalised = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&normalised).map_err(|e| FederationError::Url(format!("{base_url}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FederationError::Url(format!(
            "{base_url}: only http and https are supported"
        )));
    }
    Ok(url)
}

fn search_url(base: &Url, given_name: &str, category_code: &str) -> FederationResult<Url> {
    let mut url = base
        .join("DiagnosticReport")
        .map_err(|e| FederationError::Url(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("subject:Patient.given", given_name)
        .append_pair("category", category_code);
    Ok(url)
}

fn read_url(base: &Url, resource_type: &str, id: &str) -> FederationResult<Url> {
    let id = id.trim();
    if id.is_empty() || id.contains('/') {
        return Err(FederationError::Url(format!(
            "'{id}' is not a logical {resource_type} id"
        )));
    }
    base.join(&format!("{resource_type}/{id}"))
        .map_err(|e| FederationError::Url(e.to_string()))
}
