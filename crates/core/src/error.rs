use crate::constants::REQUEST_ISSUE_LIST;
use crate::federation::FederationError;
use crate::store::StoreError;

/// Errors surfaced by report handlers.
///
/// The first three variants are client-visible faults; the rest wrap collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{0}")]
    NotFound(String),
    #[error("{}", issue_list(.0))]
    UnprocessableInput(Vec<String>),
    #[error("{0}")]
    OperationNotPermitted(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote server error: {0}")]
    Remote(#[from] FederationError),
    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// The individual issues of an [`BridgeError::UnprocessableInput`], empty otherwise.
    pub fn issues(&self) -> &[String] {
        match self {
            BridgeError::UnprocessableInput(issues) => issues,
            _ => &[],
        }
    }
}

fn issue_list(issues: &[String]) -> String {
    let mut message = String::from(REQUEST_ISSUE_LIST);
    for issue in issues {
        message.push_str("\n - ");
        message.push_str(issue);
    }
    message
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprocessable_message_lists_every_issue() {
        let err = BridgeError::UnprocessableInput(vec![
            "DiagnosticReport.subject is required".into(),
            "Concept for Observation.code 'XYZ' not found".into(),
        ]);

        let message = err.to_string();
        assert!(message.starts_with(REQUEST_ISSUE_LIST));
        assert!(message.contains("\n - DiagnosticReport.subject is required"));
        assert!(message.contains("\n - Concept for Observation.code 'XYZ' not found"));
        assert_eq!(err.issues().len(), 2);
    }
}
