use thiserror::Error;

use crate::storage_controller::client::CoordinationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("DecodingError: {0}")]
    DecodingError(String),

    #[error("CryptoError: {0}")]
    CryptoError(String),

    #[error("Coordination Error: {0}")]
    CoordinationError(#[from] CoordinationError),
}

impl Error {
    /// Short, bounded label used for the failure counter.
    pub fn metric_label(&self) -> String {
        match self {
            Error::JsonSerializationError(_) => "jsonserializationerror",
            Error::KubeError(kube::Error::Api(resp)) if resp.code == 409 => "conflict",
            Error::KubeError(_) => "kubeerror",
            Error::NotFound(_) => "notfound",
            Error::MetadataMissing(_) => "metadatamissing",
            Error::InvalidArgument(_) => "invalidargument",
            Error::DecodingError(_) => "decodingerror",
            Error::CryptoError(_) => "cryptoerror",
            Error::CoordinationError(_) => "coordinationerror",
        }
        .to_string()
    }

    /// True when the API server rejected a write because the resourceVersion was stale.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(resp)) if resp.code == 409)
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from test"),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn conflict_is_distinct_from_other_api_errors() {
        let conflict = api_error(409, "Conflict");
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
        assert_eq!(conflict.metric_label(), "conflict");

        let missing = api_error(404, "NotFound");
        assert!(!missing.is_conflict());
        assert!(missing.is_not_found());
        assert_eq!(missing.metric_label(), "kubeerror");
    }

    #[test]
    fn labels_do_not_embed_messages() {
        let err = Error::MetadataMissing("namespace of NeonBranch my-branch".to_string());
        assert_eq!(err.metric_label(), "metadatamissing");
    }
}
