#![forbid(unsafe_code)]

use serde_json::{Value, json};
use tt_core::CacheError;
use tt_core::scope::ScopeError;
use tt_core::source::SourceError;

/// Error body returned to HTTP clients as `{error:{code,message,recovery}}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ApiError {
    pub(crate) code: &'static str,
    pub(crate) message: String,
    pub(crate) recovery: Option<String>,
    pub(crate) status: u16,
}

impl ApiError {
    pub(crate) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recovery: None,
            status: 400,
        }
    }

    pub(crate) fn with_recovery(mut self, recovery: impl Into<String>) -> Self {
        self.recovery = Some(recovery.into());
        self
    }

    pub(crate) fn not_found() -> Self {
        Self {
            code: "NOT_FOUND",
            message: "Unknown route.".to_string(),
            recovery: Some("See GET /health for a liveness probe.".to_string()),
            status: 404,
        }
    }

    pub(crate) fn method_not_allowed(method: &str) -> Self {
        Self {
            code: "METHOD_NOT_ALLOWED",
            message: format!("Method {method} is not allowed on this route."),
            recovery: None,
            status: 405,
        }
    }

    pub(crate) fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "recovery": self.recovery
            }
        })
    }

    pub(crate) fn status_line(&self) -> &'static str {
        match self.status {
            400 => "400 Bad Request",
            404 => "404 Not Found",
            405 => "405 Method Not Allowed",
            503 => "503 Service Unavailable",
            500 => "500 Internal Server Error",
            _ => "500 Internal Server Error",
        }
    }
}

impl From<ScopeError> for ApiError {
    fn from(value: ScopeError) -> Self {
        match value {
            ScopeError::InvalidMode(_) => ApiError::bad_request("INVALID_MODE", value.to_string())
                .with_recovery("Use mode=personal|friends|selected|global."),
            ScopeError::ViewerRequired(_) => {
                ApiError::bad_request("VIEWER_REQUIRED", value.to_string())
                    .with_recovery("Pass ?viewer=<id> or the X-Viewer-Id header.")
            }
            ScopeError::Source(err) => source_unavailable(err.to_string()),
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(value: SourceError) -> Self {
        source_unavailable(value.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(value: CacheError) -> Self {
        match value {
            CacheError::SourceUnavailable(message) => source_unavailable(message),
            CacheError::Invariant(message) => ApiError {
                code: "TREE_INVARIANT",
                message,
                recovery: None,
                status: 500,
            },
            CacheError::BuildFailed(message) => ApiError {
                code: "BUILD_FAILED",
                message,
                recovery: Some("Retry the request.".to_string()),
                status: 503,
            },
        }
    }
}

fn source_unavailable(message: String) -> ApiError {
    ApiError {
        code: "SOURCE_UNAVAILABLE",
        message,
        recovery: Some("The record source is unreachable; retry shortly.".to_string()),
        status: 503,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_errors_map_to_retryable_or_internal_statuses() {
        let unavailable = ApiError::from(CacheError::SourceUnavailable("down".to_string()));
        assert_eq!(unavailable.code, "SOURCE_UNAVAILABLE");
        assert_eq!(unavailable.status_line(), "503 Service Unavailable");

        let invariant = ApiError::from(CacheError::Invariant("cycle".to_string()));
        assert_eq!(invariant.status_line(), "500 Internal Server Error");

        let body = ApiError::from(CacheError::BuildFailed("panicked".to_string())).to_json();
        assert_eq!(body["error"]["code"], "BUILD_FAILED");
        assert_eq!(body["error"]["message"], "panicked");
    }

    #[test]
    fn scope_errors_are_client_errors() {
        let err = ApiError::from(ScopeError::InvalidMode("everyone".to_string()));
        assert_eq!(err.code, "INVALID_MODE");
        assert_eq!(err.status, 400);
        let err = ApiError::from(ScopeError::ViewerRequired("friends"));
        assert_eq!(err.code, "VIEWER_REQUIRED");
        assert!(err.recovery.is_some());
    }
}
