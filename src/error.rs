use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Graph API error: {0}")]
    GraphApiError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Token not found. Please run 'm365report login' first")]
    TokenNotFound,

    #[error("Tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),
}

impl ReportError {
    /// Graph returned 404 for the requested object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReportError::GraphApiError(msg) if msg.starts_with("HTTP 404"))
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Parse Graph API error response and provide helpful context
pub fn enhance_graph_error(error_response: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(error_response) {
        if let Some(error_obj) = error_json.get("error") {
            let code = error_obj
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            let message = error_obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("No message");

            let hint = match code {
                "Unauthorized" | "InvalidAuthenticationToken" => {
                    "\n💡 Hint: Your token may have expired. Run 'm365report login' again."
                }
                "Forbidden" | "Authorization_RequestDenied" | "InsufficientPrivileges" => {
                    "\n💡 Hint: The app registration is missing a read permission (e.g. AuditLog.Read.All, MailboxSettings.Read) or admin consent."
                }
                "Request_ResourceNotFound" | "ResourceNotFound" | "NotFound" => {
                    "\n💡 Hint: The object does not exist or has no mailbox."
                }
                "TooManyRequests" => "\n💡 Hint: Graph throttled the request. Wait a moment and try again.",
                _ => "",
            };

            return format!("{}: {}{}", code, message, hint);
        }
    }

    error_response.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enhance_graph_error_extracts_code_and_message() {
        let body = r#"{"error":{"code":"Request_ResourceNotFound","message":"Resource 'x' does not exist."}}"#;
        let text = enhance_graph_error(body);
        assert!(text.starts_with("Request_ResourceNotFound: Resource 'x' does not exist."));
        assert!(text.contains("Hint"));
    }

    #[test]
    fn test_enhance_graph_error_passes_through_non_json() {
        assert_eq!(enhance_graph_error("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_is_not_found() {
        assert!(ReportError::GraphApiError("HTTP 404 Not Found: x".into()).is_not_found());
        assert!(!ReportError::GraphApiError("HTTP 403 Forbidden: x".into()).is_not_found());
        assert!(!ReportError::TokenNotFound.is_not_found());
    }
}
