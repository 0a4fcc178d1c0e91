//! Protocol-visible error types with actionable suggestions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried on failed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ElementNotFound,
    NoApplication,
    ProtocolError,
    InvalidInput,
    CommandFailed,
    CaptureFailed,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::ElementNotFound => write!(f, "ELEMENT_NOT_FOUND"),
            ErrorCode::NoApplication => write!(f, "NO_APPLICATION"),
            ErrorCode::ProtocolError => write!(f, "PROTOCOL_ERROR"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::CommandFailed => write!(f, "COMMAND_FAILED"),
            ErrorCode::CaptureFailed => write!(f, "CAPTURE_FAILED"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// An error reported back to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// A path segment had no matching child.
    ///
    /// `failed_path` is the path up to and including the segment that could
    /// not be found; `resolved` is the longest prefix that did resolve.
    pub fn element_not_found(failed_path: &str, resolved: &str, role: Option<&str>) -> Self {
        let mut message = format!("Element not found: {}", failed_path);
        if let Some(role) = role {
            message.push_str(&format!(" (role: {})", role));
        }
        let suggestion = if resolved.is_empty() {
            "No segment resolved from the root. Check the first path segment and its role, or bind the right application with --app".to_string()
        } else {
            format!(
                "Resolved up to '{}'. Check the next segment's name and role constraint",
                resolved
            )
        };
        Self {
            code: ErrorCode::ElementNotFound,
            message,
            suggestion: Some(suggestion),
        }
    }

    pub fn empty_path() -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: "Element path must not be empty".to_string(),
            suggestion: Some("Use a slash-delimited path such as 'Toolbar/New'".into()),
        }
    }

    pub fn no_application() -> Self {
        Self {
            code: ErrorCode::NoApplication,
            message: "No application is bound to this session".to_string(),
            suggestion: Some(
                "Start the target with 'axpilot serve --app <name>' to bind an application".into(),
            ),
        }
    }

    pub fn application_not_found(name: &str) -> Self {
        Self {
            code: ErrorCode::NoApplication,
            message: format!("Application '{}' not found in the UI tree", name),
            suggestion: Some("Check that the application is running and exposes accessibility".into()),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ProtocolError,
            message: message.into(),
            suggestion: Some(
                "Send one length-prefixed JSON request with 'type', 'data' and 'timestamp' fields"
                    .into(),
            ),
        }
    }

    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self {
            code: ErrorCode::ProtocolError,
            message: format!("Message of {} bytes exceeds the {} byte limit", size, max),
            suggestion: Some("Request a smaller screenshot region or split the batch".into()),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some("Check the request parameters and try again".into()),
        }
    }

    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// One or more primitives of a batch failed.
    pub fn batch_failed(failed: usize, total: usize) -> Self {
        Self {
            code: ErrorCode::CommandFailed,
            message: format!("{} of {} commands failed", failed, total),
            suggestion: Some("Inspect the per-command results for the failing action".into()),
        }
    }

    pub fn capture_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::CaptureFailed,
            message: message.into(),
            suggestion: Some(
                "Start the target with --screen-image or build with the 'desktop' feature".into(),
            ),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
            suggestion: Some("This is an internal error. Please report it if it persists.".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every constructor must provide a suggestion so the driver can act on it.
    fn assert_has_suggestion(err: &ApiError, context: &str) {
        assert!(
            err.suggestion.is_some(),
            "{} should have a suggestion, but got None",
            context
        );
    }

    #[test]
    fn test_element_not_found_names_failed_path_and_role() {
        let err = ApiError::element_not_found("Toolbar/Save", "Toolbar", Some("push button"));
        assert_has_suggestion(&err, "element_not_found");
        assert_eq!(err.code, ErrorCode::ElementNotFound);
        assert!(err.message.contains("Toolbar/Save"));
        assert!(err.message.contains("push button"));
        assert!(err.suggestion.as_ref().unwrap().contains("'Toolbar'"));
    }

    #[test]
    fn test_element_not_found_at_root() {
        let err = ApiError::element_not_found("Nope", "", None);
        assert!(!err.message.contains("role"));
        assert!(err.suggestion.as_ref().unwrap().contains("--app"));
    }

    #[test]
    fn test_empty_path_has_suggestion() {
        let err = ApiError::empty_path();
        assert_has_suggestion(&err, "empty_path");
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_no_application_has_suggestion() {
        let err = ApiError::no_application();
        assert_has_suggestion(&err, "no_application");
        assert!(err.suggestion.as_ref().unwrap().contains("--app"));
    }

    #[test]
    fn test_protocol_and_frame_errors() {
        let err = ApiError::protocol("bad json");
        assert_has_suggestion(&err, "protocol");
        assert_eq!(err.code, ErrorCode::ProtocolError);

        let err = ApiError::frame_too_large(20, 10);
        assert_eq!(err.code, ErrorCode::ProtocolError);
        assert!(err.message.contains("20"));
        assert!(err.message.contains("10"));
    }

    #[test]
    fn test_batch_failed_counts() {
        let err = ApiError::batch_failed(1, 3);
        assert_has_suggestion(&err, "batch_failed");
        assert_eq!(err.message, "1 of 3 commands failed");
    }

    #[test]
    fn test_remaining_constructors_have_suggestions() {
        assert_has_suggestion(&ApiError::invalid_input("x"), "invalid_input");
        assert_has_suggestion(
            &ApiError::invalid_input_with_suggestion("x", "y"),
            "invalid_input_with_suggestion",
        );
        assert_has_suggestion(&ApiError::capture_failed("x"), "capture_failed");
        assert_has_suggestion(&ApiError::internal("x"), "internal");
        assert_has_suggestion(&ApiError::application_not_found("QGIS3"), "application_not_found");
    }

    #[test]
    fn test_display_format_with_suggestion() {
        let err = ApiError::no_application();
        let display = format!("{}", err);
        assert!(display.contains("[NO_APPLICATION]"));
        assert!(display.contains("(hint:"));
    }

    #[test]
    fn test_json_serialization() {
        let err = ApiError::element_not_found("a/b", "a", None);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"code\""));
        assert!(json.contains("ELEMENT_NOT_FOUND"));
        assert!(json.contains("\"suggestion\""));
    }

    #[test]
    fn test_json_deserialization() {
        let json = r#"{"code":"CAPTURE_FAILED","message":"no screen","suggestion":null}"#;
        let err: ApiError = serde_json::from_str(json).unwrap();
        assert_eq!(err.code, ErrorCode::CaptureFailed);
        assert_eq!(err.message, "no screen");
        assert_eq!(err.suggestion, None);
    }
}
