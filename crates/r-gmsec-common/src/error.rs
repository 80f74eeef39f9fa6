//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error taxonomy and status carrier shared by every crate."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use strum::{AsRefStr, Display, EnumString};

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, GmsecError>;

/// Classification attached to every [`GmsecError`] and [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Null or empty required argument.
    InvalidArgument,
    /// Subject or subscription pattern fails the subject grammar.
    InvalidSubject,
    /// Field name fails the naming grammar.
    InvalidFieldName,
    /// Field is absent from a message.
    FieldNotFound,
    /// Field exists but has a different type than requested.
    FieldType,
    /// Value cannot be coerced to the requested representation.
    Conversion,
    /// Schema ID is not present in the loaded specification.
    UnknownSchema,
    /// Malformed XML or JSON content.
    Parse,
    /// Message failed structural or custom validation.
    Validation,
    /// Connection operation attempted before `connect()`.
    NotInitialized,
    /// Message kind does not match the requested operation.
    WrongKind,
    /// Identical subscription registered twice.
    DuplicateSubscription,
    /// Synchronous receive attempted while auto-dispatch is active.
    ModeConflict,
    /// Backend connection or transport failure.
    Middleware,
    /// Template set could not be loaded.
    SpecificationLoad,
    /// Periodic generator misuse.
    Generator,
    /// Config value out of range or not convertible.
    Config,
    /// Operation did not complete within the allotted time.
    Timeout,
    /// Underlying filesystem failure.
    Io,
}

/// Errors raised by the messaging API. The display form is the bare
/// human-readable message so callers can match on substrings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GmsecError {
    /// Null or empty required argument.
    #[error("{0}")]
    InvalidArgument(String),
    /// Subject grammar violation.
    #[error("{0}")]
    InvalidSubject(String),
    /// Field name grammar violation.
    #[error("{0}")]
    InvalidFieldName(String),
    /// Missing field.
    #[error("{0}")]
    FieldNotFound(String),
    /// Field present with the wrong type.
    #[error("{0}")]
    FieldType(String),
    /// Value conversion failure.
    #[error("{0}")]
    Conversion(String),
    /// Unknown schema identifier.
    #[error("{0}")]
    UnknownSchema(String),
    /// Malformed data.
    #[error("{0}")]
    Parse(String),
    /// Validation failure; the message names the offending fields.
    #[error("{0}")]
    Validation(String),
    /// Connection not yet connected.
    #[error("{0}")]
    NotInitialized(String),
    /// Kind mismatch for publish/request/reply.
    #[error("{0}")]
    WrongKind(String),
    /// Duplicate subscription.
    #[error("{0}")]
    DuplicateSubscription(String),
    /// Receive and auto-dispatch are mutually exclusive.
    #[error("{0}")]
    ModeConflict(String),
    /// Backend failure preserving the backend's code pair.
    #[error("{message}")]
    Middleware {
        /// Backend error class.
        code: i32,
        /// Backend-specific custom code.
        custom_code: i32,
        /// Human-readable description.
        message: String,
    },
    /// Template set load failure.
    #[error("{0}")]
    SpecificationLoad(String),
    /// Generator misuse.
    #[error("{0}")]
    Generator(String),
    /// Config value failure.
    #[error("{0}")]
    Config(String),
    /// Timeout.
    #[error("{0}")]
    Timeout(String),
    /// Filesystem failure.
    #[error("{0}")]
    Io(String),
}

impl GmsecError {
    /// Build an error of the given classification.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::InvalidArgument => GmsecError::InvalidArgument(message),
            ErrorCode::InvalidSubject => GmsecError::InvalidSubject(message),
            ErrorCode::InvalidFieldName => GmsecError::InvalidFieldName(message),
            ErrorCode::FieldNotFound => GmsecError::FieldNotFound(message),
            ErrorCode::FieldType => GmsecError::FieldType(message),
            ErrorCode::Conversion => GmsecError::Conversion(message),
            ErrorCode::UnknownSchema => GmsecError::UnknownSchema(message),
            ErrorCode::Parse => GmsecError::Parse(message),
            ErrorCode::Validation => GmsecError::Validation(message),
            ErrorCode::NotInitialized => GmsecError::NotInitialized(message),
            ErrorCode::WrongKind => GmsecError::WrongKind(message),
            ErrorCode::DuplicateSubscription => GmsecError::DuplicateSubscription(message),
            ErrorCode::ModeConflict => GmsecError::ModeConflict(message),
            ErrorCode::Middleware => GmsecError::middleware(0, message),
            ErrorCode::SpecificationLoad => GmsecError::SpecificationLoad(message),
            ErrorCode::Generator => GmsecError::Generator(message),
            ErrorCode::Config => GmsecError::Config(message),
            ErrorCode::Timeout => GmsecError::Timeout(message),
            ErrorCode::Io => GmsecError::Io(message),
        }
    }

    /// Backend failure with a custom code.
    pub fn middleware(custom_code: i32, message: impl Into<String>) -> Self {
        GmsecError::Middleware {
            code: MIDDLEWARE_ERROR_CLASS,
            custom_code,
            message: message.into(),
        }
    }

    /// Classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            GmsecError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            GmsecError::InvalidSubject(_) => ErrorCode::InvalidSubject,
            GmsecError::InvalidFieldName(_) => ErrorCode::InvalidFieldName,
            GmsecError::FieldNotFound(_) => ErrorCode::FieldNotFound,
            GmsecError::FieldType(_) => ErrorCode::FieldType,
            GmsecError::Conversion(_) => ErrorCode::Conversion,
            GmsecError::UnknownSchema(_) => ErrorCode::UnknownSchema,
            GmsecError::Parse(_) => ErrorCode::Parse,
            GmsecError::Validation(_) => ErrorCode::Validation,
            GmsecError::NotInitialized(_) => ErrorCode::NotInitialized,
            GmsecError::WrongKind(_) => ErrorCode::WrongKind,
            GmsecError::DuplicateSubscription(_) => ErrorCode::DuplicateSubscription,
            GmsecError::ModeConflict(_) => ErrorCode::ModeConflict,
            GmsecError::Middleware { .. } => ErrorCode::Middleware,
            GmsecError::SpecificationLoad(_) => ErrorCode::SpecificationLoad,
            GmsecError::Generator(_) => ErrorCode::Generator,
            GmsecError::Config(_) => ErrorCode::Config,
            GmsecError::Timeout(_) => ErrorCode::Timeout,
            GmsecError::Io(_) => ErrorCode::Io,
        }
    }

    /// Backend-specific custom code; zero for non-middleware errors.
    pub fn custom_code(&self) -> i32 {
        match self {
            GmsecError::Middleware { custom_code, .. } => *custom_code,
            _ => 0,
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Error class reported for backend failures.
pub const MIDDLEWARE_ERROR_CLASS: i32 = 2;

impl From<std::io::Error> for GmsecError {
    fn from(err: std::io::Error) -> Self {
        GmsecError::Io(err.to_string())
    }
}

/// Non-raising outcome of a check such as message compliance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    code: Option<ErrorCode>,
    reason: String,
    custom_code: i32,
}

impl Status {
    /// A successful status.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A failed status with the given classification and reason.
    pub fn error(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
            custom_code: 0,
        }
    }

    /// Attach a backend-specific custom code.
    pub fn with_custom_code(mut self, custom_code: i32) -> Self {
        self.custom_code = custom_code;
        self
    }

    /// Whether this status represents a failure.
    pub fn has_error(&self) -> bool {
        self.code.is_some()
    }

    /// Failure classification, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        self.code
    }

    /// Failure reason; empty on success.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Backend-specific custom code.
    pub fn custom_code(&self) -> i32 {
        self.custom_code
    }

    /// Replace the reason text, keeping the classification.
    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
    }

    /// Convert into a `Result`, raising the failure if present.
    pub fn into_result(self) -> Result<()> {
        match self.code {
            None => Ok(()),
            Some(ErrorCode::Middleware) => Err(GmsecError::middleware(self.custom_code, self.reason)),
            Some(code) => Err(GmsecError::new(code, self.reason)),
        }
    }
}

impl From<GmsecError> for Status {
    fn from(err: GmsecError) -> Self {
        Self {
            code: Some(err.code()),
            custom_code: err.custom_code(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}] {}", code, self.reason),
            None => f.write_str("OK"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_bare_message() {
        let err = GmsecError::new(ErrorCode::FieldNotFound, "Message does not contain field with name: FOO");
        assert_eq!(err.to_string(), "Message does not contain field with name: FOO");
        assert_eq!(err.code(), ErrorCode::FieldNotFound);
    }

    #[test]
    fn middleware_errors_keep_custom_code() {
        let err = GmsecError::middleware(42, "Unable to load bogus");
        assert_eq!(err.code(), ErrorCode::Middleware);
        assert_eq!(err.custom_code(), 42);

        let status = Status::from(err.clone());
        assert!(status.has_error());
        assert_eq!(status.custom_code(), 42);
        assert_eq!(status.into_result(), Err(err));
    }

    #[test]
    fn ok_status_converts_to_ok() {
        let status = Status::ok();
        assert!(!status.has_error());
        assert_eq!(status.to_string(), "OK");
        assert!(status.into_result().is_ok());
    }

    #[test]
    fn error_codes_render_in_screaming_snake_case() {
        assert_eq!(ErrorCode::DuplicateSubscription.to_string(), "DUPLICATE_SUBSCRIPTION");
        assert_eq!(
            "MODE_CONFLICT".parse::<ErrorCode>().expect("parse code"),
            ErrorCode::ModeConflict
        );
    }
}
