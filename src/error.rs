//! Error types for study analytics.

use thiserror::Error;

/// Boxed native error carried by execution failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for study analytics operations.
#[derive(Debug, Error)]
pub enum StudyError {
    /// A study, cohort or cohort set could not be resolved.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A filter criterion could not be parsed.
    #[error("Malformed criteria '{token}': {message}")]
    MalformedCriteria { token: String, message: String },

    /// Template parameter names and values were not paired.
    #[error("Template '{template}' received {names} parameter names but {values} values")]
    TemplateArity {
        template: String,
        names: usize,
        values: usize,
    },

    /// Dialect translation failed.
    #[error("Translation to '{dialect}' failed: {message}")]
    Translation { dialect: String, message: String },

    /// The database rejected a statement or could not be reached.
    #[error("Execution on connection '{connection}' failed: {source}")]
    Execution {
        connection: String,
        #[source]
        source: BoxError,
    },

    /// A result row did not match the expected shape.
    #[error("Projection of column '{column}' failed: {message}")]
    Projection { column: String, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StudyError {
    /// Create a not-found error for the named entity kind.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a malformed-criteria error for an input token.
    pub fn malformed(token: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedCriteria {
            token: token.into(),
            message: message.into(),
        }
    }

    /// Create a translation error naming the target dialect.
    pub fn translation(dialect: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Translation {
            dialect: dialect.into(),
            message: message.into(),
        }
    }

    /// Wrap a native database error.
    pub fn execution(connection: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Execution {
            connection: connection.into(),
            source: source.into(),
        }
    }

    /// Create a projection error naming the offending column.
    pub fn projection(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Projection {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether the failure was caused by caller input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::MalformedCriteria { .. })
    }

    /// HTTP-style status code for front ends that surface these errors.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::MalformedCriteria { .. } => 400,
            Self::Execution { .. } => 503,
            Self::TemplateArity { .. }
            | Self::Translation { .. }
            | Self::Projection { .. }
            | Self::Config(_)
            | Self::Io(_) => 500,
        }
    }
}

/// Result type alias for study analytics operations.
pub type StudyResult<T> = Result<T, StudyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StudyError::not_found("cohort set", 42);
        assert_eq!(err.to_string(), "cohort set 42 not found");

        let err = StudyError::malformed("5:10:20", "expected at most one ':'");
        assert_eq!(
            err.to_string(),
            "Malformed criteria '5:10:20': expected at most one ':'"
        );
    }

    #[test]
    fn test_client_errors() {
        assert!(StudyError::not_found("study", 1).is_client_error());
        assert!(StudyError::malformed("x", "y").is_client_error());
        assert!(!StudyError::translation("netezza", "unsupported").is_client_error());
        assert!(!StudyError::projection("z_score", "missing").is_client_error());
    }

    #[test]
    fn test_execution_keeps_source() {
        let native = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StudyError::execution("study-results", native);
        assert_eq!(err.status_code(), 503);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("refused"));
    }
}
