use std::fmt;
use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of row a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKind {
    Tenant,
    Schema,
    Tuple,
    Attribute,
    Bundle,
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tenant => "tenant",
            Self::Schema => "schema",
            Self::Tuple => "relation tuple",
            Self::Attribute => "attribute",
            Self::Bundle => "bundle",
        })
    }
}

/// Stable error code, independent of the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    BundleNotFound,
    MissingArgument,
    UndeclaredPlaceholder,
    InvalidTemplate,
    InvalidRelationshipFormat,
    InvalidAttributeFormat,
    InvalidQuery,
    InvalidId,
    TransactionConflict,
    Cancelled,
    BackendFailure,
}

impl ErrorCode {
    /// Returns the wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "ERROR_CODE_NOT_FOUND",
            Self::BundleNotFound => "ERROR_CODE_BUNDLE_NOT_FOUND",
            Self::MissingArgument => "ERROR_CODE_MISSING_ARGUMENT",
            Self::UndeclaredPlaceholder => "ERROR_CODE_UNDECLARED_PLACEHOLDER",
            Self::InvalidTemplate => "ERROR_CODE_INVALID_TEMPLATE",
            Self::InvalidRelationshipFormat => "ERROR_CODE_INVALID_RELATIONSHIP_FORMAT",
            Self::InvalidAttributeFormat => "ERROR_CODE_INVALID_ATTRIBUTE_FORMAT",
            Self::InvalidQuery => "ERROR_CODE_INVALID_QUERY",
            Self::InvalidId => "ERROR_CODE_INVALID_ID",
            Self::TransactionConflict => "ERROR_CODE_TRANSACTION_CONFLICT",
            Self::Cancelled => "ERROR_CODE_CANCELLED",
            Self::BackendFailure => "ERROR_CODE_BACKEND_FAILURE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Store error wrapper.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// A keyed row is absent.
    #[error("{kind} not found: {key}")]
    NotFound { kind: RowKind, key: String },
    /// No bundle is stored under the requested name.
    #[error("bundle not found: {0}")]
    BundleNotFound(String),
    /// A bundle invocation omits a declared argument.
    #[error("missing bundle argument: {0}")]
    MissingArgument(String),
    /// A template references a placeholder the bundle does not declare.
    #[error("undeclared placeholder: {0}")]
    UndeclaredPlaceholder(String),
    /// A template action is not of the form `{{.name}}`.
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    /// Input does not match `type:id#relation@type:id[#relation]`.
    #[error("invalid relationship format: {0}")]
    InvalidRelationshipFormat(String),
    /// Input does not match `type:id$attribute|type:value`.
    #[error("invalid attribute format: {0}")]
    InvalidAttributeFormat(String),
    /// Index query does not fit the index.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Another transaction committed a conflicting write first.
    #[error("transaction conflict")]
    TransactionConflict,
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Store(_) => ErrorCode::BackendFailure,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::BundleNotFound(_) => ErrorCode::BundleNotFound,
            Self::MissingArgument(_) => ErrorCode::MissingArgument,
            Self::UndeclaredPlaceholder(_) => ErrorCode::UndeclaredPlaceholder,
            Self::InvalidTemplate(_) => ErrorCode::InvalidTemplate,
            Self::InvalidRelationshipFormat(_) => ErrorCode::InvalidRelationshipFormat,
            Self::InvalidAttributeFormat(_) => ErrorCode::InvalidAttributeFormat,
            Self::InvalidQuery(_) => ErrorCode::InvalidQuery,
            Self::InvalidId(_) => ErrorCode::InvalidId,
            Self::TransactionConflict => ErrorCode::TransactionConflict,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Returns whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionConflict)
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Store(message.into().into())
    }

    pub(crate) fn not_found(kind: RowKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}
