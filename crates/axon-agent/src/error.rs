//! Gateway error types.
//!
//! Every public operation of the gateway surfaces failures through
//! [`GatewayError`].  Lower layers have their own narrower types
//! ([`ModelError`] for completion backends, [`ToolError`] for tool handlers,
//! [`SchemaError`] for shape compilation and validation) which convert into
//! the gateway taxonomy at the dispatcher boundary.
//!
//! The mapping from a failure kind to what a transport shows its caller is
//! fixed: see [`ErrorKind`] and [`ErrorOutcome`].

use serde::Serialize;

use crate::usage::UsageLimitError;

// ---------------------------------------------------------------------------
// Gateway taxonomy
// ---------------------------------------------------------------------------

/// Unified error type for the agent execution gateway.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    // -- Registry errors -----------------------------------------------------
    /// An agent with the same id is already registered.
    #[error("agent already exists: {agent_id}")]
    DuplicateAgentId { agent_id: String },

    /// No agent is registered under the requested id.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    // -- Tool errors ---------------------------------------------------------
    /// The agent declares no tool with the requested name.
    #[error("tool not found: {tool_name}")]
    ToolNotFound { tool_name: String },

    /// The arguments do not satisfy the tool's parameter shape.
    #[error("invalid arguments for tool `{tool_name}`: {reason}")]
    ArgumentValidation { tool_name: String, reason: String },

    /// The tool handler itself failed.
    #[error("tool `{tool_name}` failed: {reason}")]
    ToolExecution { tool_name: String, reason: String },

    // -- Definition / request errors -----------------------------------------
    /// The agent configuration or one of its schemas is malformed.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },

    /// The run request itself is malformed (empty prompt, broken history).
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    // -- Run errors ----------------------------------------------------------
    /// The model never produced output matching the result schema.
    #[error("result validation failed after {retries} retries: {reason}")]
    ResultValidation { retries: u32, reason: String },

    /// The completion backend failed or produced something unusable.
    #[error("unexpected model behavior: {reason}")]
    ModelBehavior { reason: String },

    /// The run hit one of its usage limits.
    #[error("usage limit exceeded: {0}")]
    UsageLimitExceeded(#[from] UsageLimitError),

    // -- Generic -------------------------------------------------------------
    /// Anything not recognised as one of the kinds above.  Carries the
    /// original message.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unexpected(format!("json error: {err}"))
    }
}

impl From<SchemaError> for GatewayError {
    fn from(err: SchemaError) -> Self {
        Self::SchemaValidation {
            reason: err.to_string(),
        }
    }
}

impl From<ModelError> for GatewayError {
    fn from(err: ModelError) -> Self {
        Self::ModelBehavior {
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lower-layer errors
// ---------------------------------------------------------------------------

/// Failure reported by a completion backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// The HTTP request to the provider failed.  `retryable` is set for
    /// connection failures, rate limiting and 5xx responses.
    #[error("model request failed: {reason}")]
    RequestFailed { reason: String, retryable: bool },

    /// The provider response could not be parsed.
    #[error("model response parse error: {reason}")]
    ParseFailed { reason: String },

    /// The streaming connection broke or produced invalid data.
    #[error("model stream error: {reason}")]
    StreamInterrupted { reason: String },

    /// A provider that needs an API key has none configured.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    /// The model reference names a provider that is not registered.
    #[error("unknown model provider `{provider}` in `{reference}`")]
    UnknownProvider { provider: String, reference: String },

    /// The model reference is malformed (`openai:`, `:gpt-4o`, empty).
    #[error("invalid model reference `{reference}`")]
    InvalidReference { reference: String },
}

impl ModelError {
    /// Whether the failure is worth another attempt under the agent's retry
    /// policy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed { retryable, .. } => *retryable,
            Self::StreamInterrupted { .. } => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestFailed {
            retryable: err.is_timeout() || err.is_connect() || err.is_request(),
            reason: err.to_string(),
        }
    }
}

/// Failure raised by a tool handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    /// The arguments passed validation but the handler cannot accept them.
    /// Reported to the caller as an argument error, not an execution failure.
    pub invalid_arguments: bool,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            invalid_arguments: false,
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            invalid_arguments: true,
        }
    }
}

/// Failure compiling a shape or validating a value against it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The declarative shape itself is malformed.
    #[error("invalid schema: {reason}")]
    Invalid { reason: String },

    /// A value does not conform to the shape.
    #[error("{reason}")]
    Mismatch { reason: String },
}

// ---------------------------------------------------------------------------
// Boundary mapping
// ---------------------------------------------------------------------------

/// Discriminant of [`GatewayError`], used for the boundary mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    DuplicateAgentId,
    AgentNotFound,
    ToolNotFound,
    ArgumentValidationError,
    ToolExecutionError,
    SchemaValidationError,
    InvalidRequest,
    ResultValidationError,
    ModelBehaviorError,
    UsageLimitExceeded,
    UnexpectedError,
}

/// Coarse grouping a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    BadInput,
    Model,
    Limit,
    Internal,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::DuplicateAgentId,
        ErrorKind::AgentNotFound,
        ErrorKind::ToolNotFound,
        ErrorKind::ArgumentValidationError,
        ErrorKind::ToolExecutionError,
        ErrorKind::SchemaValidationError,
        ErrorKind::InvalidRequest,
        ErrorKind::ResultValidationError,
        ErrorKind::ModelBehaviorError,
        ErrorKind::UsageLimitExceeded,
        ErrorKind::UnexpectedError,
    ];

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::DuplicateAgentId => "duplicate_agent_id",
            Self::AgentNotFound => "agent_not_found",
            Self::ToolNotFound => "tool_not_found",
            Self::ArgumentValidationError => "argument_validation_error",
            Self::ToolExecutionError => "tool_execution_error",
            Self::SchemaValidationError => "schema_validation_error",
            Self::InvalidRequest => "invalid_request",
            Self::ResultValidationError => "result_validation_error",
            Self::ModelBehaviorError => "model_behavior_error",
            Self::UsageLimitExceeded => "usage_limit_exceeded",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    /// Name used in the `error_type` field of error payloads.
    pub fn name(self) -> &'static str {
        match self {
            Self::DuplicateAgentId => "DuplicateAgentId",
            Self::AgentNotFound => "AgentNotFound",
            Self::ToolNotFound => "ToolNotFound",
            Self::ArgumentValidationError => "ArgumentValidationError",
            Self::ToolExecutionError => "ToolExecutionError",
            Self::SchemaValidationError => "SchemaValidationError",
            Self::InvalidRequest => "InvalidRequest",
            Self::ResultValidationError => "ResultValidationError",
            Self::ModelBehaviorError => "ModelBehaviorError",
            Self::UsageLimitExceeded => "UsageLimitExceeded",
            Self::UnexpectedError => "UnexpectedError",
        }
    }

    /// HTTP status code a transport should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            Self::DuplicateAgentId => 409,
            Self::AgentNotFound | Self::ToolNotFound => 404,
            Self::ArgumentValidationError | Self::ResultValidationError => 422,
            Self::SchemaValidationError | Self::InvalidRequest => 400,
            Self::ModelBehaviorError => 502,
            Self::UsageLimitExceeded => 429,
            Self::ToolExecutionError | Self::UnexpectedError => 500,
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            Self::AgentNotFound | Self::ToolNotFound => ErrorCategory::NotFound,
            Self::DuplicateAgentId => ErrorCategory::Conflict,
            Self::ArgumentValidationError | Self::SchemaValidationError | Self::InvalidRequest => {
                ErrorCategory::BadInput
            }
            Self::ResultValidationError | Self::ModelBehaviorError => ErrorCategory::Model,
            Self::UsageLimitExceeded => ErrorCategory::Limit,
            Self::ToolExecutionError | Self::UnexpectedError => ErrorCategory::Internal,
        }
    }

    /// Whether the caller can reasonably fix its request and try again.
    pub fn is_retryable_by_caller(self) -> bool {
        matches!(
            self,
            Self::AgentNotFound
                | Self::ToolNotFound
                | Self::ArgumentValidationError
                | Self::SchemaValidationError
                | Self::InvalidRequest
        )
    }
}

/// Boundary-facing rendering of a [`GatewayError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutcome {
    /// HTTP status, not part of the JSON payload.
    #[serde(skip)]
    pub http_status: u16,
    /// Always `"error"`.
    pub status: &'static str,
    pub error_type: &'static str,
    pub code: &'static str,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub message: String,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateAgentId { .. } => ErrorKind::DuplicateAgentId,
            Self::AgentNotFound { .. } => ErrorKind::AgentNotFound,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::ArgumentValidation { .. } => ErrorKind::ArgumentValidationError,
            Self::ToolExecution { .. } => ErrorKind::ToolExecutionError,
            Self::SchemaValidation { .. } => ErrorKind::SchemaValidationError,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::ResultValidation { .. } => ErrorKind::ResultValidationError,
            Self::ModelBehavior { .. } => ErrorKind::ModelBehaviorError,
            Self::UsageLimitExceeded(_) => ErrorKind::UsageLimitExceeded,
            Self::Unexpected(_) => ErrorKind::UnexpectedError,
        }
    }

    /// Map this error to its boundary outcome.
    pub fn outcome(&self) -> ErrorOutcome {
        let kind = self.kind();
        ErrorOutcome {
            http_status: kind.http_status(),
            status: "error",
            error_type: kind.name(),
            code: kind.code(),
            category: kind.category(),
            retryable: kind.is_retryable_by_caller(),
            message: self.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
