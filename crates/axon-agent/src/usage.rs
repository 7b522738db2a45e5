//! Usage accounting and limits.
//!
//! A run accumulates [`Usage`] across model requests.  [`UsageLimits`] is
//! checked twice per step: before a request is sent (so an exhausted budget
//! never reaches the provider) and after the response is accounted.

use serde::{Deserialize, Serialize};

/// Request limit applied when a caller supplies no limits at all.
pub const DEFAULT_REQUEST_LIMIT: u64 = 50;

/// Token counts reported for a single model response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Aggregate usage of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of model requests that produced a response.
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Account one completed model request.
    pub fn record(&mut self, response: RequestUsage) {
        self.requests += 1;
        self.input_tokens += response.input_tokens;
        self.output_tokens += response.output_tokens;
        self.total_tokens += response.input_tokens + response.output_tokens;
    }
}

/// Budget a single run must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageLimits {
    #[serde(alias = "max_requests")]
    pub request_limit: Option<u64>,
    #[serde(alias = "request_tokens_limit")]
    pub input_tokens_limit: Option<u64>,
    #[serde(alias = "response_tokens_limit")]
    pub output_tokens_limit: Option<u64>,
    #[serde(alias = "max_total_tokens")]
    pub total_tokens_limit: Option<u64>,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            request_limit: Some(DEFAULT_REQUEST_LIMIT),
            input_tokens_limit: None,
            output_tokens_limit: None,
            total_tokens_limit: None,
        }
    }
}

/// Which limit was hit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageLimitError {
    #[error("the next request would exceed the request limit of {limit}")]
    RequestLimit { limit: u64 },

    #[error("input tokens ({used}) reached the limit of {limit}")]
    InputTokens { limit: u64, used: u64 },

    #[error("output tokens ({used}) reached the limit of {limit}")]
    OutputTokens { limit: u64, used: u64 },

    #[error("total tokens ({used}) reached the limit of {limit}")]
    TotalTokens { limit: u64, used: u64 },
}

impl UsageLimits {
    /// No limits at all.  Only reachable programmatically; callers on the wire
    /// always get at least the default request limit.
    pub fn unlimited() -> Self {
        Self {
            request_limit: None,
            input_tokens_limit: None,
            output_tokens_limit: None,
            total_tokens_limit: None,
        }
    }

    pub fn with_request_limit(mut self, limit: u64) -> Self {
        self.request_limit = Some(limit);
        self
    }

    pub fn with_total_tokens_limit(mut self, limit: u64) -> Self {
        self.total_tokens_limit = Some(limit);
        self
    }

    /// Check whether another request may be sent.
    ///
    /// Token limits are treated as exhausted once usage has *reached* them,
    /// so a zero budget rejects the very first request.
    pub fn check_before_request(&self, usage: &Usage) -> Result<(), UsageLimitError> {
        if let Some(limit) = self.request_limit
            && usage.requests + 1 > limit
        {
            return Err(UsageLimitError::RequestLimit { limit });
        }
        check_reached(self.input_tokens_limit, usage.input_tokens, |limit, used| {
            UsageLimitError::InputTokens { limit, used }
        })?;
        check_reached(self.output_tokens_limit, usage.output_tokens, |limit, used| {
            UsageLimitError::OutputTokens { limit, used }
        })?;
        check_reached(self.total_tokens_limit, usage.total_tokens, |limit, used| {
            UsageLimitError::TotalTokens { limit, used }
        })
    }

    /// Check token usage after a response has been accounted.
    pub fn check_after_response(&self, usage: &Usage) -> Result<(), UsageLimitError> {
        let over = |limit: Option<u64>, used: u64| limit.filter(|l| used > *l);

        if let Some(limit) = over(self.input_tokens_limit, usage.input_tokens) {
            return Err(UsageLimitError::InputTokens {
                limit,
                used: usage.input_tokens,
            });
        }
        if let Some(limit) = over(self.output_tokens_limit, usage.output_tokens) {
            return Err(UsageLimitError::OutputTokens {
                limit,
                used: usage.output_tokens,
            });
        }
        if let Some(limit) = over(self.total_tokens_limit, usage.total_tokens) {
            return Err(UsageLimitError::TotalTokens {
                limit,
                used: usage.total_tokens,
            });
        }
        Ok(())
    }
}

fn check_reached(
    limit: Option<u64>,
    used: u64,
    err: impl FnOnce(u64, u64) -> UsageLimitError,
) -> Result<(), UsageLimitError> {
    match limit {
        Some(limit) if used >= limit => Err(err(limit, used)),
        _ => Ok(()),
    }
}
