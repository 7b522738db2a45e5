//! HTTP rendering of gateway errors.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use axon_agent::GatewayError;

/// A [`GatewayError`] on its way out of a handler.
///
/// Rendered as the error's [`ErrorOutcome`](axon_agent::ErrorOutcome) with
/// the HTTP status its kind maps to.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(GatewayError::InvalidRequest {
            reason: rejection.body_text(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let outcome = self.0.outcome();
        let status =
            StatusCode::from_u16(outcome.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(outcome)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_error_kind() {
        let cases = [
            (
                GatewayError::AgentNotFound {
                    agent_id: "a".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                GatewayError::DuplicateAgentId {
                    agent_id: "a".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                GatewayError::ArgumentValidation {
                    tool_name: "t".into(),
                    reason: "r".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                GatewayError::ModelBehavior { reason: "r".into() },
                StatusCode::BAD_GATEWAY,
            ),
            (GatewayError::Unexpected("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
