// SPDX-License-Identifier: PMPL-1.0-or-later

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tank_condition::SelectorError;
use tank_store::StoreError;

/// API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SelectorError> for ApiError {
    fn from(e: SelectorError) -> Self {
        ApiError::BadRequest(format!("invalid selector: {e}"))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg,
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tank_core::TankError;

    #[test]
    fn test_store_error_mapping() {
        let not_found: ApiError = StoreError::NotFound("nodes".to_string()).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let driver_not_found: ApiError =
            StoreError::from(TankError::NotFound("node /tank/a".to_string())).into();
        assert_eq!(driver_not_found.status(), StatusCode::NOT_FOUND);

        let unsupported: ApiError =
            StoreError::from(TankError::unsupported("hierarchy", "watch")).into();
        assert_eq!(unsupported.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let selector: ApiError = SelectorError::Empty.into();
        assert_eq!(selector.status(), StatusCode::BAD_REQUEST);
    }
}
