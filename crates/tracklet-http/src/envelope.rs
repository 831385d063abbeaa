//! API response envelope and error codes.
//!
//! Every JSON response has the shape `{code, message, data?, total?, extra?}`.
//! Responses built here carry their envelope (and, for internal failures, the
//! captured error) as response extensions so the tracking middleware can
//! record them without re-reading the body.

use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracklet_core::ErrorPayload;

/// Envelope codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCode {
    Success,
    ParamError,
    AccessForbidden,
    ResourceNotExist,
    OperationNotAllowed,
    ResourceAlreadyExist,
    FieldOccupied,
    InternalServerError,
}

impl ApiCode {
    pub fn code(self) -> u32 {
        match self {
            ApiCode::Success => 200,
            ApiCode::ParamError => 400,
            ApiCode::AccessForbidden => 4003,
            ApiCode::ResourceNotExist => 404,
            ApiCode::OperationNotAllowed => 4005,
            ApiCode::ResourceAlreadyExist => 409,
            ApiCode::FieldOccupied => 4009,
            ApiCode::InternalServerError => 500,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ApiCode::Success => "SUCCESS",
            ApiCode::ParamError => "Invalid Params",
            ApiCode::AccessForbidden => "Access Forbidden",
            ApiCode::ResourceNotExist => "Resource Not Exist",
            ApiCode::OperationNotAllowed => "Operation Not Allowed",
            ApiCode::ResourceAlreadyExist => "Resource Already Exist",
            ApiCode::FieldOccupied => "Field Occupied",
            ApiCode::InternalServerError => "Internal Server Error",
        }
    }

    /// HTTP status for this code: the code itself when it is a valid status,
    /// otherwise its first three digits (`4003` → `400`).
    pub fn status(self) -> StatusCode {
        let code = self.code();
        let status = if (100..=599).contains(&code) {
            code
        } else {
            code / 10
        };
        StatusCode::from_u16(status as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Response envelope recorded by the middleware via `set_response_data`.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope(pub Value);

/// Internal failure recorded by the middleware via `set_error`.
#[derive(Debug, Clone)]
pub struct TrackedError(pub ErrorPayload);

/// Successful or failed API response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ApiCode::Success.code(),
            message: ApiCode::Success.message().to_string(),
            data: Some(data),
            total: None,
            extra: None,
        }
    }

    /// Page of rows plus the total row count.
    pub fn page(rows: T, total: u64) -> Self {
        Self::success(rows).with_total(total)
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

impl ApiResponse<()> {
    /// Success without a `data` field.
    pub fn ok() -> Self {
        Self {
            code: ApiCode::Success.code(),
            message: ApiCode::Success.message().to_string(),
            data: None,
            total: None,
            extra: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = serde_json::to_value(&self).unwrap_or_else(|e| {
            json!({
                "code": ApiCode::InternalServerError.code(),
                "message": format!("{}: {}", ApiCode::InternalServerError.message(), e),
            })
        });
        let mut response = (StatusCode::OK, Json(body.clone())).into_response();
        response.extensions_mut().insert(ResponseEnvelope(body));
        response
    }
}

fn detail(content: &Option<String>) -> String {
    match content {
        Some(c) if !c.is_empty() => format!(": {}", c),
        _ => String::new(),
    }
}

/// Failed API call.
///
/// Client errors are answered with their code and are not failures of the
/// request itself. `Internal` marks the request as failed.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid Params{}", fields(.0))]
    ParamError(Vec<String>),

    #[error("Access Forbidden{}", detail(.0))]
    AccessForbidden(Option<String>),

    #[error("Resource Not Exist{}", detail(.0))]
    ResourceNotExist(Option<String>),

    #[error("Operation Not Allowed{}", detail(.0))]
    OperationNotAllowed(Option<String>),

    #[error("Resource Already Exist{}", detail(.0))]
    ResourceAlreadyExist(Option<String>),

    #[error("Field Occupied{}", detail(.0))]
    FieldOccupied(Option<String>),

    #[error("Internal Server Error")]
    Internal(ErrorPayload),
}

fn fields(names: &[String]) -> String {
    if names.is_empty() {
        String::new()
    } else {
        format!(": {}", names.join(","))
    }
}

impl ApiError {
    /// Internal failure caused by `err`. Its type, message, and source chain
    /// are captured for the tracker; clients only see `e_type`/`e_value`.
    pub fn internal<E>(err: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        ApiError::Internal(ErrorPayload::from_error(err, true))
    }

    pub fn not_found(content: impl Into<String>) -> Self {
        ApiError::ResourceNotExist(Some(content.into()))
    }

    pub fn forbidden(target: impl Into<String>) -> Self {
        ApiError::AccessForbidden(Some(target.into()))
    }

    pub fn api_code(&self) -> ApiCode {
        match self {
            ApiError::ParamError(_) => ApiCode::ParamError,
            ApiError::AccessForbidden(_) => ApiCode::AccessForbidden,
            ApiError::ResourceNotExist(_) => ApiCode::ResourceNotExist,
            ApiError::OperationNotAllowed(_) => ApiCode::OperationNotAllowed,
            ApiError::ResourceAlreadyExist(_) => ApiCode::ResourceAlreadyExist,
            ApiError::FieldOccupied(_) => ApiCode::FieldOccupied,
            ApiError::Internal(_) => ApiCode::InternalServerError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.api_code().status()
    }

    fn extra(&self) -> Option<Value> {
        match self {
            ApiError::Internal(payload) => Some(json!({
                "e_type": payload.kind,
                "e_value": payload.value,
            })),
            _ => None,
        }
    }

    /// Envelope body of this error.
    pub fn envelope(&self) -> ApiResponse<()> {
        ApiResponse {
            code: self.api_code().code(),
            message: self.to_string(),
            data: None,
            total: None,
            extra: self.extra(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::to_value(self.envelope()).unwrap_or(Value::Null);
        let mut response = (status, Json(body.clone())).into_response();
        response.extensions_mut().insert(ResponseEnvelope(body));
        if let ApiError::Internal(payload) = self {
            response.extensions_mut().insert(TrackedError(payload));
        }
        response
    }
}
