use actix_web::error::{JsonPayloadError, PathError, QueryPayloadError};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::media::MediaError;
use crate::models::FieldError;
use crate::store::StoreError;

/// Every failure a handler can surface, rendered as the JSON error envelope
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    result: bool,
    error_type: u16,
    error_message: ErrorMessage<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ErrorMessage<'a> {
    Text(String),
    Fields(&'a [FieldError]),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_message = match self {
            ApiError::Validation(fields) => ErrorMessage::Fields(fields),
            ApiError::Internal(detail) => {
                log::error!("Internal server error: {}", detail);
                ErrorMessage::Text("Internal server error".to_string())
            }
            other => ErrorMessage::Text(other.to_string()),
        };

        HttpResponse::build(status).json(ErrorBody {
            result: false,
            error_type: status.as_u16(),
            error_message,
        })
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::InvalidInput(msg) => ApiError::BadRequest(msg),
            StoreError::Database(_) | StoreError::Poisoned => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::UnsupportedExtension(..) | MediaError::TooLarge(_) => {
                ApiError::BadRequest(err.to_string())
            }
            MediaError::NotFound(_) => ApiError::NotFound(err.to_string()),
            MediaError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

// ==================== Extractor error handlers ====================

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let field = match &err {
        JsonPayloadError::Deserialize(e) => {
            let msg = e.to_string();
            match missing_field(&msg).map(str::to_owned) {
                Some(name) => {
                    FieldError::new(&["body", name.as_str()], "Field required").kind("missing")
                }
                None if e.is_data() => FieldError::new(&["body"], msg).kind("value_error"),
                None => FieldError::new(&["body"], msg).kind("json_invalid"),
            }
        }
        JsonPayloadError::ContentType => {
            FieldError::new(&["body"], "Expected content type application/json").kind("content_type")
        }
        other => FieldError::new(&["body"], other.to_string()),
    };
    ApiError::Validation(vec![field]).into()
}

pub fn path_error_handler(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    let field = FieldError::new(&["path"], err.to_string()).kind("int_parsing");
    ApiError::Validation(vec![field]).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let field = FieldError::new(&["query"], err.to_string()).kind("int_parsing");
    ApiError::Validation(vec![field]).into()
}

fn missing_field(msg: &str) -> Option<&str> {
    let rest = msg.strip_prefix("missing field `")?;
    rest.split('`').next()
}
