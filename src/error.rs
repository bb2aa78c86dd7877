//! Error types shared by the storage, aggregation, and HTTP layers.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::model::FieldError;

/// Failures raised by the record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("a cattle record with tag '{tag_id}' already exists in farm '{farm_id}'")]
    DuplicateTag { farm_id: String, tag_id: String },

    #[error("farm '{0}' already exists")]
    DuplicateFarm(String),

    #[error("cattle record {animal_id} was modified concurrently")]
    VersionConflict { animal_id: i64 },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

/// Errors surfaced to API callers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let error = match &rejection {
            JsonRejection::JsonDataError(_) => rejected_field(&rejection.body_text(), "body"),
            _ => FieldError::new("body", rejection.body_text()),
        };
        AppError::Validation(vec![error])
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(vec![rejected_field(&rejection.body_text(), "query")])
    }
}

/// Turn axum's `<summary>: <path>: <reason>` rejection text into a field
/// error, using `default_field` when the text carries no field path.
fn rejected_field(text: &str, default_field: &str) -> FieldError {
    let detail = text.split_once(": ").map_or(text, |(_, rest)| rest);
    match detail.split_once(": ") {
        Some((path, reason)) if !path.is_empty() && !path.contains(char::is_whitespace) => {
            FieldError::new(path, reason)
        }
        _ => FieldError::new(default_field, detail),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Store(
                StoreError::DuplicateTag { .. }
                | StoreError::DuplicateFarm(_)
                | StoreError::VersionConflict { .. },
            ) => StatusCode::CONFLICT,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let fields = match self {
            AppError::Validation(fields) => fields,
            _ => Vec::new(),
        };
        let body = Json(ErrorBody {
            code: status.as_u16(),
            message,
            fields,
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation(vec![]).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("gone".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(StoreError::DuplicateTag {
                farm_id: "F1".into(),
                tag_id: "T1".into(),
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(StoreError::Database(sqlx::Error::PoolTimedOut)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rejected_field_extracts_path() {
        let error = rejected_field(
            "Failed to deserialize the JSON body into the target type: \
             health_readings[1].heart_rate: invalid type: string \"fast\", expected f64",
            "body",
        );
        assert_eq!(error.field, "health_readings[1].heart_rate");
        assert_eq!(error.message, "invalid type: string \"fast\", expected f64");

        let error = rejected_field(
            "Failed to deserialize query string: invalid digit found in string",
            "query",
        );
        assert_eq!(error, FieldError::new("query", "invalid digit found in string"));
    }
}
