use axum::http::StatusCode;

/// Failure taxonomy at the persistence edge.
///
/// `Transient` covers connection/IO faults the caller may retry;
/// `Constraint` is a data-shape violation the REST layer surfaces as 4xx.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Transient(#[from] sqlx::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("not found")]
    NotFound,
}

impl StoreError {
    /// Classify an sqlx error: integrity violations become `Constraint`,
    /// everything else stays transient.
    pub fn from_sqlx(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if let Some(code) = db.code() {
                // Postgres class 23 = integrity constraint violation
                if code.starts_with("23") {
                    return StoreError::Constraint(db.message().to_string());
                }
            }
        }
        if matches!(e, sqlx::Error::RowNotFound) {
            return StoreError::NotFound;
        }
        StoreError::Transient(e)
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            StoreError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Constraint(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn into_response(self) -> (StatusCode, String) {
        (self.http_status(), self.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
