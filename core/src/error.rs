use rusqlite::ErrorCode;
use thiserror::Error;

pub type PlanResult<T> = Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("plan item {0} is not a recipe item")]
    NotARecipeItem(i64),

    #[error("servings must be a positive number (got {0})")]
    InvalidServings(f64),

    /// SQLITE_BUSY / SQLITE_LOCKED: another writer holds the database.
    #[error("database is busy: {0}")]
    Busy(#[source] rusqlite::Error),

    #[error("{operation} failed after {attempts} attempts")]
    PersistenceFailure {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<PlanError>,
    },

    #[error("database error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("invalid macro snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl PlanError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Errors worth retrying after a backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Caller-side problems (missing rows, bad input) as opposed to store failures.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::NotARecipeItem(_) | Self::InvalidServings(_)
        )
    }
}

impl From<rusqlite::Error> for PlanError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Self::Busy(err)
            }
            _ => Self::Sqlite(err),
        }
    }
}
