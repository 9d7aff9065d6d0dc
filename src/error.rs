use thiserror::Error;

/// Rejected field input. Raised only by the value-object constructors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title is required")]
    TitleRequired,

    #[error("title cannot exceed {max} characters")]
    TitleTooLong { max: usize },

    #[error("description is required")]
    DescriptionRequired,

    #[error("description must have between {min} and {max} characters, got {len}")]
    DescriptionLength { min: usize, max: usize, len: usize },

    #[error("price cannot be negative")]
    PriceNegative,

    #[error("price must have at most 2 decimal places")]
    PricePrecision,

    #[error("'{0}' is not a valid price")]
    PriceFormat(String),

    #[error("price cannot exceed {max}")]
    PriceTooLarge { max: String },

    #[error("malformed request body: {0}")]
    Body(String),
}

/// Failures talking to the search backend.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search index bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("search query failed: {0}")]
    Query(String),

    #[error("search index write failed: {0}")]
    Write(String),

    #[error("unexpected search response: {0}")]
    Response(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

impl From<opensearch::Error> for SearchError {
    fn from(err: opensearch::Error) -> Self {
        SearchError::Query(err.to_string())
    }
}

/// Outcome of a catalog use case that did not succeed.
///
/// Absence is not represented here: handlers return `Option`/`bool` for it.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("a game titled '{0}' already exists")]
    Conflict(String),

    #[error("store failure: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Search(#[from] SearchError),
}

impl CatalogError {
    /// Stable machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::Validation(_) => "validation",
            CatalogError::Conflict(_) => "conflict",
            CatalogError::Store(_) => "store",
            CatalogError::Search(_) => "search",
        }
    }
}

/// True when a sqlx error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
