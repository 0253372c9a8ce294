use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("{message}")]
    Unprocessable { message: String },

    #[error("Invalid shapefile: {message}")]
    ShapefileError { message: String },

    #[error("GeoServer error: {message}")]
    GeoServerError { message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Authentication service error: {message}")]
    AuthServiceError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable {
            message: message.into(),
        }
    }

    pub fn shapefile(message: impl Into<String>) -> Self {
        Self::ShapefileError {
            message: message.into(),
        }
    }

    pub fn geoserver(message: impl Into<String>) -> Self {
        Self::GeoServerError {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    /// HTTP status the API layer answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound { .. } => 404,
            AppError::Unauthorized { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::BadRequest { .. } => 400,
            AppError::Unprocessable { .. }
            | AppError::ShapefileError { .. }
            | AppError::InvalidConfigValueError { .. } => 422,
            AppError::GeoServerError { .. }
            | AppError::StorageError { .. }
            | AppError::HttpError(_) => 502,
            AppError::AuthServiceError { .. } => 503,
            _ => 500,
        }
    }

    /// Whether the message is safe to show to API clients as-is.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
