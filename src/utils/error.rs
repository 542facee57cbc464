use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Unsupported file type: {filename}")]
    UnsupportedFileType { filename: String },

    #[error("Missing upload field: {field}")]
    MissingUpload { field: String },

    #[error("Upload too large: {message}")]
    PayloadTooLarge { message: String },

    #[error("File parsing error: {message}")]
    ParseError { message: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Spreadsheet processing error: {0}")]
    SpreadsheetError(#[from] calamine::XlsxError),

    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Template references an undefined value: {message}")]
    UndefinedReference { message: String },

    #[error("Template rendering failed: {0}")]
    TemplateRender(#[source] minijinja::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 使用者上傳或請求內容有誤
    Input,
    Template,
    Storage,
    Configuration,
    Internal,
}

impl From<minijinja::Error> for EtlError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::TemplateNotFound => EtlError::TemplateNotFound {
                name: err.name().unwrap_or("<unknown>").to_string(),
            },
            minijinja::ErrorKind::UndefinedError => EtlError::UndefinedReference {
                message: err.to_string(),
            },
            _ => EtlError::TemplateRender(err),
        }
    }
}

impl EtlError {
    pub fn parse(message: impl Into<String>) -> Self {
        EtlError::ParseError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::UnsupportedFileType { .. }
            | EtlError::MissingUpload { .. }
            | EtlError::PayloadTooLarge { .. }
            | EtlError::ParseError { .. }
            | EtlError::CsvError(_)
            | EtlError::SpreadsheetError(_) => ErrorCategory::Input,
            EtlError::TemplateNotFound { .. }
            | EtlError::UndefinedReference { .. }
            | EtlError::TemplateRender(_) => ErrorCategory::Template,
            EtlError::IoError(_) => ErrorCategory::Storage,
            EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => ErrorCategory::Configuration,
            EtlError::SerializationError(_) | EtlError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EtlError::UnsupportedFileType { .. } => StatusCode::BAD_REQUEST,
            EtlError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            EtlError::MissingUpload { .. }
            | EtlError::ParseError { .. }
            | EtlError::CsvError(_)
            | EtlError::SpreadsheetError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to API callers. Server-side failures are not
    /// described in detail; the full error goes to the log instead.
    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Input => self.to_string(),
            ErrorCategory::Template => match self {
                EtlError::UndefinedReference { .. } => self.to_string(),
                _ => "Script template could not be rendered".to_string(),
            },
            ErrorCategory::Storage => "Generated script could not be saved".to_string(),
            ErrorCategory::Configuration => self.to_string(),
            ErrorCategory::Internal => "Internal Server Error".to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EtlError::UnsupportedFileType { .. } => "Upload a .csv, .txt (tab-separated) or .xlsx file",
            EtlError::MissingUpload { .. } => "Send the file in a multipart form field named 'file'",
            EtlError::PayloadTooLarge { .. } => "Upload a smaller file or raise server.max_upload_mb",
            EtlError::TemplateNotFound { .. } => {
                "Check that the templates directory contains the configured script template"
            }
            EtlError::UndefinedReference { .. } => {
                "Provide every field the template references, or switch templates.undefined to 'lenient'"
            }
            EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => "Fix the configuration file or command line flags",
            EtlError::IoError(_) => "Check that the output directory exists and is writable",
            _ => "Check the server logs for details",
        }
    }
}
