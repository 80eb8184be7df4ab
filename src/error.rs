use thiserror::Error;

// ---------------------------------------------------------------------------
// Library error type
// ---------------------------------------------------------------------------

/// Errors returned at the boundary of every component.
///
/// Finding no peaks is not an error (empty vectors are returned), and a
/// diverging fit is reported through [`crate::analysis::lorentz::FitStatus`]
/// rather than through this type.
#[derive(Debug, Error)]
pub enum RamanError {
    /// Wrong shape or content of an argument (length mismatch, NaN, bad bounds…).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A compound was requested that is not present in the library.
    #[error("missing reference: {0}")]
    MissingReference(String),

    /// A data file could not be understood.
    #[error("parse error: {0}")]
    Parse(String),

    /// The reference spectrum fetcher failed (transport or HTTP status).
    #[error("download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, RamanError>;

impl RamanError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        RamanError::InvalidInput(message.into())
    }

    pub fn missing_reference<S: Into<String>>(label: S) -> Self {
        RamanError::MissingReference(label.into())
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        RamanError::Parse(message.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            RamanError::invalid_input("x and y differ").to_string(),
            "invalid input: x and y differ"
        );
        assert_eq!(
            RamanError::missing_reference("WATER").to_string(),
            "missing reference: WATER"
        );
    }

    #[test]
    fn from_io() {
        let err: RamanError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, RamanError::Io(_)));
    }
}
