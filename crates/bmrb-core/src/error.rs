use thiserror::Error;

pub type Result<T> = std::result::Result<T, BmrbError>;

#[derive(Debug, Error)]
pub enum BmrbError {
    /// A table, column or schema name that cannot be quoted safely.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The store rejected a well-formed statement. `detail` carries the raw
    /// store message and is only populated in diagnostic mode.
    #[error("invalid query: {message}")]
    InvalidQuery {
        message: String,
        detail: Option<String>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not renderable: {0}")]
    NotRenderable(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BmrbError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidIdentifier(_) | Self::InvalidQuery { .. } | Self::InvalidRequest(_) => 400,
            Self::NotFound(_) | Self::NotRenderable(_) => 404,
            Self::Parse { .. } => 422,
            Self::ServerError(_) | Self::Codec(_) | Self::Cache(_) | Self::Io(_) => 500,
        }
    }

    /// Message safe to show to an API client. Server-side failures are
    /// collapsed to a generic message unless `diagnostic` is set.
    pub fn public_message(&self, diagnostic: bool) -> String {
        match self {
            Self::InvalidQuery {
                message,
                detail: Some(detail),
            } if diagnostic => format!("{message}: {detail}"),
            Self::ServerError(_) | Self::Codec(_) | Self::Cache(_) | Self::Io(_) if !diagnostic => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for BmrbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_not_found_family() {
        assert_eq!(BmrbError::NotFound("x".into()).http_status(), 404);
        assert_eq!(BmrbError::NotRenderable("x".into()).http_status(), 404);
    }

    #[test]
    fn http_status_client_errors() {
        assert_eq!(BmrbError::InvalidIdentifier("x".into()).http_status(), 400);
        let err = BmrbError::InvalidQuery {
            message: "Invalid 'from' parameter.".into(),
            detail: None,
        };
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn http_status_server_error() {
        assert_eq!(BmrbError::ServerError("boom".into()).http_status(), 500);
    }

    #[test]
    fn public_message_hides_store_detail() {
        let err = BmrbError::InvalidQuery {
            message: "Invalid 'from' parameter.".into(),
            detail: Some("relation \"nope\" does not exist".into()),
        };
        assert_eq!(err.public_message(false), "invalid query: Invalid 'from' parameter.");
        assert!(err.public_message(true).contains("does not exist"));

        let err = BmrbError::ServerError("SELECT * FROM secret".into());
        assert_eq!(err.public_message(false), "internal server error");
        assert!(err.public_message(true).contains("secret"));
    }
}
