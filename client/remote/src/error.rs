use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Not authenticated")]
    Unauthorized,
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Malformed(err.to_string())
    }
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}
