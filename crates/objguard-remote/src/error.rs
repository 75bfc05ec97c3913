#[derive(Debug, thiserror::Error)]
pub enum RemoteUserError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("remote service returned status {0}")]
    Status(u16),
    #[error("invalid user representation: {0}")]
    Decode(String),
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for RemoteUserError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteUserError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteUserError::Status(status.as_u16())
        } else {
            RemoteUserError::Connection(err.to_string())
        }
    }
}
