use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// Base URL of the user service, without the trailing user id.
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl RemoteOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}
