use std::fmt::Display;

use reqwest::{Client, Url, redirect};
use serde::de::DeserializeOwned;

use crate::config::RemoteOptions;
use crate::error::RemoteUserError;
use crate::user::UserRep;

/// Fetches user representations from `GET {base_url}/{id}/`.
#[derive(Debug, Clone)]
pub struct RemoteUserClient {
    http: Client,
    base_url: Url,
}

impl RemoteUserClient {
    pub fn new(options: RemoteOptions) -> Result<Self, RemoteUserError> {
        let base_url = Url::parse(options.base_url.trim_end_matches('/'))
            .map_err(|e| RemoteUserError::InvalidUrl(format!("{}: {e}", options.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteUserError::InvalidUrl(options.base_url));
        }

        // 3xx is not a success here, so redirects are surfaced as statuses.
        let http = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| RemoteUserError::Connection(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn fetch(&self, user_id: impl Display) -> Result<UserRep, RemoteUserError> {
        self.fetch_as(user_id).await
    }

    /// Like [`fetch`](Self::fetch) but decodes into a caller-chosen
    /// representation.
    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        user_id: impl Display,
    ) -> Result<T, RemoteUserError> {
        let url = self.user_url(&user_id.to_string())?;
        tracing::debug!(%url, "fetching remote user");

        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            tracing::warn!(%url, error = %e, "remote user service unreachable");
            RemoteUserError::Connection(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "remote user service rejected request");
            return Err(RemoteUserError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RemoteUserError::Decode(e.to_string()))
    }

    fn user_url(&self, user_id: &str) -> Result<Url, RemoteUserError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteUserError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(user_id)
            .push("");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> RemoteUserClient {
        RemoteUserClient::new(RemoteOptions::new(base)).unwrap()
    }

    #[test]
    fn user_url_appends_id_and_trailing_slash() {
        let url = client("http://users.local/api/users").user_url("42").unwrap();

        assert_eq!(url.as_str(), "http://users.local/api/users/42/");
    }

    #[test]
    fn trailing_slash_on_base_is_tolerated() {
        let url = client("http://users.local/api/users/").user_url("42").unwrap();

        assert_eq!(url.as_str(), "http://users.local/api/users/42/");
    }

    #[test]
    fn user_id_is_percent_encoded() {
        let url = client("http://users.local/users").user_url("a/b").unwrap();

        assert_eq!(url.as_str(), "http://users.local/users/a%2Fb/");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = RemoteUserClient::new(RemoteOptions::new("not a url")).unwrap_err();

        assert!(matches!(err, RemoteUserError::InvalidUrl(_)));
    }

    #[test]
    fn rejects_non_hierarchical_base_url() {
        let err = RemoteUserClient::new(RemoteOptions::new("mailto:ops@example.com")).unwrap_err();

        assert!(matches!(err, RemoteUserError::InvalidUrl(_)));
    }
}
