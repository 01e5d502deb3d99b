use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::e621::io::Login;
use crate::e621::sender::entries::BulkPostEntry;

pub(crate) mod entries;

/// Base URL of the unrestricted site.
const ADULT_BASE_URL: &str = "https://e621.net";

/// Base URL of the safe-content mirror.
const SAFE_BASE_URL: &str = "https://e926.net";

/// Client identification sent with every request, required by the API's terms.
const CLIENT_ID: &str = concat!("e621_autoviewer/", env!("CARGO_PKG_VERSION"));

/// Request timeout for all API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What can go wrong talking to the API. Transport failures and non-success
/// statuses are kept apart because the fetcher logs them differently, but
/// neither is retried on the same page.
#[derive(Debug, Error)]
pub(crate) enum SearchError {
    /// The server answered with a non-success status code.
    #[error("request failed with HTTP status {0}")]
    Status(u16),
    /// The request never completed, or the response body did not parse.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Sends all requests to the API. Cloning is cheap and shares the underlying
/// connection pool and the selected base URL, so the scheduler, the fetcher,
/// and the background prefetch task all talk through the same client.
#[derive(Clone)]
pub(crate) struct RequestSender {
    client: Client,
    base_url: Arc<RwLock<String>>,
    auth: Option<(String, String)>,
}

impl RequestSender {
    /// Creates the sender. Credentials are attached only when both the
    /// username and the API key are present in the login file.
    pub(crate) fn new(login: &Login) -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(CLIENT_ID)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let auth = if login.is_empty() {
            None
        } else {
            Some((login.username().to_string(), login.api_key().to_string()))
        };

        Ok(RequestSender {
            client,
            base_url: Arc::new(RwLock::new(SAFE_BASE_URL.to_string())),
            auth,
        })
    }

    /// Whether requests carry Basic-auth credentials.
    pub(crate) fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    /// Switches between the adult and safe base URL. Called whenever the
    /// active preset changes, since the rating rule depends on it.
    pub(crate) fn set_adult_base(&self, adult: bool) {
        let base = if adult { ADULT_BASE_URL } else { SAFE_BASE_URL };
        trace!("API base URL set to {base}");
        match self.base_url.write() {
            Ok(mut guard) => *guard = base.to_string(),
            Err(poisoned) => *poisoned.into_inner() = base.to_string(),
        }
    }

    fn base_url(&self) -> String {
        match self.base_url.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Requests one page of posts matching `tags`.
    pub(crate) async fn bulk_search(
        &self,
        tags: &str,
        page: u16,
        limit: u8,
    ) -> Result<BulkPostEntry, SearchError> {
        let url = format!("{}/posts.json", self.base_url());
        let limit = limit.to_string();
        let page = page.to_string();
        let mut request = self.client.get(&url).query(&[
            ("tags", tags),
            ("limit", limit.as_str()),
            ("page", page.as_str()),
            ("_client", CLIENT_ID),
        ]);
        if let Some((username, api_key)) = &self.auth {
            request = request.basic_auth(username, Some(api_key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SearchError::Status(response.status().as_u16()));
        }

        Ok(response.json::<BulkPostEntry>().await?)
    }

    /// Downloads the raw bytes behind a file URL, used to preload an image
    /// before it is committed to the display.
    pub(crate) async fn get_bytes_from_url(&self, url: &str) -> Result<Vec<u8>, SearchError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SearchError::Status(response.status().as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
