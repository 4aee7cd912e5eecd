use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::MeterSettings;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("request to meter failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("meter answered with HTTP {0}")]
    Status(StatusCode),
}

/// Anything that hands out one raw SML response per call.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError>;
}

/// HTTP client for the meter's local SML endpoint.
pub struct MeterClient {
    url: String,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl MeterClient {
    pub fn new(settings: &MeterSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            url: settings.url.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            client,
        })
    }
}

#[async_trait]
impl FrameSource for MeterClient {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
