use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Shared outbound client for the metadata and payment providers.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    #[instrument(skip(self, token), fields(url = %url))]
    pub async fn get_json_bearer<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        debug!("Making GET request");
        let response = self.send(self.client.get(url).bearer_auth(token)).await?;
        let json = response.json::<T>().await?;
        Ok(json)
    }

    #[instrument(skip(self, token, form), fields(url = %url))]
    pub async fn post_form_bearer<T: DeserializeOwned, F: Serialize + ?Sized>(
        &self,
        url: &str,
        token: &str,
        form: &F,
    ) -> Result<T> {
        debug!("Making POST request");
        let response = self
            .send(self.client.post(url).bearer_auth(token).form(form))
            .await?;
        let json = response.json::<T>().await?;
        Ok(json)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;

        if !response.status().is_success() {
            error!("HTTP request failed with status: {}", response.status());
            return Err(anyhow::anyhow!("HTTP request failed: {}", response.status()));
        }

        Ok(response)
    }
}
