use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};

/// One entry of the remote public instance list. Either field may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PublicInstance {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

pub trait InstanceDirectory: Send + Sync {
    fn instances(&self) -> Result<Vec<PublicInstance>>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct HttpDirectory {
    http: HttpClient,
    url: String,
    user_agent: String,
}

impl HttpDirectory {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            bail!("directory: url required");
        }
        if config.user_agent.trim().is_empty() {
            bail!("directory: user agent required");
        }
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(10)))
                .build()
                .context("directory: build http client")?,
        };

        Ok(Self {
            http,
            url: config.url,
            user_agent: config.user_agent,
        })
    }
}

impl InstanceDirectory for HttpDirectory {
    fn instances(&self) -> Result<Vec<PublicInstance>> {
        let resp = self
            .http
            .get(&self.url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .context("directory: request instance list")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            bail!("directory: request failed: {} - {}", status, body);
        }

        let instances: Vec<PublicInstance> =
            resp.json().context("directory: decode instance list")?;
        Ok(instances)
    }
}
