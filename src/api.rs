use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::session::SessionState;
use crate::transfer::{Subscription, SubscriptionService};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api: request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("api: server error: {0}")]
    Server(String),
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// Backend client for the account and subscription endpoints of the auth
/// instance.
pub struct ApiClient {
    http: HttpClient,
    user_agent: String,
    auth_url: Url,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct DeleteAccount<'a> {
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    channel_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    url: String,
    #[serde(default)]
    name: String,
}

impl ApiClient {
    pub fn new(auth_url: &str, config: &ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: user agent required");
        }
        let http = match config.http_client.clone() {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("api: build http client")?,
        };

        Ok(Self {
            http,
            user_agent: config.user_agent.clone(),
            auth_url: endpoint_root(auth_url)?,
        })
    }

    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        self.request_token("login", username, password)
    }

    pub fn register(&self, username: &str, password: &str) -> Result<String> {
        self.request_token("register", username, password)
    }

    pub fn delete_account(&self, token: &str, password: &str) -> Result<()> {
        let req = self
            .http
            .post(self.auth_url.join("user/delete")?)
            .header(AUTHORIZATION, token)
            .json(&DeleteAccount { password });
        let body: Value = self.send_json(req).context("api: delete account")?;
        check_error(&body)
    }

    pub fn subscriptions(&self, token: &str) -> Result<Vec<Subscription>> {
        let req = self
            .http
            .get(self.auth_url.join("subscriptions")?)
            .header(AUTHORIZATION, token);
        let items: Vec<SubscriptionItem> =
            self.send_json(req).context("api: fetch subscriptions")?;
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let channel_id = item.url.rsplit('/').next()?.to_string();
                if channel_id.is_empty() {
                    return None;
                }
                Some(Subscription {
                    channel_id,
                    name: item.name,
                })
            })
            .collect())
    }

    pub fn subscribe(&self, token: &str, channel_id: &str) -> Result<()> {
        let req = self
            .http
            .post(self.auth_url.join("subscribe")?)
            .header(AUTHORIZATION, token)
            .json(&SubscribeRequest { channel_id });
        let body: Value = self
            .send_json(req)
            .with_context(|| format!("api: subscribe to {channel_id}"))?;
        check_error(&body)
    }

    fn request_token(&self, path: &str, username: &str, password: &str) -> Result<String> {
        let req = self
            .http
            .post(self.auth_url.join(path)?)
            .json(&Credentials { username, password });
        let payload: TokenResponse = self
            .send_json(req)
            .with_context(|| format!("api: {path} request"))?;
        if let Some(error) = payload.error {
            return Err(ApiError::Server(error).into());
        }
        payload
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow!("api: {path} response carried no token"))
    }

    fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = self.send(req)?;
        resp.json().context("api: decode response")
    }

    fn send(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req.header(USER_AGENT, &self.user_agent).send()?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().unwrap_or_default();
        if let Ok(payload) = serde_json::from_str::<Value>(&body) {
            if let Some(error) = payload.get("error").and_then(Value::as_str) {
                return Err(ApiError::Server(error.to_string()).into());
            }
        }
        Err(ApiError::Status { status, body }.into())
    }
}

impl SubscriptionService for ApiClient {
    fn subscriptions(&self, token: &str) -> Result<Vec<Subscription>> {
        ApiClient::subscriptions(self, token)
    }

    fn subscribe(&self, token: &str, channel_id: &str) -> Result<()> {
        ApiClient::subscribe(self, token, channel_id)
    }
}

fn check_error(body: &Value) -> Result<()> {
    match body.get("error").and_then(Value::as_str) {
        Some(error) => Err(ApiError::Server(error.to_string()).into()),
        None => Ok(()),
    }
}

/// Parses an instance url so relative joins stay below its path.
fn endpoint_root(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("api: invalid url {raw:?}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Lazily built [`ApiClient`] for the current endpoints. Reset after every
/// endpoint change so the next access sees the new urls.
pub struct ClientCache {
    config: ClientConfig,
    cell: OnceCell<Arc<ApiClient>>,
}

impl ClientCache {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    pub fn get(&self, state: &SessionState) -> Result<Arc<ApiClient>> {
        self.cell
            .get_or_try_init(|| {
                log::debug!(
                    "api: building client for {} (auth {})",
                    state.default_url,
                    state.auth_url
                );
                ApiClient::new(&state.auth_url, &self.config).map(Arc::new)
            })
            .cloned()
    }

    pub fn reset(&mut self) {
        self.cell.take();
    }
}
