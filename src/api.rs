//! Signed HTTP client for the platform router.
//!
//! Every call goes to the single router endpoint; the API name travels as the
//! `method` parameter next to `app_key`. Requests are authenticated either by
//! a `sign`/`sign_time` pair or, on `https` servers without
//! [`ApiClientOptions::always_use_sign`], by sending `client_secret` directly.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::USER_AGENT as USER_AGENT_HEADER;
use reqwest::{Client, Method, Request, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::notify::{Codec, Dialer, NotifyError, NotifyOptions, NotifySession};
use crate::request_id::RequestIdGenerator;
use crate::retry::{retry_async, RetryPolicy};
use crate::sign::{sign, SignError, SIGN_KEY};

/// `User-Agent` sent with every request and websocket upgrade.
pub const USER_AGENT: &str = "Teegon/Rust";
/// API name used for the notify websocket upgrade.
pub const NOTIFY_API: &str = "platform/notify";

/// Request parameters. Non-string values are sent JSON-encoded.
pub type Params = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiClientDefaults;

impl ApiClientDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    /// Whole-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
    /// Retry policy for idempotent calls (GET, PUT, DELETE).
    pub retry_policy: RetryPolicy,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub oauth_token: Option<String>,
    /// Sign requests even when the server is reached over `https`.
    pub always_use_sign: bool,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: ApiClientDefaults::CONNECT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            oauth_token: None,
            always_use_sign: false,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    app_key: String,
    secret: Arc<SecretString>,
    server: Url,
    oauth_token: Option<Arc<SecretString>>,
    always_use_sign: bool,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    request_ids: Arc<RequestIdGenerator>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("app_key", &self.app_key)
            .field("server", &self.server.as_str())
            .field("always_use_sign", &self.always_use_sign)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client for `server` with default options.
    ///
    /// Fails without touching the network when `server` is not an absolute
    /// URL.
    pub fn new(
        server: &str,
        app_key: impl Into<String>,
        secret: SecretString,
    ) -> Result<Self, ApiError> {
        Self::with_options(server, app_key, secret, ApiClientOptions::default())
    }

    pub fn with_options(
        server: &str,
        app_key: impl Into<String>,
        secret: SecretString,
        options: ApiClientOptions,
    ) -> Result<Self, ApiError> {
        let server = parse_server_url(server)?;
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            app_key: app_key.into(),
            secret: Arc::new(secret),
            server,
            oauth_token: options
                .oauth_token
                .map(|token| Arc::new(SecretString::from(token))),
            always_use_sign: options.always_use_sign,
            timeout: options.timeout,
            retry_policy: options.retry_policy,
            request_ids: Arc::new(RequestIdGenerator::new()),
        })
    }

    /// Shares `request_ids` with this client and every session it creates.
    pub fn with_request_ids(mut self, request_ids: Arc<RequestIdGenerator>) -> Self {
        self.request_ids = request_ids;
        self
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    pub fn request_ids(&self) -> &Arc<RequestIdGenerator> {
        &self.request_ids
    }

    /// Returns the next correlation id from the shared generator.
    pub fn next_request_id(&self) -> String {
        self.request_ids.next_id()
    }

    /// Frame codec sharing this client's credentials.
    pub fn codec(&self) -> Codec {
        Codec::with_shared_secret(self.app_key.clone(), Arc::clone(&self.secret))
    }

    pub(crate) fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    pub(crate) fn oauth_token(&self) -> Option<&str> {
        self.oauth_token
            .as_deref()
            .map(|token| token.expose_secret())
    }

    pub async fn get(&self, api: &str, params: Option<&Params>) -> Result<ApiResponse, ApiError> {
        self.call(Method::GET, api, params).await
    }

    pub async fn post(&self, api: &str, params: Option<&Params>) -> Result<ApiResponse, ApiError> {
        self.call(Method::POST, api, params).await
    }

    pub async fn put(&self, api: &str, params: Option<&Params>) -> Result<ApiResponse, ApiError> {
        self.call(Method::PUT, api, params).await
    }

    pub async fn delete(
        &self,
        api: &str,
        params: Option<&Params>,
    ) -> Result<ApiResponse, ApiError> {
        self.call(Method::DELETE, api, params).await
    }

    /// Opens a notify session over a websocket to this client's server.
    pub async fn notify(&self) -> Result<NotifySession, NotifyError> {
        NotifySession::connect(self.clone(), NotifyOptions::default()).await
    }

    /// Opens a notify session through `dialer` with explicit options.
    pub async fn notify_with(
        &self,
        dialer: Arc<dyn Dialer>,
        options: NotifyOptions,
    ) -> Result<NotifySession, NotifyError> {
        NotifySession::connect_with(self.clone(), dialer, options).await
    }

    /// Builds an authenticated request without sending it.
    ///
    /// POST requests carry the parameters as a form body; every other method
    /// carries them in the query string.
    pub fn build_request(
        &self,
        method: Method,
        api: &str,
        params: Option<&Params>,
    ) -> Result<Request, ApiError> {
        let pairs = self.authenticated_pairs(&self.server, api, params)?;
        let mut url = self.server.clone();
        url.set_query(None);

        let mut builder = if method == Method::POST {
            self.http.request(method, url).form(&pairs)
        } else {
            url.query_pairs_mut().extend_pairs(&pairs);
            self.http.request(method, url)
        };

        builder = builder.header(USER_AGENT_HEADER, USER_AGENT);
        if let Some(token) = self.oauth_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        builder.build().map_err(ApiError::Transport)
    }

    /// Returns the parameter pairs for `api`, including credentials.
    ///
    /// `target` decides between signing and sending `client_secret`: only
    /// secure schemes (`https`, `wss`) may skip the signature.
    pub fn authenticated_pairs(
        &self,
        target: &Url,
        api: &str,
        params: Option<&Params>,
    ) -> Result<Vec<(String, String)>, ApiError> {
        let mut pairs: Vec<(String, String)> = params
            .into_iter()
            .flatten()
            .filter(|(key, _)| !is_reserved_param(key))
            .map(|(key, value)| (key.clone(), param_to_string(value)))
            .collect();
        pairs.push(("method".to_string(), api.to_string()));
        pairs.push(("app_key".to_string(), self.app_key.clone()));

        if !self.always_use_sign && is_secure_scheme(target) {
            pairs.push(("client_secret".to_string(), self.secret().to_string()));
        } else {
            pairs.push(("sign_time".to_string(), unix_seconds().to_string()));
            let signature = sign(&pairs, self.secret())?;
            pairs.push((SIGN_KEY.to_string(), signature));
        }

        Ok(pairs)
    }

    async fn call(
        &self,
        method: Method,
        api: &str,
        params: Option<&Params>,
    ) -> Result<ApiResponse, ApiError> {
        let policy = if is_idempotent(&method) {
            self.retry_policy.clone()
        } else {
            RetryPolicy::none()
        };

        retry_async(
            &policy,
            |attempt| {
                let method = method.clone();
                async move { self.send_attempt(method, api, params, attempt).await }
            },
            ApiError::is_retryable,
        )
        .await
    }

    async fn send_attempt(
        &self,
        method: Method,
        api: &str,
        params: Option<&Params>,
        attempt: usize,
    ) -> Result<ApiResponse, ApiError> {
        let request = self.build_request(method, api, params)?;
        debug!(
            event = "api_request",
            api,
            method = %request.method(),
            attempt
        );

        let response = self
            .http
            .execute(request)
            .await
            .map_err(ApiError::Transport)?;
        let status = response.status();
        let raw = response.bytes().await.map_err(ApiError::Transport)?;

        debug!(event = "api_response", api, status = status.as_u16(), bytes = raw.len());
        Ok(ApiResponse {
            status,
            raw: raw.to_vec(),
        })
    }
}

/// Raw HTTP response body with its status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub raw: Vec<u8>,
}

impl ApiResponse {
    /// Decodes the body as JSON into `T`.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.raw).map_err(ApiError::Decode)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to sign request: {0}")]
    Sign(#[from] SignError),

    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(serde_json::Error),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::Configuration(_) | Self::Sign(_) | Self::Decode(_) => false,
        }
    }
}

fn parse_server_url(server: &str) -> Result<Url, ApiError> {
    let url = Url::parse(server.trim())
        .map_err(|err| ApiError::Configuration(format!("invalid server url {server:?}: {err}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ApiError::Configuration(format!(
            "server url {server:?} has no host"
        )));
    }
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ApiError::Configuration(format!(
            "unsupported server url scheme {other:?}"
        ))),
    }
}

fn is_reserved_param(key: &str) -> bool {
    matches!(
        key,
        "method" | "app_key" | "sign" | "sign_time" | "client_secret"
    )
}

fn is_secure_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "wss")
}

fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET || *method == Method::PUT || *method == Method::DELETE
}

fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
