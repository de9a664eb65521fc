// ai
//! 🔌 Connection — one host, one HTTP client, one opinion about whether it's alive.
//!
//! 🎬 *[a lone URL stands in the config. it has a port. it has dreams.]*
//!
//! 🧠 Knowledge graph:
//! - Built once per configured host from `ClientConfig`. Auth, headers and query params
//!   are resolved here, once, not per request.
//! - `send_bulk`: POST `<base>/_bulk`. `Ok(BulkReply)` for ANY status the server answered
//!   with (200, 400, 503... the classifier decides what they mean). `Err` only when the
//!   request didn't complete: refused, reset, timed out, body cut off mid-read.
//! - `probe`: GET `<base>/`, 5s, reads `version.number`. Run at connect time.
//! - `health`: the dead flag + dead counter + resurrection timer. Owned by the
//!   connection, driven by the pool (`pool.rs`).
//!
//! 🔒 Auth: api_key beats basic auth. This is not a democracy.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::client::ClientConfig;
use crate::payload::BulkPayload;

/// ⏱️ The probe gets a short leash no matter what `timeout_secs` says.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// 📬 Whatever the server answered. Status and raw bytes, no judgement yet.
#[derive(Debug, Clone)]
pub struct BulkReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl BulkReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
enum Auth {
    Anonymous,
    Basic {
        username: String,
        password: Option<String>,
    },
    ApiKey(String),
}

/// 🩺 Liveness bookkeeping. The pool is the only thing that writes it.
#[derive(Debug, Default)]
pub(crate) struct Health {
    pub(crate) dead: bool,
    pub(crate) dead_count: u32,
    pub(crate) last_backoff: Option<Duration>,
    pub(crate) resurrection: Option<JoinHandle<()>>,
}

/// 🔌 One endpoint of the cluster.
#[derive(Debug)]
pub struct Connection {
    base_url: Url,
    http: reqwest::Client,
    auth: Auth,
    headers: HeaderMap,
    params: Vec<(String, String)>,
    health: Mutex<Health>,
    server_version: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct RootInfo {
    version: VersionInfo,
}

#[derive(Deserialize)]
struct VersionInfo {
    number: String,
}

impl Connection {
    /// 🚀 Resolve a host string against the config into a ready-to-use connection.
    ///
    /// `host` may be `"es1:9200"` (takes `protocol` from config) or a full
    /// `"https://es1:9200"` (brings its own scheme).
    pub fn new(host: &str, config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing cert or a cursed system OpenSSL.")?;
        Ok(Self {
            base_url: base_url(host, &config.protocol, config.path.as_deref())?,
            http,
            auth: resolve_auth(config),
            headers: header_map(&config.headers)?,
            params: config
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            health: Mutex::new(Health::default()),
            server_version: Mutex::new(None),
        })
    }

    /// 🔧 Swap the HTTP client. Tests and embedders with opinions about TLS use this.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_dead(&self) -> bool {
        self.health().dead
    }

    /// 🏷️ What `probe` learned, if it has run and succeeded.
    pub fn server_version(&self) -> Option<String> {
        self.server_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn health(&self) -> MutexGuard<'_, Health> {
        // a panicked holder can't leave a bool half-written
        self.health
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 📡 POST a bulk payload. `Err` means the request never got an answer.
    pub async fn send_bulk(&self, payload: &BulkPayload) -> Result<BulkReply> {
        debug!(
            "📡 POST {}: {} event(s), {} bytes ({} before encoding)",
            self.endpoint("_bulk"),
            payload.event_count(),
            payload.body().len(),
            payload.raw_len()
        );
        let mut request = self
            .builder(Method::POST, "_bulk")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload.body().to_vec());
        if let Some(encoding) = payload.content_encoding() {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        self.execute(request).await
    }

    /// 🛠️ Arbitrary request against this host. Same auth, headers and params as bulk.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<BulkReply> {
        let mut request = self.builder(method, path);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }
        self.execute(request).await
    }

    /// 🩺 GET the root and learn the server version. "Hello? Is this thing on?"
    pub async fn probe(&self) -> Result<String> {
        let request = self.builder(Method::GET, "").timeout(PROBE_TIMEOUT);
        let reply = self.execute(request).await?;
        if !reply.is_success() {
            anyhow::bail!(
                "💀 {} answered the probe with {}: {}",
                self.base_url,
                reply.status,
                String::from_utf8_lossy(&reply.body)
            );
        }
        let info: RootInfo = serde_json::from_slice(&reply.body).with_context(|| {
            format!(
                "💀 {} answered the probe, but not with anything that has a version.number in it",
                self.base_url
            )
        })?;
        debug!("✅ {} is up, version {}", self.base_url, info.version.number);
        *self
            .server_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(info.version.number.clone());
        Ok(info.version.number)
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        url
    }

    fn builder(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .request(method, self.endpoint(path))
            .header(ACCEPT, "application/json")
            .headers(self.headers.clone());
        match &self.auth {
            Auth::Anonymous => request,
            Auth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            Auth::ApiKey(key) => request.header("Authorization", format!("ApiKey {key}")),
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<BulkReply> {
        let response = request.send().await.with_context(|| {
            format!(
                "💀 The request to {} never got an answer. Refused, reset, or timed out. The network is not vibing with it.",
                self.base_url
            )
        })?;
        let status = response.status().as_u16();
        let body = response.bytes().await.with_context(|| {
            format!(
                "💀 {} started answering ({status}) and then the body fell off mid-read",
                self.base_url
            )
        })?;
        trace!("📬 {} answered {status} with {} bytes", self.base_url, body.len());
        Ok(BulkReply {
            status,
            body: body.to_vec(),
        })
    }
}

fn base_url(host: &str, protocol: &str, path: Option<&str>) -> Result<Url> {
    let host = host.trim();
    if host.is_empty() {
        anyhow::bail!("💀 An empty host. We can't POST to the void. We tried. It didn't answer.");
    }
    let full = if host.contains("://") {
        host.to_string()
    } else {
        format!("{protocol}://{host}")
    };
    let mut url =
        Url::parse(&full).with_context(|| format!("💀 '{full}' does not parse as a URL"))?;
    if let Some(prefix) = path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        let joined = format!("{}/{prefix}", url.path().trim_end_matches('/'));
        url.set_path(&joined);
    }
    Ok(url)
}

fn resolve_auth(config: &ClientConfig) -> Auth {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
        Auth::ApiKey(key.clone())
    } else if let Some(username) = config.username.as_ref().filter(|u| !u.is_empty()) {
        Auth::Basic {
            username: username.clone(),
            password: config.password.clone(),
        }
    } else {
        Auth::Anonymous
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("💀 '{name}' is not a legal header name"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("💀 the value for header '{name}' is not a legal header value"))?;
        map.insert(name, value);
    }
    Ok(map)
}
