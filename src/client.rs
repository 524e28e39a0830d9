//! The shared HTTP executor: connection pooling, retries, rate capping,
//! proxy rotation, authentication and literal-path URL quoting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use rand::Rng;
use rand::prelude::IndexedRandom;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT, WWW_AUTHENTICATE};
use reqwest::{Client, Identity, Method, StatusCode};
use url::Url;

use crate::auth::{self, Auth};
use crate::errors::{RequestError, ScanError};
use crate::options::Options;
use crate::ratelimit::RateLimiter;
use crate::response::Response;
use crate::utils::safequote;

const MAX_REDIRECTS: usize = 5;
const PROXY_SCHEMES: [&str; 6] = [
    "http://",
    "https://",
    "socks5://",
    "socks5h://",
    "socks4://",
    "socks4a://",
];

/// Errors whose message matches this pattern are reported as body-read
/// failures rather than generic request problems.
static READ_ERROR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(chunk|content-length|incomplete|connection broken)").unwrap());

/// Rate-limited, retrying request executor shared by all workers. Proxies
/// get one pooled client each, built lazily and dropped from the rotation
/// when they fail.
pub struct HttpClient {
    method: Method,
    data: Option<String>,
    headers: Mutex<HeaderMap>,
    auth: Mutex<Option<Auth>>,
    proxies: Mutex<Vec<String>>,
    proxy_cred: Mutex<Option<String>>,
    random_agents: Option<Vec<String>>,
    base_url: Mutex<Option<String>>,
    dns_pin: Mutex<Option<(String, SocketAddr)>>,
    clients: Mutex<HashMap<String, Client>>,
    limiter: RateLimiter,
    identity: Option<Identity>,
    follow_redirects: bool,
    max_retries: usize,
    timeout: Duration,
    max_pool: usize,
}

impl HttpClient {
    pub fn new(options: &Options, random_agents: Option<Vec<String>>) -> Result<Self, ScanError> {
        let method = Method::from_bytes(options.http_method.to_uppercase().as_bytes())
            .map_err(|_| ScanError::Config(format!("Invalid HTTP method: {}", options.http_method)))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("dirsift/0.1"));
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );
        for (key, value) in &options.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| ScanError::Config(format!("Invalid header name: {key}")))?;
            let value = HeaderValue::from_str(value.trim_start())
                .map_err(|_| ScanError::Config(format!("Invalid header value: {value}")))?;
            headers.insert(name, value);
        }

        let identity = match (&options.cert_file, &options.key_file) {
            (Some(cert), Some(key)) => {
                let cert_pem = std::fs::read(cert).map_err(|e| {
                    ScanError::Config(format!("Couldn't read {}: {e}", cert.display()))
                })?;
                let key_pem = std::fs::read(key).map_err(|e| {
                    ScanError::Config(format!("Couldn't read {}: {e}", key.display()))
                })?;
                Some(Identity::from_pkcs8_pem(&cert_pem, &key_pem).map_err(|e| {
                    ScanError::Config(format!("Invalid client certificate: {e}"))
                })?)
            }
            _ => None,
        };

        let auth = match (&options.auth_type, &options.auth) {
            (Some(auth_type), Some(credential)) => Some(Auth::new(auth_type, credential)?),
            _ => None,
        };

        Ok(Self {
            method,
            data: options.data.clone(),
            headers: Mutex::new(headers),
            auth: Mutex::new(auth),
            proxies: Mutex::new(options.proxies.clone()),
            proxy_cred: Mutex::new(options.proxy_auth.clone()),
            random_agents,
            base_url: Mutex::new(None),
            dns_pin: Mutex::new(None),
            clients: Mutex::new(HashMap::new()),
            limiter: RateLimiter::new(options.max_rate),
            identity,
            follow_redirects: options.follow_redirects,
            max_retries: options.max_retries,
            timeout: Duration::from_secs_f64(options.timeout),
            max_pool: options.threads,
        })
    }

    pub fn set_url(&self, url: &str) {
        *self.base_url.lock().expect("poisoned lock") = Some(url.to_string());
    }

    pub fn set_header(&self, key: &str, value: &str) -> Result<(), ScanError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ScanError::Config(format!("Invalid header name: {key}")))?;
        let value = HeaderValue::from_str(value.trim_start())
            .map_err(|_| ScanError::Config(format!("Invalid header value: {value}")))?;
        self.headers.lock().expect("poisoned lock").insert(name, value);
        Ok(())
    }

    pub fn set_auth(&self, auth: Auth) {
        *self.auth.lock().expect("poisoned lock") = Some(auth);
    }

    pub fn set_proxy_auth(&self, credential: &str) {
        *self.proxy_cred.lock().expect("poisoned lock") = Some(credential.to_string());
    }

    /// Pins DNS for the target host; built clients are discarded so the pin
    /// takes effect on the next request.
    pub fn pin_dns(&self, host: &str, addr: SocketAddr) {
        *self.dns_pin.lock().expect("poisoned lock") = Some((host.to_string(), addr));
        self.clients.lock().expect("poisoned lock").clear();
    }

    /// Requests issued within the last second, for the progress line.
    pub fn rate(&self) -> usize {
        self.limiter.rate()
    }

    /// Issues one logical request for `path` (appended to the base URL and
    /// quoted without touching what the wordlist wrote), retrying failed
    /// attempts up to the retry budget.
    pub async fn request(
        &self,
        path: &str,
        forced_proxy: Option<&str>,
    ) -> Result<Response, RequestError> {
        let base = self.base_url.lock().expect("poisoned lock").clone();
        let target = match &base {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        };
        let url = safequote(&target);
        let mut last_err = RequestError::Other(url.clone());

        for _ in 0..=self.max_retries {
            self.limiter.throttle().await;

            let proxy = match forced_proxy {
                Some(p) => Some(p.to_string()),
                None => {
                    let proxies = self.proxies.lock().expect("poisoned lock");
                    proxies.choose(&mut rand::rng()).cloned()
                }
            };

            let client = match self.client_for(proxy.as_deref()) {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!("{err}");
                    last_err = err;
                    continue;
                }
            };

            match self.execute(&client, &url, path, proxy.as_deref()).await {
                Ok(response) => {
                    let mut line = format!(
                        "\"{} {}\" {} - {}B",
                        self.method, response.url, response.status, response.length
                    );
                    if !response.redirect.is_empty() {
                        line.push_str(&format!(" - LOCATION: {}", response.redirect));
                    }
                    tracing::info!("{line}");
                    return Ok(response);
                }
                Err(err) => {
                    tracing::error!("{err}");
                    if let RequestError::Proxy(p) = &err {
                        self.drop_proxy(p);
                    }
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    /// One attempt: sends the request, follows redirects when configured
    /// (recording history), and reads the body into a [`Response`].
    async fn execute(
        &self,
        client: &Client,
        url: &str,
        path: &str,
        proxy: Option<&str>,
    ) -> Result<Response, RequestError> {
        let mut history = Vec::new();
        let mut current = url.to_string();

        loop {
            let resp = self.send_with_auth(client, &current, proxy).await?;

            if self.follow_redirects && resp.status().is_redirection() {
                if let Some(location) = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    history.push(current.clone());
                    if history.len() > MAX_REDIRECTS {
                        return Err(RequestError::TooManyRedirects(url.to_string()));
                    }
                    current = Url::parse(&current)
                        .and_then(|u| u.join(location))
                        .map_err(|_| RequestError::InvalidUrl(url.to_string()))?
                        .to_string();
                    continue;
                }
            }

            return Response::read(path, resp, history)
                .await
                .map_err(|e| self.classify(&e, url, proxy));
        }
    }

    /// Sends once, answering digest/NTLM challenges when they come back.
    async fn send_with_auth(
        &self,
        client: &Client,
        url: &str,
        proxy: Option<&str>,
    ) -> Result<reqwest::Response, RequestError> {
        let resp = self
            .build_request(client, url, None)
            .send()
            .await
            .map_err(|e| self.classify(&e, url, proxy))?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let auth = self.auth.lock().expect("poisoned lock").clone();
        match auth {
            Some(Auth::Digest { username, password }) => {
                let Some(challenge) = header_value(&resp, "Digest") else {
                    return Ok(resp);
                };
                let uri = request_uri(url);
                let cnonce = { format!("{:016x}", rand::rng().random::<u64>()) };
                let Some(authorization) = auth::digest_authorization(
                    &challenge,
                    self.method.as_str(),
                    &uri,
                    &username,
                    &password,
                    &cnonce,
                    1,
                ) else {
                    return Ok(resp);
                };
                self.build_request(client, url, Some(authorization))
                    .send()
                    .await
                    .map_err(|e| self.classify(&e, url, proxy))
            }
            Some(Auth::Ntlm {
                domain,
                username,
                password,
            }) => {
                if header_value(&resp, "NTLM").is_none() {
                    return Ok(resp);
                }
                let negotiated = self
                    .build_request(client, url, Some(auth::ntlm_negotiate_header()))
                    .send()
                    .await
                    .map_err(|e| self.classify(&e, url, proxy))?;
                let Some(challenge) = header_value(&negotiated, "NTLM ")
                    .and_then(|h| auth::ntlm_challenge_from_header(&h))
                else {
                    return Ok(negotiated);
                };
                let client_nonce: [u8; 8] = { rand::rng().random() };
                let authorization = auth::ntlm_authenticate_header(
                    &challenge,
                    &domain,
                    &username,
                    &password,
                    "WORKSTATION",
                    &client_nonce,
                    filetime_now(),
                );
                self.build_request(client, url, Some(authorization))
                    .send()
                    .await
                    .map_err(|e| self.classify(&e, url, proxy))
            }
            _ => Ok(resp),
        }
    }

    fn build_request(
        &self,
        client: &Client,
        url: &str,
        authorization: Option<String>,
    ) -> reqwest::RequestBuilder {
        let mut req = client.request(self.method.clone(), url);
        req = req.headers(self.headers.lock().expect("poisoned lock").clone());

        if let Some(agents) = &self.random_agents {
            if let Some(agent) = agents.choose(&mut rand::rng()) {
                req = req.header(USER_AGENT, agent.as_str());
            }
        }

        match &*self.auth.lock().expect("poisoned lock") {
            Some(Auth::Basic { username, password }) => {
                req = req.basic_auth(username, Some(password));
            }
            Some(Auth::Bearer { token }) => {
                req = req.bearer_auth(token);
            }
            _ => {}
        }

        if let Some(authorization) = authorization {
            req = req.header(AUTHORIZATION, authorization);
        }
        if let Some(data) = &self.data {
            req = req.body(data.clone());
        }
        req
    }

    /// Returns the pooled client for a proxy (or the direct client), building
    /// it on first use.
    fn client_for(&self, proxy: Option<&str>) -> Result<Client, RequestError> {
        let key = proxy.unwrap_or("").to_string();
        if let Some(client) = self.clients.lock().expect("poisoned lock").get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(self.max_pool.min(25))
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true);

        if let Some((host, addr)) = self.dns_pin.lock().expect("poisoned lock").clone() {
            builder = builder.resolve(&host, addr);
        }
        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }
        if let Some(proxy) = proxy {
            let normalized = self.normalize_proxy(proxy);
            let proxy_obj = reqwest::Proxy::all(&normalized)
                .map_err(|_| RequestError::InvalidProxy(normalized.clone()))?;
            builder = builder.proxy(proxy_obj);
        }

        let client = builder
            .build()
            .map_err(|_| match proxy {
                Some(p) => RequestError::InvalidProxy(p.to_string()),
                None => RequestError::Other(String::new()),
            })?;
        self.clients
            .lock()
            .expect("poisoned lock")
            .insert(key, client.clone());
        Ok(client)
    }

    /// Schemeless proxies default to http; separately configured proxy
    /// credentials are spliced into the authority.
    fn normalize_proxy(&self, proxy: &str) -> String {
        let mut proxy = if PROXY_SCHEMES.iter().any(|s| proxy.starts_with(s)) {
            proxy.to_string()
        } else {
            format!("http://{proxy}")
        };
        if let Some(cred) = &*self.proxy_cred.lock().expect("poisoned lock") {
            if !proxy.contains('@') {
                proxy = proxy.replacen("://", &format!("://{cred}@"), 1);
            }
        }
        proxy
    }

    fn drop_proxy(&self, proxy: &str) {
        let mut proxies = self.proxies.lock().expect("poisoned lock");
        if proxies.len() > 1 {
            proxies.retain(|p| p != proxy);
        }
    }

    fn classify(&self, err: &reqwest::Error, url: &str, proxy: Option<&str>) -> RequestError {
        let mut chain = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        let chain = chain.to_lowercase();

        if err.is_builder() {
            RequestError::InvalidUrl(url.to_string())
        } else if chain.contains("dns") || chain.contains("resolve") {
            RequestError::Dns
        } else if chain.contains("certificate")
            || chain.contains("ssl")
            || chain.contains("tls")
            || chain.contains("handshake")
        {
            RequestError::Ssl
        } else if err.is_timeout() || chain.contains("timed out") {
            RequestError::Timeout(url.to_string())
        } else if err.is_connect() {
            match proxy {
                Some(proxy) => RequestError::Proxy(proxy.to_string()),
                None => RequestError::Connect(host_port(url)),
            }
        } else if err.is_body() || err.is_decode() || READ_ERROR_REGEX.is_match(&chain) {
            RequestError::BodyRead(url.to_string())
        } else {
            RequestError::Other(url.to_string())
        }
    }
}

fn header_value(resp: &reqwest::Response, scheme_prefix: &str) -> Option<String> {
    resp.headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(scheme_prefix))
        .map(str::to_string)
}

fn request_uri(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

fn host_port(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            match parsed.port_or_known_default() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
        Err(_) => url.to_string(),
    }
}

/// Windows FILETIME: 100 ns intervals since 1601-01-01, used in NTLMv2 blobs.
fn filetime_now() -> u64 {
    const EPOCH_DELTA: u64 = 11_644_473_600;
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_secs() + EPOCH_DELTA) * 10_000_000 + u64::from(elapsed.subsec_nanos()) / 100,
        Err(_) => EPOCH_DELTA * 10_000_000,
    }
}
