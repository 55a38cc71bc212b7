//! Twitter v1.1 over blocking HTTP
//!
//! REST calls go to `https://api.twitter.com/1.1/<method>.json` and are
//! decoded in one piece. `statuses/sample` and `statuses/filter` go to the
//! streaming host and are decoded line by line as the body arrives; blank
//! keep-alive lines are dropped.
//!
//! Every request carries an OAuth 1.0a `Authorization` header signed with
//! HMAC-SHA1 over the method, base URL and all request parameters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::Value;
use sha1::Sha1;
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;
use tracing::{debug, info};

use super::{Params, Response, Source, SourceError};
use crate::config::Credentials;

pub const DEFAULT_API_HOST: &str = "api.twitter.com";
pub const DEFAULT_STREAM_HOST: &str = "stream.twitter.com";
const API_VERSION: &str = "1.1";
const USER_AGENT: &str = concat!("tweetsql/", env!("CARGO_PKG_VERSION"));
const REST_TIMEOUT: Duration = Duration::from_secs(60);

/// Methods served by the streaming host.
pub const STREAM_METHODS: &[&str] = &["statuses/sample", "statuses/filter"];

type HmacSha1 = Hmac<Sha1>;

fn encode(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

/// OAuth 1.0a request signer.
#[derive(Clone)]
pub struct OAuthSigner {
    credentials: Credentials,
}

impl OAuthSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// `base64(HMAC-SHA1(key, base_string))` for the given request.
    pub fn signature(
        &self,
        http_method: &str,
        url: &str,
        params: &Params,
        oauth: &Params,
    ) -> Result<String, SourceError> {
        let mut pairs: Vec<(String, String)> = params
            .iter()
            .chain(oauth.iter())
            .map(|(k, v)| (encode(k), encode(v)))
            .collect();
        pairs.sort();
        let param_string = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let base = format!(
            "{}&{}&{}",
            http_method.to_ascii_uppercase(),
            encode(url),
            encode(&param_string)
        );
        let key = format!(
            "{}&{}",
            encode(&self.credentials.consumer_secret),
            encode(&self.credentials.access_secret)
        );

        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| SourceError::Other(format!("Cannot sign request: {}", e)))?;
        mac.update(base.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Full `Authorization` header value with an explicit nonce and timestamp.
    pub fn header_with(
        &self,
        http_method: &str,
        url: &str,
        params: &Params,
        nonce: &str,
        timestamp: i64,
    ) -> Result<String, SourceError> {
        let mut oauth = Params::new();
        oauth.insert("oauth_consumer_key".into(), self.credentials.consumer_key.clone());
        oauth.insert("oauth_nonce".into(), nonce.to_string());
        oauth.insert("oauth_signature_method".into(), "HMAC-SHA1".into());
        oauth.insert("oauth_timestamp".into(), timestamp.to_string());
        oauth.insert("oauth_token".into(), self.credentials.access_token.clone());
        oauth.insert("oauth_version".into(), "1.0".into());

        let signature = self.signature(http_method, url, params, &oauth)?;
        oauth.insert("oauth_signature".into(), signature);

        let fields = oauth
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", fields))
    }

    pub fn header(&self, http_method: &str, url: &str, params: &Params) -> Result<String, SourceError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.header_with(http_method, url, params, &nonce, chrono::Utc::now().timestamp())
    }
}

fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        format!("{}/{}", host, API_VERSION)
    } else {
        format!("https://{}/{}", host, API_VERSION)
    }
}

fn send_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::TimedOut(err.to_string())
    } else {
        SourceError::Other(err.to_string())
    }
}

/// Split a decoded REST body into response items.
///
/// `{"errors": [{code, message}]}` becomes a single status envelope so the
/// classifier sees it at index 0.
pub fn rest_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if let Some(Value::Array(statuses)) = map.remove("statuses") {
                return statuses;
            }
            if let Some(Value::Array(errors)) = map.get("errors") {
                if let Some(first) = errors.first() {
                    return vec![first.clone()];
                }
            }
            vec![Value::Object(map)]
        },
        other => vec![other],
    }
}

/// Newline-delimited JSON read from a live body.
struct LineItems<R> {
    lines: std::io::Lines<BufReader<R>>,
    done: bool,
}

impl<R: Read> Iterator for LineItems<R> {
    type Item = Result<Value, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some(
                        serde_json::from_str(&line).map_err(|e| SourceError::Decode(e.to_string())),
                    )
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(if e.kind() == std::io::ErrorKind::TimedOut {
                        SourceError::TimedOut(e.to_string())
                    } else {
                        SourceError::Chunked(e.to_string())
                    }));
                },
            }
        }
    }
}

pub struct HttpSource {
    signer: OAuthSigner,
    rest_base: String,
    stream_base: String,
    rest: Client,
    stream: Client,
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("rest_base", &self.rest_base)
            .field("stream_base", &self.stream_base)
            .finish()
    }
}

impl HttpSource {
    pub fn new(credentials: Credentials) -> Result<Self, SourceError> {
        let rest = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Other(e.to_string()))?;
        // Streams stay open indefinitely.
        let stream = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(None)
            .build()
            .map_err(|e| SourceError::Other(e.to_string()))?;

        Ok(Self {
            signer: OAuthSigner::new(credentials),
            rest_base: base_url(DEFAULT_API_HOST),
            stream_base: base_url(DEFAULT_STREAM_HOST),
            rest,
            stream,
        })
    }

    /// Point REST calls at another host (with or without scheme).
    pub fn with_api_host(mut self, host: &str) -> Self {
        self.rest_base = base_url(host);
        self
    }

    pub fn with_stream_host(mut self, host: &str) -> Self {
        self.stream_base = base_url(host);
        self
    }

    fn build(&self, method: &str, params: &Params) -> Result<RequestBuilder, SourceError> {
        let streaming = STREAM_METHODS.contains(&method);
        let base = if streaming { &self.stream_base } else { &self.rest_base };
        let url = format!("{}/{}.json", base, method);
        let client = if streaming { &self.stream } else { &self.rest };

        let builder = if method == "statuses/filter" {
            let auth = self.signer.header("POST", &url, params)?;
            client.post(&url).form(params).header(reqwest::header::AUTHORIZATION, auth)
        } else {
            let auth = self.signer.header("GET", &url, params)?;
            client.get(&url).query(params).header(reqwest::header::AUTHORIZATION, auth)
        };
        Ok(builder)
    }
}

impl Source for HttpSource {
    fn request(&mut self, method: &str, params: &Params) -> Result<Response, SourceError> {
        debug!(method, ?params, "API request");
        let response = self.build(method, params)?.send().map_err(send_error)?;
        let status = response.status();

        // 420 is the streaming API's "Enhance Your Calm"
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420 {
            return Err(SourceError::RateLimited(format!("HTTP {}", status.as_u16())));
        }

        if STREAM_METHODS.contains(&method) && status.is_success() {
            info!(method, "Stream connected");
            return Ok(Box::new(LineItems {
                lines: BufReader::new(response).lines(),
                done: false,
            }));
        }

        let text = response.text().map_err(send_error)?;
        match serde_json::from_str::<Value>(&text) {
            // Error bodies still carry a status envelope worth classifying
            Ok(body) if status.is_success() || body.get("errors").is_some() => {
                Ok(Box::new(rest_items(body).into_iter().map(Ok::<Value, SourceError>)))
            },
            Err(e) if status.is_success() => Err(SourceError::Decode(e.to_string())),
            _ => Err(SourceError::Http {
                status: status.as_u16(),
                message: text.chars().take(300).collect(),
            }),
        }
    }
}
