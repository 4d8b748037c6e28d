// src/utils/http.rs

//! HTTP transport and content decoding.
//!
//! The portal is reached through the [`Transport`] trait so the session and
//! fetch logic can run against a scripted transport in tests. Compressed
//! bodies are decoded here instead of inside the client, which lets a broken
//! body fall back to plain text rather than failing the request.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::Config;

/// Status, final location, encoding and raw bytes of one GET.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    pub content_encoding: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Body as text, decompressed according to `Content-Encoding`.
    pub fn text(&self) -> String {
        decode_body(self.content_encoding.as_deref(), &self.body)
    }
}

/// Authenticated GET capability.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse>;
}

/// Decompress a body. Unknown encodings pass through untouched.
pub fn decompress(encoding: Option<&str>, body: &[u8]) -> Result<Vec<u8>> {
    let encoding = encoding.map(|e| e.trim().to_lowercase()).unwrap_or_default();
    let mut out = Vec::new();

    match encoding.as_str() {
        "gzip" | "x-gzip" => {
            flate2::read::GzDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| AppError::decode(format!("gzip: {e}")))?;
        }
        "deflate" => {
            flate2::read::ZlibDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| AppError::decode(format!("deflate: {e}")))?;
        }
        "br" => {
            brotli::Decompressor::new(body, 4096)
                .read_to_end(&mut out)
                .map_err(|e| AppError::decode(format!("br: {e}")))?;
        }
        _ => out.extend_from_slice(body),
    }

    Ok(out)
}

/// Decode a body to text, treating it as already decoded if decompression fails.
pub fn decode_body(encoding: Option<&str>, body: &[u8]) -> String {
    match decompress(encoding, body) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            log::warn!("Error decompressing response: {}. Using raw body.", e);
            String::from_utf8_lossy(body).into_owned()
        }
    }
}

/// reqwest-backed transport carrying the portal cookies.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a client with browser-like headers and the configured cookies.
    pub fn new(config: &Config) -> Result<Self> {
        let base = url::Url::parse(&config.portal.base_url)?;
        let jar = Arc::new(Jar::default());
        for (name, value) in &config.portal.cookies {
            let cookie = format!(
                "{}={}; Domain={}; Path=/",
                name, value, config.portal.cookie_domain
            );
            jar.add_cookie_str(&cookie, &base);
        }
        log::info!("Loaded {} portal cookie(s)", config.portal.cookies.len());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate, br"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

        let client = reqwest::Client::builder()
            .user_agent(&config.http.user_agent)
            .default_headers(headers)
            .cookie_provider(jar)
            .timeout(config.http.timeout())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AppError::transport(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_encoding = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::transport(url, e))?
            .to_vec();

        Ok(RawResponse {
            status,
            final_url,
            content_encoding,
            body,
        })
    }
}
