//! Normalized view over a completed HTTP exchange.

use std::borrow::Cow;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};

/// Body bytes read per response are capped so memory stays predictable even
/// when the server streams an enormous body.
pub const MAX_RESPONSE_BODY: usize = 512 * 1024;

/// A single response as the rest of the scanner sees it. Immutable after
/// construction; `path` is the literal path submitted, `url` the final URL
/// after any followed redirect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub url: String,
    pub path: String,
    pub status: u16,
    pub body: Vec<u8>,
    pub length: u64,
    pub content_type: String,
    pub redirect: String,
    pub history: Vec<String>,
}

impl Response {
    /// Drains a reqwest response into the normalized form, reading at most
    /// [`MAX_RESPONSE_BODY`] bytes of body.
    pub(crate) async fn read(
        path: &str,
        mut resp: reqwest::Response,
        history: Vec<String>,
    ) -> Result<Self, reqwest::Error> {
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
            .unwrap_or_default();
        let redirect = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let header_length = resp.content_length();

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            let remaining = MAX_RESPONSE_BODY - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let length = header_length.unwrap_or(body.len() as u64);

        Ok(Self {
            url,
            path: path.to_string(),
            status,
            body,
            length,
            content_type,
            redirect,
            history,
        })
    }

    /// Lossy UTF-8 view of the body, for text filters.
    pub fn content(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
