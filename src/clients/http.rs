//! Shared HTTP plumbing for the registry clients.
//!
//! Every client wraps one pooled `reqwest::Client` carrying the product
//! user agent, a JSON default content type, and its auth headers. Paths
//! are joined onto the client's base URL unless they are already
//! absolute. There is no implicit retry here; this layer is the retry
//! boundary and surfaces the first failure.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};

use crate::errors::{Error, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Build a client for `base_url` with additional default headers.
    ///
    /// Header names are case-insensitive; later additions override
    /// earlier ones of the same name.
    pub fn new(base_url: impl Into<String>, headers: Vec<(&'static str, String)>) -> Result<Self> {
        let mut header_map = HeaderMap::new();
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in headers {
            let name = HeaderName::from_static(name);
            let value = HeaderValue::from_str(&value)
                .map_err(|err| Error::config(format!("invalid header value for {name}: {err}")))?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(format!("imbi-automations/{}", crate::VERSION))
            .default_headers(header_map)
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join `path` onto the base URL. Absolute URLs pass through
    /// unchanged.
    pub fn prepend_base_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") || path.starts_with("//") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.prepend_base_url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }
}

/// Raise non-2xx responses as `Error::Http` with the body attached.
pub async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        message: truncate(&message, 512),
    })
}

pub fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
