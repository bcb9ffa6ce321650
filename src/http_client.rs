//! Async HTTP seam shared by the prober, the dataset fetcher and the
//! air-quality resolver.
//!
//! Non-2xx statuses are not transport errors here: every component classifies
//! status codes itself, so `HttpResponse` always carries the status through.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub max_bytes: Option<u64>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout,
            max_bytes: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn max_bytes(mut self, limit: u64) -> Self {
        self.max_bytes = Some(limit);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("No response from {url}: {reason}")]
    NoResponse { url: String, reason: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Response from {url} exceeded {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("Failed to read body from {url}: {reason}")]
    Body { url: String, reason: String },
}

pub trait HttpTransport: Send + Sync {
    /// Issues a HEAD request. The returned body is always empty.
    fn head(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;

    /// Issues a GET request, reading at most `request.max_bytes` of body.
    fn get(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

impl<T: HttpTransport> HttpTransport for &T {
    fn head(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        (**self).head(request)
    }

    fn get(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        (**self).get(request)
    }
}

impl<T: HttpTransport> HttpTransport for Arc<T> {
    fn head(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        (**self).head(request)
    }

    fn get(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        (**self).get(request)
    }
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn build_headers(request: &HttpRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.insert(name, value);
        }
        headers
    }

    fn classify_send_error(url: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else {
            TransportError::NoResponse {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }

    fn content_type(response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase())
    }
}

impl HttpTransport for ReqwestTransport {
    async fn head(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .head(&request.url)
            .headers(Self::build_headers(request))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|error| Self::classify_send_error(&request.url, error))?;

        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_type: Self::content_type(&response),
            body: Vec::new(),
        })
    }

    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut response = self
            .client
            .get(&request.url)
            .headers(Self::build_headers(request))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|error| Self::classify_send_error(&request.url, error))?;

        let status = response.status().as_u16();
        let content_type = Self::content_type(&response);

        if let (Some(limit), Some(length)) = (request.max_bytes, response.content_length()) {
            if length > limit {
                return Err(TransportError::TooLarge {
                    url: request.url.clone(),
                    limit,
                });
            }
        }

        let mut body = Vec::new();
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(error) if error.is_timeout() => {
                    return Err(TransportError::Timeout {
                        url: request.url.clone(),
                    })
                }
                Err(error) => {
                    return Err(TransportError::Body {
                        url: request.url.clone(),
                        reason: error.to_string(),
                    })
                }
            };
            body.extend_from_slice(&chunk);
            if let Some(limit) = request.max_bytes {
                if body.len() as u64 > limit {
                    return Err(TransportError::TooLarge {
                        url: request.url.clone(),
                        limit,
                    });
                }
            }
        }

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
