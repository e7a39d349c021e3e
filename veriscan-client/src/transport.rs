//! HTTP transport for REST calls and server-sent event streams.

use crate::config::ClientConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderName, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use veriscan_core::{ApiError, Method, RequestBody, RequestDescriptor};

/// Raw chunks of an open event stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// A received 2xx response. Non-success statuses are returned as
/// [`ApiError::Status`] so the retry predicate sees them as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        if self.body.is_empty() {
            return serde_json::from_slice(b"null").map_err(|err| ApiError::InvalidResponse {
                reason: err.to_string(),
            });
        }
        serde_json::from_slice(&self.body).map_err(|err| ApiError::InvalidResponse {
            reason: err.to_string(),
        })
    }
}

/// The actual transmission function.
///
/// One call is one attempt; retries, caching, and credentials are layered on top.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<ApiResponse, ApiError>;

    async fn open_stream(&self, request: &RequestDescriptor) -> Result<ByteStream, ApiError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &RequestDescriptor) -> Result<ApiResponse, ApiError> {
        (**self).send(request).await
    }

    async fn open_stream(&self, request: &RequestDescriptor) -> Result<ByteStream, ApiError> {
        (**self).open_stream(request).await
    }
}

/// `reqwest`-backed transport.
///
/// Streams use a second client without a total timeout; a long analysis must
/// not be cut off by the upload timeout. Stalls are bounded by the session
/// idle timeout instead.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.stream.connect_timeout())
            .build()
            .map_err(|e| ApiError::InvalidRequest {
                reason: e.to_string(),
            })?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(config.stream.connect_timeout())
            .build()
            .map_err(|e| ApiError::InvalidRequest {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            stream_client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn build(
        &self,
        client: &reqwest::Client,
        request: &RequestDescriptor,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        let url = self.url(&request.url);
        let mut builder = client.request(to_reqwest_method(request.method), url);

        for (name, value) in &request.headers {
            let name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::InvalidRequest {
                    reason: format!("header name {name:?}: {e}"),
                })?;
            let value = HeaderValue::from_str(value).map_err(|e| ApiError::InvalidRequest {
                reason: format!("header value for {name}: {e}"),
            })?;
            builder = builder.header(name, value);
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }

        match &request.body {
            None => {}
            Some(RequestBody::Json(value)) => {
                builder = builder.json(value);
            }
            Some(RequestBody::Multipart { field, file }) => {
                // `Bytes` clones share the buffer, so every attempt sends the
                // same allocation.
                let body = reqwest::Body::from(file.bytes.clone());
                let part = Part::stream_with_length(body, file.size())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.content_type)
                    .map_err(|e| ApiError::InvalidRequest {
                        reason: format!("content type {}: {e}", file.content_type),
                    })?;
                builder = builder.multipart(Form::new().part(field.clone(), part));
            }
        }
        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<ApiResponse, ApiError> {
        let builder = self.build(&self.client, request)?;
        debug!(
            method = %request.method,
            url = %request.url,
            attempt = request.retry_count + 1,
            "Sending request"
        );

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(network_error)?;

        if status.is_success() {
            Ok(ApiResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }

    async fn open_stream(&self, request: &RequestDescriptor) -> Result<ByteStream, ApiError> {
        let builder = self
            .build(&self.stream_client, request)?
            .header(ACCEPT, "text/event-stream");
        debug!(url = %request.url, "Opening event stream");

        let response = builder.send().await.map_err(|e| ApiError::stream(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| ApiError::stream(e.to_string()))
            .boxed())
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn network_error(err: reqwest::Error) -> ApiError {
    ApiError::network(err.to_string())
}
