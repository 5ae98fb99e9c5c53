//! HTTP transport for the call pipeline, built on the hyper 1.x client.
//!
//! The request body is buffered while the pipeline writes it and sent as a
//! single `POST` with `Content-Type: text/xml` once the response is asked
//! for.

use crate::call::{RequestStream, ResponseStream, Transport};
use crate::error::{Error, Result};
use crate::settings::WebSettings;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// [`Transport`] that posts requests over HTTP/1.1.
#[derive(Clone)]
pub struct HttpTransport {
    client: HttpClient,
    settings: Arc<WebSettings>,
}

impl HttpTransport {
    pub fn new(settings: WebSettings) -> Self {
        let mut builder = Client::builder(TokioExecutor::new());
        if !settings.keep_alive {
            builder.pool_max_idle_per_host(0);
        }
        HttpTransport {
            client: builder.build_http(),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &WebSettings {
        &self.settings
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(WebSettings::default())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_request_stream(&self, uri: &str) -> Result<Box<dyn RequestStream>> {
        let uri: Uri = uri
            .parse()
            .map_err(|e| Error::Transport(format!("invalid URI {}: {}", uri, e)))?;
        Ok(Box::new(HttpRequestStream {
            client: self.client.clone(),
            settings: self.settings.clone(),
            uri,
            body: Vec::new(),
        }))
    }
}

// ── Request stream ─────────────────────────────────────────────────────────

struct HttpRequestStream {
    client: HttpClient,
    settings: Arc<WebSettings>,
    uri: Uri,
    body: Vec<u8>,
}

impl HttpRequestStream {
    fn build_request(&mut self) -> Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "text/xml")
            .header(USER_AGENT, self.settings.user_agent.as_str());
        for (name, value) in &self.settings.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let body = Bytes::from(std::mem::take(&mut self.body));
        builder
            .body(Full::new(body))
            .map_err(|e| Error::Transport(format!("failed to build request: {}", e)))
    }
}

impl AsyncWrite for HttpRequestStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.body.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl RequestStream for HttpRequestStream {
    async fn get_response(&mut self) -> Result<ResponseStream> {
        let request = self.build_request()?;
        debug!(uri = %self.uri, "sending HTTP request");
        let pending = self.client.request(request);
        let response = match self.settings.timeout() {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                Error::Transport(format!("request timed out after {} ms", limit.as_millis()))
            })?,
            None => pending.await,
        }
        .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        debug!(status, ?content_length, "received HTTP response headers");
        Ok(ResponseStream {
            status,
            content_length,
            body: Box::new(BodyReader {
                body: Box::pin(response.into_body()),
                pending: Bytes::new(),
            }),
        })
    }
}

// ── Response body ──────────────────────────────────────────────────────────

/// Adapts a hyper body to `AsyncRead`, skipping trailer frames.
struct BodyReader {
    body: Pin<Box<Incoming>>,
    pending: Bytes,
}

impl AsyncRead for BodyReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                let chunk = self.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }
            match self.body.as_mut().poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        self.pending = data;
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(io::Error::other(err))),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
