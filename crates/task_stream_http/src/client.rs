use std::collections::VecDeque;

use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Serialize;
use tracing::debug;

use task_stream::{
    ApiError, EndpointPaths, FrameStream, ServiceProfile, StartRequest, StreamHandle, TaskApi,
    Transport, TransportError,
};

use crate::config::HttpTaskConfig;
use crate::error::{parse_error_message, HttpTaskError};
use crate::payload::{CancelRequest, RespondRequest, StartResponse};
use crate::sse::SseFrameParser;
use crate::url::{endpoint_url, events_url};

/// reqwest-backed task API and SSE transport for one service profile.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpTaskClient {
    http: Client,
    config: HttpTaskConfig,
    endpoints: EndpointPaths,
}

impl HttpTaskClient {
    pub fn new(config: HttpTaskConfig, endpoints: EndpointPaths) -> Result<Self, HttpTaskError> {
        endpoint_url(&config.base_url, &endpoints.start)?;
        let mut builder = Client::builder().default_headers(build_headers(&config)?);
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = config.user_agent.as_deref().map(str::trim) {
            if !user_agent.is_empty() {
                builder = builder.user_agent(user_agent.to_owned());
            }
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            config,
            endpoints,
        })
    }

    pub fn for_profile(config: HttpTaskConfig, profile: &ServiceProfile) -> Result<Self, HttpTaskError> {
        Self::new(config, profile.endpoints.clone())
    }

    pub fn config(&self) -> &HttpTaskConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &EndpointPaths {
        &self.endpoints
    }

    pub async fn start_task(&self, request: &StartRequest) -> Result<StreamHandle, HttpTaskError> {
        let url = endpoint_url(&self.config.base_url, &self.endpoints.start)?;
        let body = self.post_json(url, request).await?.text().await?;
        let started: StartResponse = serde_json::from_str(&body)?;
        if started.event_file_id.trim().is_empty() {
            return Err(HttpTaskError::MissingHandle);
        }
        Ok(StreamHandle::new(started.event_file_id))
    }

    pub async fn respond_task(
        &self,
        handle: &StreamHandle,
        event_id: &str,
        response: &str,
    ) -> Result<(), HttpTaskError> {
        let url = endpoint_url(&self.config.base_url, &self.endpoints.response)?;
        let payload = RespondRequest::new(event_id, handle.as_str(), response);
        self.post_json(url, &payload).await?;
        Ok(())
    }

    pub async fn cancel_task(&self, handle: &StreamHandle) -> Result<(), HttpTaskError> {
        let url = endpoint_url(&self.config.base_url, &self.endpoints.cancel)?;
        self.post_json(url, &CancelRequest::new(handle.as_str())).await?;
        Ok(())
    }

    /// Open the server-push stream of a run.
    pub async fn open_events(&self, handle: &StreamHandle) -> Result<FrameStream, HttpTaskError> {
        let url = events_url(&self.config.base_url, &self.endpoints.events, handle.as_str())?;
        debug!(%url, "opening event stream");
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(frame_stream(response))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: Url,
        payload: &T,
    ) -> Result<Response, HttpTaskError> {
        debug!(%url, "POST");
        let response = self.with_timeout(self.http.post(url).json(payload)).send().await?;
        ensure_success(response).await
    }

    fn with_timeout(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

impl Transport for HttpTaskClient {
    fn open(&self, handle: &StreamHandle) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
        let client = self.clone();
        let handle = handle.clone();
        async move {
            client
                .open_events(&handle)
                .await
                .map_err(|error| TransportError::Connect(error.to_string()))
        }
        .boxed()
    }
}

impl TaskApi for HttpTaskClient {
    fn start(&self, request: StartRequest) -> BoxFuture<'static, Result<StreamHandle, ApiError>> {
        let client = self.clone();
        async move { client.start_task(&request).await.map_err(Into::into) }.boxed()
    }

    fn respond(
        &self,
        handle: &StreamHandle,
        event_id: &str,
        response: &str,
    ) -> BoxFuture<'static, Result<(), ApiError>> {
        let client = self.clone();
        let handle = handle.clone();
        let event_id = event_id.to_owned();
        let response = response.to_owned();
        async move {
            client
                .respond_task(&handle, &event_id, &response)
                .await
                .map_err(Into::into)
        }
        .boxed()
    }

    fn cancel(&self, handle: &StreamHandle) -> BoxFuture<'static, Result<(), ApiError>> {
        let client = self.clone();
        let handle = handle.clone();
        async move { client.cancel_task(&handle).await.map_err(Into::into) }.boxed()
    }
}

struct FrameState {
    parser: SseFrameParser,
    ready: VecDeque<String>,
    failed: bool,
}

fn frame_stream(response: Response) -> FrameStream {
    let state = FrameState {
        parser: SseFrameParser::default(),
        ready: VecDeque::new(),
        failed: false,
    };

    stream::unfold(
        (response.bytes_stream().boxed(), state),
        |(mut bytes, mut state)| async move {
            loop {
                if let Some(frame) = state.ready.pop_front() {
                    return Some((Ok(frame), (bytes, state)));
                }
                if state.failed {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => state.ready.extend(state.parser.feed(&chunk)),
                    Some(Err(error)) => {
                        state.failed = true;
                        let error = TransportError::Stream(error.to_string());
                        return Some((Err(error), (bytes, state)));
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}

async fn ensure_success(response: Response) -> Result<Response, HttpTaskError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| String::new());
    Err(HttpTaskError::Status(status, parse_error_message(status, &body)))
}

fn build_headers(config: &HttpTaskConfig) -> Result<HeaderMap, HttpTaskError> {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.trim().to_ascii_lowercase().as_bytes())
            .map_err(|_| HttpTaskError::InvalidHeader(format!("invalid header key: {key}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| HttpTaskError::InvalidHeader(format!("invalid header value for {key}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
