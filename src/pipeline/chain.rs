//! Stage composition for outbound request pipelines.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, Method};
use url::Url;

use crate::error::Result;

/// Response type flowing back through the pipeline.
pub type Response = http::Response<Bytes>;

/// An outbound request descriptor.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
}

impl Request {
    /// Create a request with no headers.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Create a `GET` request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }
}

/// One stage of a pipeline.
///
/// A stage either answers the request itself or hands it on with
/// [`Next::run`], optionally inspecting the response on the way back.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle `request`, delegating to `next` as needed.
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response>;
}

/// Terminal stage that actually performs the request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the upstream response.
    async fn send(&self, request: Request) -> Result<Response>;
}

/// The remainder of a pipeline, as seen from inside a stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    /// Run the remaining stages, then the transport.
    pub fn run(self, request: Request) -> BoxFuture<'a, Result<Response>> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(
                request,
                Next {
                    stages: rest,
                    transport: self.transport,
                },
            ),
            None => self.transport.send(request),
        }
    }
}

/// Ordered stages in front of a transport.
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    /// A pipeline with no stages.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            stages: Vec::new(),
            transport,
        }
    }

    /// Append a stage. Stages run in the order they are added.
    pub fn with(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Number of stages in front of the transport.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when requests go straight to the transport.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run `request` through every stage and the transport.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        Next {
            stages: &self.stages,
            transport: self.transport.as_ref(),
        }
        .run(request)
        .await
    }
}
