//! Tower layer wiring the access gate into axum routers.

use axum_core::extract::Request;
use axum_core::response::Response;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use super::gate::AccessGate;

/// Layer that applies an [`AccessGate`] to every request of the wrapped
/// service.
///
/// The gate decides per request whether the path is protected; apply the
/// layer to a whole router and list the paid paths in the route table.
#[derive(Debug, Clone)]
pub struct AccessGateLayer {
    gate: AccessGate,
}

impl AccessGateLayer {
    /// Creates a layer from a configured gate.
    #[must_use]
    pub fn new(gate: AccessGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for AccessGateLayer
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = AccessGateService;

    fn layer(&self, inner: S) -> Self::Service {
        AccessGateService {
            gate: self.gate.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service produced by [`AccessGateLayer`].
#[derive(Clone)]
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct AccessGateService {
    gate: AccessGate,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for AccessGateService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        let inner = self.inner.clone();
        Box::pin(async move { gate.handle_request(inner, req).await })
    }
}
