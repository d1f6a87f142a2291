//! `tower::Service` front for the client adapter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tower::Service;

use super::adapter::ClientSessionAdapter;
use crate::request::{response_fn, Request, RequestError, RequestHandler, Response};

/// Service whose future resolves to the response for each request.
#[derive(Debug, Clone)]
pub struct ClientService {
    adapter: Arc<ClientSessionAdapter>,
}

impl ClientService {
    #[must_use]
    pub fn new(adapter: Arc<ClientSessionAdapter>) -> Self {
        Self { adapter }
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<ClientSessionAdapter> {
        &self.adapter
    }
}

impl Service<Request> for ClientService {
    type Response = Response;
    type Error = RequestError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, RequestError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.adapter.is_closed() {
            Poll::Ready(Err(RequestError::Closed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let (tx, rx) = oneshot::channel::<Response>();
        let slot = Mutex::new(Some(tx));
        let handler = response_fn(move |response| match slot.lock().take() {
            Some(tx) => tx
                .send(response)
                .map_err(|_| anyhow::anyhow!("response future was dropped")),
            None => Err(anyhow::anyhow!("response already delivered")),
        });

        let submitted = self.adapter.handle_request(request, handler);
        // The adapter owns the send worker; it must outlive the service handle.
        let adapter = Arc::clone(&self.adapter);
        Box::pin(async move {
            submitted?;
            let response = rx.await.map_err(|_| {
                RequestError::Handler(anyhow::anyhow!("request dropped without a response"))
            });
            drop(adapter);
            response
        })
    }
}
