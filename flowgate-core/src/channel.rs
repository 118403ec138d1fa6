//! Cross-pipeline request/response handoff.
//!
//! A downstream pipeline commits a [`DownstreamRequest`] onto the upstream
//! pipeline's bounded inbox and waits on its [`ResponseHandle`]. The
//! upstream claims the request, serves it, and responds. The response path
//! is a rendezvous: `respond` completes only once the downstream worker has
//! taken the response, so a successful respond happens-before the
//! downstream's resumption and no queue exists on the reply path.
//!
//! Inboxes live in a [`CrossPipelineRouter`] shared by every pipeline of one
//! gateway process; requests are routed by the upstream pipeline name
//! carried on each request.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::cancel::Cancellation;
use crate::error::{FlowgateError, Result};
use crate::task::ResultCode;
use crate::value::Value;

/// The upstream's answer to a cross-pipeline request.
#[derive(Debug)]
pub struct UpstreamResponse {
    /// Name of the pipeline that served the request.
    pub upstream_pipeline_name: String,
    /// Response payload.
    pub data: HashMap<String, Value>,
    /// Error description from the upstream task, if it failed.
    pub task_error: Option<String>,
    /// Result code of the upstream task.
    pub task_result_code: ResultCode,
}

struct Rendezvous {
    response: UpstreamResponse,
    received: oneshot::Sender<()>,
}

/// A request committed by a downstream pipeline, claimed and served by an
/// upstream pipeline.
pub struct DownstreamRequest {
    upstream_pipeline_name: String,
    downstream_pipeline_name: String,
    data: HashMap<String, Value>,
    response_tx: mpsc::Sender<Rendezvous>,
}

impl DownstreamRequest {
    /// Create a request and the handle the downstream waits on.
    pub fn new(
        upstream_pipeline_name: impl Into<String>,
        downstream_pipeline_name: impl Into<String>,
        data: HashMap<String, Value>,
    ) -> (Self, ResponseHandle) {
        let downstream_pipeline_name = downstream_pipeline_name.into();
        let (response_tx, response_rx) = mpsc::channel(1);
        let request = Self {
            upstream_pipeline_name: upstream_pipeline_name.into(),
            downstream_pipeline_name: downstream_pipeline_name.clone(),
            data,
            response_tx,
        };
        let handle = ResponseHandle {
            downstream_pipeline_name,
            rx: Some(response_rx),
        };
        (request, handle)
    }

    /// The pipeline that will claim and serve this request.
    pub fn upstream_pipeline_name(&self) -> &str {
        &self.upstream_pipeline_name
    }

    /// The pipeline that originated this request.
    pub fn downstream_pipeline_name(&self) -> &str {
        &self.downstream_pipeline_name
    }

    /// The request payload.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    /// Take the request payload, leaving it empty.
    pub fn take_data(&mut self) -> HashMap<String, Value> {
        std::mem::take(&mut self.data)
    }

    /// Deliver the response to the waiting downstream worker.
    ///
    /// Completes only after the downstream has received the response. Fails
    /// with [`FlowgateError::PipelineClosed`] when the downstream closed its
    /// handle, and [`FlowgateError::Cancelled`] when `cancel` fires before
    /// the downstream reaches its rendezvous.
    pub async fn respond(&self, response: UpstreamResponse, cancel: &Cancellation) -> Result<()> {
        let (received_tx, received_rx) = oneshot::channel();
        let rendezvous = Rendezvous {
            response,
            received: received_tx,
        };

        tokio::select! {
            sent = self.response_tx.send(rendezvous) => {
                if sent.is_err() {
                    return Err(FlowgateError::closed(&self.downstream_pipeline_name));
                }
            }
            _ = cancel.cancelled() => {
                return Err(FlowgateError::cancelled("cross-pipeline respond"));
            }
        }

        tokio::select! {
            received = received_rx => match received {
                Ok(()) => Ok(()),
                Err(_) => Err(FlowgateError::closed(&self.downstream_pipeline_name)),
            },
            _ = cancel.cancelled() => Err(FlowgateError::cancelled("cross-pipeline respond")),
        }
    }

    /// Deliver a response without waiting for the rendezvous. Used when
    /// draining a closing pipeline's inbox; delivery is best-effort.
    fn respond_detached(&self, response: UpstreamResponse) {
        let (received_tx, _) = oneshot::channel();
        let _ = self.response_tx.try_send(Rendezvous {
            response,
            received: received_tx,
        });
    }
}

impl std::fmt::Debug for DownstreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamRequest")
            .field("upstream", &self.upstream_pipeline_name)
            .field("downstream", &self.downstream_pipeline_name)
            .field("data", &self.data)
            .finish()
    }
}

/// The downstream's receive side of a request's response rendezvous.
pub struct ResponseHandle {
    downstream_pipeline_name: String,
    rx: Option<mpsc::Receiver<Rendezvous>>,
}

impl ResponseHandle {
    /// Wait for the upstream's response.
    pub async fn recv(&mut self, cancel: &Cancellation) -> Result<UpstreamResponse> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| FlowgateError::closed(&self.downstream_pipeline_name))?;

        tokio::select! {
            rendezvous = rx.recv() => match rendezvous {
                Some(Rendezvous { response, received }) => {
                    // Unblocks the upstream's respond; it may already have
                    // given up on a cancellation, which is fine.
                    let _ = received.send(());
                    Ok(response)
                }
                None => Err(FlowgateError::closed(&self.downstream_pipeline_name)),
            },
            _ = cancel.cancelled() => Err(FlowgateError::cancelled("cross-pipeline response wait")),
        }
    }

    /// Close the rendezvous. Idempotent; a subsequent `respond` on the
    /// request side fails with [`FlowgateError::PipelineClosed`].
    pub fn close(&mut self) {
        self.rx = None;
    }

    /// Whether the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }
}

struct Inbox {
    tx: mpsc::Sender<DownstreamRequest>,
    rx: Mutex<mpsc::Receiver<DownstreamRequest>>,
    capacity: usize,
}

/// Routes cross-pipeline requests between the pipelines of one process.
///
/// Each pipeline context registers its inbox here on creation and removes it
/// on close; commits are routed by the upstream name on the request.
#[derive(Default)]
pub struct CrossPipelineRouter {
    inboxes: DashMap<String, Arc<Inbox>>,
}

impl CrossPipelineRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inbox for `pipeline` with the given backlog capacity.
    /// Re-registering an existing pipeline keeps the existing inbox.
    pub fn register(&self, pipeline: &str, backlog: usize) {
        self.inboxes
            .entry(pipeline.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(backlog.max(1));
                Arc::new(Inbox {
                    tx,
                    rx: Mutex::new(rx),
                    capacity: backlog.max(1),
                })
            });
    }

    /// Enqueue a request onto its upstream's inbox, blocking while the
    /// backlog is full.
    pub async fn commit(&self, request: DownstreamRequest, cancel: &Cancellation) -> Result<()> {
        let upstream = request.upstream_pipeline_name().to_string();
        let inbox = self
            .inboxes
            .get(&upstream)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FlowgateError::closed(&upstream))?;

        tokio::select! {
            sent = inbox.tx.send(request) => {
                sent.map_err(|_| FlowgateError::closed(&upstream))
            }
            _ = cancel.cancelled() => Err(FlowgateError::cancelled("cross-pipeline commit")),
        }
    }

    /// Dequeue the next pending request for `pipeline`. Returns `None` when
    /// cancelled or when the pipeline has no registered inbox.
    pub async fn claim(&self, pipeline: &str, cancel: &Cancellation) -> Option<DownstreamRequest> {
        let inbox = self
            .inboxes
            .get(pipeline)
            .map(|entry| Arc::clone(entry.value()))?;

        // Upstream workers claim concurrently; the receiver lock serializes
        // them, and the select keeps a queued claimer cancellable.
        let mut rx = tokio::select! {
            guard = inbox.rx.lock() => guard,
            _ = cancel.cancelled() => return None,
        };

        tokio::select! {
            request = rx.recv() => request,
            _ = cancel.cancelled() => None,
        }
    }

    /// Pending requests in `pipeline`'s inbox. Never exceeds the registered
    /// backlog capacity.
    pub fn wip_count(&self, pipeline: &str) -> usize {
        self.inboxes
            .get(pipeline)
            .map(|inbox| inbox.capacity - inbox.tx.capacity())
            .unwrap_or(0)
    }

    /// Remove `pipeline`'s inbox and answer every pending request with a
    /// best-effort closed response.
    pub async fn close_pipeline(&self, pipeline: &str) {
        let Some((_, inbox)) = self.inboxes.remove(pipeline) else {
            return;
        };

        let mut rx = inbox.rx.lock().await;
        // Fails senders blocked in commit; already-queued requests drain below.
        rx.close();
        let mut drained = 0usize;
        while let Ok(request) = rx.try_recv() {
            request.respond_detached(UpstreamResponse {
                upstream_pipeline_name: pipeline.to_string(),
                data: HashMap::new(),
                task_error: Some(format!("pipeline {} closed", pipeline)),
                task_result_code: ResultCode::ServiceUnavailable,
            });
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(
                pipeline = %pipeline,
                drained = drained,
                "closed cross-pipeline inbox with pending requests"
            );
        }
    }
}
