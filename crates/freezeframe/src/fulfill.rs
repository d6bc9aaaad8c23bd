//! Response fulfiller.
//!
//! Answers paused requests through a [`NetworkTransport`]. Each delivery runs
//! on its own tokio task: a fixture delay sleeps on a timer and never stalls
//! the driving task or other in-flight requests.

use crate::fixture::FixtureResponse;
use crate::lock;
use crate::network::InterceptedRequest;
use crate::registry::{HeldRequestRegistry, RequestHandle};
use crate::result::{FreezeError, FreezeResult, Sighting};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// The browser's network layer, as seen by the fulfiller
#[async_trait]
pub trait NetworkTransport: Send + Sync + fmt::Debug {
    /// Answer a paused request with a fixture
    async fn fulfill(
        &self,
        request: &InterceptedRequest,
        response: &FixtureResponse,
    ) -> FreezeResult<()>;

    /// Let a paused request reach the real network
    async fn continue_request(&self, request: &InterceptedRequest) -> FreezeResult<()>;

    /// Fail a paused request with a network error
    async fn abort(&self, request: &InterceptedRequest) -> FreezeResult<()>;
}

/// Errors raised off the driving task, surfaced at the next step boundary
#[derive(Debug, Clone, Default)]
pub struct FaultLog {
    faults: Arc<Mutex<Vec<FreezeError>>>,
}

impl FaultLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fault
    pub fn record(&self, fault: FreezeError) {
        error!(kind = fault.kind(), "{fault}");
        lock(&self.faults).push(fault);
    }

    /// Remove and return every recorded fault
    #[must_use]
    pub fn take(&self) -> Vec<FreezeError> {
        std::mem::take(&mut *lock(&self.faults))
    }

    /// Whether no fault is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.faults).is_empty()
    }
}

/// An in-flight delivery
#[derive(Debug)]
pub struct Delivery {
    url: String,
    task: JoinHandle<FreezeResult<()>>,
}

impl Delivery {
    /// URL of the request being answered
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the delivery already ran
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the transport accepted (or rejected) the delivery
    pub async fn wait(self) -> FreezeResult<()> {
        self.task
            .await
            .map_err(|e| FreezeError::transport(format!("delivery task for {} failed: {e}", self.url)))?
    }
}

/// Poll interval used while waiting for deliveries to settle
pub const SETTLE_POLL_INTERVAL_MS: u64 = 5;

#[derive(Debug, Default)]
struct InFlight {
    next_id: u64,
    urls: BTreeMap<u64, String>,
}

/// Removes a delivery from the in-flight set when its task ends, however it ends
struct InFlightGuard {
    id: u64,
    inflight: Arc<Mutex<InFlight>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.inflight).urls.remove(&self.id);
    }
}

enum Action {
    Fulfill(FixtureResponse),
    Continue,
    Abort,
}

/// Completes held requests
#[derive(Debug, Clone)]
pub struct Fulfiller {
    registry: Arc<Mutex<HeldRequestRegistry>>,
    transport: Arc<dyn NetworkTransport>,
    faults: FaultLog,
    inflight: Arc<Mutex<InFlight>>,
}

impl Fulfiller {
    /// Create a fulfiller over a registry and transport
    #[must_use]
    pub fn new(
        registry: Arc<Mutex<HeldRequestRegistry>>,
        transport: Arc<dyn NetworkTransport>,
        faults: FaultLog,
    ) -> Self {
        Self {
            registry,
            transport,
            faults,
            inflight: Arc::default(),
        }
    }

    /// Complete a held request after the response's delay.
    ///
    /// The handle is retired before this returns, so fulfilling it again is a
    /// `StaleHandle` even while the first delivery is still sleeping.
    pub fn fulfill(
        &self,
        handle: RequestHandle,
        response: FixtureResponse,
    ) -> FreezeResult<Delivery> {
        response.validate()?;
        let request = lock(&self.registry).release(handle)?;
        self.spawn(request, Action::Fulfill(response))
    }

    /// Complete a held request with no delay and wait for the transport
    pub async fn fulfill_immediately(
        &self,
        handle: RequestHandle,
        response: FixtureResponse,
    ) -> FreezeResult<()> {
        self.fulfill(handle, response.with_delay(0))?.wait().await
    }

    /// Answer a request that was never held
    pub fn deliver(
        &self,
        request: InterceptedRequest,
        response: FixtureResponse,
    ) -> FreezeResult<Delivery> {
        response.validate()?;
        self.spawn(request, Action::Fulfill(response))
    }

    /// Pass a request through to the network
    pub fn pass_through(&self, request: InterceptedRequest) -> FreezeResult<Delivery> {
        self.spawn(request, Action::Continue)
    }

    /// Fail a request
    pub fn abort(&self, request: InterceptedRequest) -> FreezeResult<Delivery> {
        self.spawn(request, Action::Abort)
    }

    /// URLs of deliveries that have not reached the transport yet, oldest first
    #[must_use]
    pub fn in_flight(&self) -> Vec<String> {
        lock(&self.inflight).urls.values().cloned().collect()
    }

    /// Wait until every spawned delivery has finished.
    ///
    /// Failed deliveries are in the fault log once this returns `Ok`.
    pub async fn settle(&self, timeout: Duration) -> FreezeResult<()> {
        let start = Instant::now();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            let pending = self.in_flight();
            if pending.is_empty() {
                debug!(attempts, "deliveries settled");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(FreezeError::Timeout {
                    condition: "in-flight deliveries to settle".to_string(),
                    attempts,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    sighting: Sighting::Present,
                    last_observed: format!("{} in flight: [{}]", pending.len(), pending.join(", ")),
                });
            }
            tokio::time::sleep(Duration::from_millis(SETTLE_POLL_INTERVAL_MS)).await;
        }
    }

    fn spawn(&self, request: InterceptedRequest, action: Action) -> FreezeResult<Delivery> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| FreezeError::InvalidState {
            message: format!("deliveries need a tokio runtime: {e}"),
        })?;

        let url = request.url.clone();
        let guard = {
            let mut inflight = lock(&self.inflight);
            inflight.next_id += 1;
            let id = inflight.next_id;
            inflight.urls.insert(id, url.clone());
            InFlightGuard {
                id,
                inflight: Arc::clone(&self.inflight),
            }
        };
        let transport = Arc::clone(&self.transport);
        let faults = self.faults.clone();
        let task = runtime.spawn(async move {
            let _guard = guard;
            let result = match &action {
                Action::Fulfill(response) => {
                    if response.delay_ms() > 0 {
                        tokio::time::sleep(response.delay()).await;
                    }
                    debug!(request = %request, status = response.status(), "fulfilling request");
                    transport.fulfill(&request, response).await
                }
                Action::Continue => {
                    debug!(request = %request, "continuing request");
                    transport.continue_request(&request).await
                }
                Action::Abort => {
                    debug!(request = %request, "aborting request");
                    transport.abort(&request).await
                }
            };
            if let Err(e) = &result {
                faults.record(FreezeError::transport(format!("{request}: {e}")));
            }
            result
        });

        Ok(Delivery { url, task })
    }
}

// ============================================================================
// Recording transport
// ============================================================================

/// What a [`RecordingTransport`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    /// Fulfilled with status and body
    Fulfilled {
        /// Status code
        status: u16,
        /// Body text
        body: String,
    },
    /// Continued
    Continued,
    /// Aborted
    Aborted,
}

/// One transport call
#[derive(Debug, Clone)]
pub struct TransportEvent {
    /// Transport-level request id
    pub request_id: String,
    /// Request URL
    pub url: String,
    /// What happened
    pub action: TransportAction,
    /// When the call arrived
    pub at: Instant,
}

/// In-memory transport for unit tests; records every call
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    events: Arc<Mutex<Vec<TransportEvent>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl RecordingTransport {
    /// Create an empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.fail_with) = Some(message.into());
    }

    /// Recorded calls in arrival order
    #[must_use]
    pub fn events(&self) -> Vec<TransportEvent> {
        lock(&self.events).clone()
    }

    /// Poll until at least `n` calls arrived, or the timeout elapses
    pub async fn wait_for_events(&self, n: usize, timeout: Duration) -> Vec<TransportEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= n || Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, request: &InterceptedRequest, action: TransportAction) -> FreezeResult<()> {
        if let Some(message) = lock(&self.fail_with).clone() {
            return Err(FreezeError::transport(message));
        }
        lock(&self.events).push(TransportEvent {
            request_id: request.id.0.clone(),
            url: request.url.clone(),
            action,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl NetworkTransport for RecordingTransport {
    async fn fulfill(
        &self,
        request: &InterceptedRequest,
        response: &FixtureResponse,
    ) -> FreezeResult<()> {
        self.record(
            request,
            TransportAction::Fulfilled {
                status: response.status(),
                body: response.body().to_string(),
            },
        )
    }

    async fn continue_request(&self, request: &InterceptedRequest) -> FreezeResult<()> {
        self.record(request, TransportAction::Continued)
    }

    async fn abort(&self, request: &InterceptedRequest) -> FreezeResult<()> {
        self.record(request, TransportAction::Aborted)
    }
}
