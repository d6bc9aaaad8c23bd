//! Per-context interception state.
//!
//! An [`Interceptor`] bundles the route table, the held-request registry and the
//! fulfiller of one browsing context. The browser session calls
//! [`Interceptor::dispatch`] for each paused request; the scenario driver uses
//! the rest of the API to wait for, inspect and answer held requests.
//!
//! Route resolution and capture happen synchronously inside `dispatch`, so
//! requests are offered to handlers in the order the browser issued them.
//! Transport calls run on spawned tasks.

use crate::fixture::FixtureResponse;
use crate::fulfill::{Delivery, FaultLog, Fulfiller, NetworkTransport};
use crate::lock;
use crate::network::{InterceptedRequest, RequestPredicate, RouteDecision, RouteId, RouteSpec, RouteTable};
use crate::registry::{HeldRequestRegistry, RequestHandle};
use crate::result::{FreezeError, FreezeResult, Sighting};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Poll interval used while waiting for a held request
pub const HELD_POLL_INTERVAL_MS: u64 = 10;

/// What `dispatch` did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Answered with a fixture (delivery may still be sleeping)
    Fulfilled {
        /// Fixture delay
        delay_ms: u64,
    },
    /// Parked in the registry
    Held(RequestHandle),
    /// Passed to the real network by a route
    Continued,
    /// Failed by a route
    Aborted,
    /// No route matched; passed to the real network
    Unrouted,
}

/// Interception state of one browsing context
#[derive(Debug, Clone)]
pub struct Interceptor {
    routes: Arc<Mutex<RouteTable>>,
    registry: Arc<Mutex<HeldRequestRegistry>>,
    fulfiller: Fulfiller,
    faults: FaultLog,
}

impl Interceptor {
    /// Create an interceptor answering through `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn NetworkTransport>) -> Self {
        let registry = Arc::new(Mutex::new(HeldRequestRegistry::new()));
        let faults = FaultLog::new();
        let fulfiller = Fulfiller::new(Arc::clone(&registry), transport, faults.clone());
        Self {
            routes: Arc::new(Mutex::new(RouteTable::new())),
            registry,
            fulfiller,
            faults,
        }
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Replace every registered route with `specs`.
    ///
    /// Either all specs are registered or the previous table is kept.
    pub fn arm(&self, specs: &[RouteSpec]) -> FreezeResult<()> {
        let mut table = RouteTable::new();
        for spec in specs {
            table.register(spec)?;
        }
        *lock(&self.routes) = table;
        info!(routes = specs.len(), "routes armed");
        Ok(())
    }

    /// Add one route after the existing ones
    pub fn register(&self, spec: &RouteSpec) -> FreezeResult<RouteId> {
        lock(&self.routes).register(spec)
    }

    /// Remove every route registered for `pattern`
    pub fn clear_route(&self, pattern: &str) -> usize {
        lock(&self.routes).clear_route(pattern)
    }

    /// Remove every route
    pub fn clear_routes(&self) {
        lock(&self.routes).clear_all();
    }

    /// Number of registered routes
    #[must_use]
    pub fn route_count(&self) -> usize {
        lock(&self.routes).route_count()
    }

    /// Requests that matched no route
    #[must_use]
    pub fn unrouted_count(&self) -> usize {
        lock(&self.routes).unrouted_count()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Decide the fate of a paused request. Returns without waiting for any
    /// delivery.
    pub fn dispatch(&self, request: InterceptedRequest) -> FreezeResult<DispatchOutcome> {
        let resolved = lock(&self.routes).resolve(&request);
        let Some((route, handler)) = resolved else {
            trace!(request = %request, "no route, continuing");
            self.fulfiller.pass_through(request)?;
            return Ok(DispatchOutcome::Unrouted);
        };

        let decision = handler.decide(&request);
        debug!(request = %request, ?route, handler = handler.label(), ?decision, "dispatch");

        match decision {
            RouteDecision::Fulfill(response) => {
                if let Err(e) = response.validate() {
                    // The browser must not be left waiting on a request we refuse to answer.
                    self.fulfiller.abort(request)?;
                    return Err(e);
                }
                let delay_ms = response.delay_ms();
                self.fulfiller.deliver(request, response)?;
                Ok(DispatchOutcome::Fulfilled { delay_ms })
            }
            RouteDecision::Hold => {
                let handle = lock(&self.registry).capture(request);
                Ok(DispatchOutcome::Held(handle))
            }
            RouteDecision::Continue => {
                self.fulfiller.pass_through(request)?;
                Ok(DispatchOutcome::Continued)
            }
            RouteDecision::Abort => {
                self.fulfiller.abort(request)?;
                Ok(DispatchOutcome::Aborted)
            }
        }
    }

    // ========================================================================
    // Held requests
    // ========================================================================

    /// Earliest held request accepted by `predicate`, if any
    #[must_use]
    pub fn find_held(&self, predicate: &RequestPredicate) -> Option<RequestHandle> {
        lock(&self.registry).find_pending(predicate)
    }

    /// Wait until a held request accepted by `predicate` exists
    pub async fn next_held(
        &self,
        predicate: &RequestPredicate,
        timeout: Duration,
    ) -> FreezeResult<RequestHandle> {
        let start = Instant::now();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            if let Some(handle) = self.find_held(predicate) {
                debug!(%handle, attempts, "held request found");
                return Ok(handle);
            }
            if start.elapsed() >= timeout {
                let pending = self.pending_urls();
                return Err(FreezeError::Timeout {
                    condition: format!("held request ({predicate})"),
                    attempts,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    sighting: Sighting::Never,
                    last_observed: format!("{} pending: [{}]", pending.len(), pending.join(", ")),
                });
            }
            tokio::time::sleep(Duration::from_millis(HELD_POLL_INTERVAL_MS)).await;
        }
    }

    /// Inspect a held request without releasing it
    pub fn with_held<R>(
        &self,
        handle: RequestHandle,
        f: impl FnOnce(&InterceptedRequest) -> R,
    ) -> Option<R> {
        lock(&self.registry).get(handle).map(f)
    }

    /// Pending handles in capture order
    #[must_use]
    pub fn list_pending(&self) -> Vec<RequestHandle> {
        lock(&self.registry).list_pending()
    }

    /// URLs of pending requests, in capture order
    #[must_use]
    pub fn pending_urls(&self) -> Vec<String> {
        let registry = lock(&self.registry);
        registry
            .list_pending()
            .into_iter()
            .filter_map(|handle| registry.get(handle).map(ToString::to_string))
            .collect()
    }

    /// Complete a held request after the response's delay
    pub fn fulfill(&self, handle: RequestHandle, response: FixtureResponse) -> FreezeResult<Delivery> {
        self.fulfiller.fulfill(handle, response)
    }

    /// Complete a held request now and wait for the transport
    pub async fn fulfill_immediately(
        &self,
        handle: RequestHandle,
        response: FixtureResponse,
    ) -> FreezeResult<()> {
        self.fulfiller.fulfill_immediately(handle, response).await
    }

    /// Abort every pending request so the page is not left hanging at teardown
    pub fn abandon_pending(&self) -> usize {
        let drained = lock(&self.registry).drain();
        let count = drained.len();
        for request in drained {
            warn!(request = %request, "aborting unfulfilled held request");
            if let Err(e) = self.fulfiller.abort(request) {
                warn!("could not abort held request: {e}");
            }
        }
        count
    }

    // ========================================================================
    // Faults and verification
    // ========================================================================

    /// Record an error raised while handling a browser-originated request
    pub fn record_fault(&self, fault: FreezeError) {
        self.faults.record(fault);
    }

    /// Remove and return recorded faults
    #[must_use]
    pub fn take_faults(&self) -> Vec<FreezeError> {
        self.faults.take()
    }

    /// Return the first recorded fault, if any, clearing the log
    pub fn check_faults(&self) -> FreezeResult<()> {
        match self.faults.take().into_iter().next() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// URLs of deliveries still sleeping or talking to the transport
    #[must_use]
    pub fn in_flight(&self) -> Vec<String> {
        self.fulfiller.in_flight()
    }

    /// Wait for every delivery spawned so far, including those started by
    /// `dispatch`
    pub async fn settle(&self, timeout: Duration) -> FreezeResult<()> {
        self.fulfiller.settle(timeout).await
    }

    /// Fail on faults, unmet route expectations, or requests still held.
    ///
    /// Call [`Interceptor::settle`] first; deliveries still in flight cannot
    /// have reported their faults yet.
    pub fn verify(&self) -> FreezeResult<()> {
        self.check_faults()?;
        lock(&self.routes).verify()?;
        let pending = self.pending_urls();
        if !pending.is_empty() {
            return Err(FreezeError::UnfulfilledRequests {
                count: pending.len(),
                urls: pending.join(", "),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fulfill::{RecordingTransport, TransportAction};
    use crate::network::{HttpMethod, RouteHandler};

    const CASES: &str = "http://localhost:3000/api/cases";

    fn interceptor() -> (Interceptor, RecordingTransport) {
        let transport = RecordingTransport::new();
        (Interceptor::new(Arc::new(transport.clone())), transport)
    }

    fn get(id: &str) -> InterceptedRequest {
        InterceptedRequest::new(id, HttpMethod::Get, CASES)
    }

    fn post(id: &str) -> InterceptedRequest {
        InterceptedRequest::new(id, HttpMethod::Post, CASES).with_body("{}")
    }

    mod dispatch_tests {
        use super::*;

        #[tokio::test]
        async fn test_unrouted_requests_continue() {
            let (interceptor, transport) = interceptor();
            let outcome = interceptor.dispatch(get("1")).unwrap();
            assert_eq!(outcome, DispatchOutcome::Unrouted);
            let events = transport.wait_for_events(1, Duration::from_secs(1)).await;
            assert_eq!(events[0].action, TransportAction::Continued);
            assert_eq!(interceptor.unrouted_count(), 1);
        }

        #[tokio::test]
        async fn test_method_routes_fulfil_and_hold() {
            let (interceptor, transport) = interceptor();
            interceptor
                .arm(&[
                    RouteSpec::new("**/api/cases", RouteHandler::hold()).method(HttpMethod::Post),
                    RouteSpec::new(
                        "**/api/cases",
                        RouteHandler::respond(FixtureResponse::json_text("[]").unwrap()),
                    ),
                ])
                .unwrap();

            assert_eq!(
                interceptor.dispatch(get("1")).unwrap(),
                DispatchOutcome::Fulfilled { delay_ms: 0 }
            );
            let held = interceptor.dispatch(post("2")).unwrap();
            let DispatchOutcome::Held(handle) = held else {
                panic!("expected hold, got {held:?}");
            };

            let events = transport.wait_for_events(1, Duration::from_secs(1)).await;
            assert_eq!(events.len(), 1);
            assert_eq!(interceptor.list_pending(), vec![handle]);
            assert!(interceptor
                .with_held(handle, |r| r.has_body())
                .unwrap());
        }

        #[tokio::test]
        async fn test_malformed_handler_fixture_aborts_request() {
            let (interceptor, transport) = interceptor();
            interceptor
                .arm(&[RouteSpec::new(
                    "**/api/cases",
                    RouteHandler::respond(FixtureResponse::new(200, "application/json", "{bad")),
                )])
                .unwrap();
            let err = interceptor.dispatch(get("1")).unwrap_err();
            assert_eq!(err.kind(), "MalformedFixture");
            let events = transport.wait_for_events(1, Duration::from_secs(1)).await;
            assert_eq!(events[0].action, TransportAction::Aborted);
        }

        #[tokio::test]
        async fn test_arm_replaces_routes() {
            let (interceptor, _) = interceptor();
            interceptor
                .arm(&[RouteSpec::new("**/api/cases", RouteHandler::hold())])
                .unwrap();
            interceptor
                .arm(&[RouteSpec::new("**/api/cases", RouteHandler::abort())])
                .unwrap();
            assert_eq!(interceptor.route_count(), 1);
            assert_eq!(interceptor.dispatch(get("1")).unwrap(), DispatchOutcome::Aborted);
        }

        #[test]
        fn test_failed_arm_keeps_previous_table() {
            let (interceptor, _) = interceptor();
            interceptor
                .arm(&[RouteSpec::new("**/api/cases", RouteHandler::hold())])
                .unwrap();
            let result = interceptor.arm(&[
                RouteSpec::new("**/api/files", RouteHandler::hold()),
                RouteSpec::new("", RouteHandler::hold()),
            ]);
            assert!(result.is_err());
            assert_eq!(interceptor.route_count(), 1);
        }
    }

    mod held_tests {
        use super::*;

        #[tokio::test]
        async fn test_next_held_waits_for_capture() {
            let (interceptor, _) = interceptor();
            interceptor
                .arm(&[RouteSpec::new("**/api/cases", RouteHandler::hold())])
                .unwrap();

            let background = interceptor.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                background.dispatch(post("late")).unwrap();
            });

            let handle = interceptor
                .next_held(&RequestPredicate::Method(HttpMethod::Post), Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(interceptor.with_held(handle, |r| r.id.0.clone()).unwrap(), "late");
        }

        #[tokio::test]
        async fn test_next_held_times_out() {
            let (interceptor, _) = interceptor();
            let err = interceptor
                .next_held(&RequestPredicate::Any, Duration::from_millis(40))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "TimeoutError");
            assert!(err.to_string().contains("never appeared"));
        }

        #[tokio::test]
        async fn test_fulfil_out_of_order() {
            let (interceptor, transport) = interceptor();
            interceptor
                .arm(&[RouteSpec::new("**/api/cases", RouteHandler::hold())])
                .unwrap();
            interceptor.dispatch(get("first")).unwrap();
            interceptor.dispatch(get("second")).unwrap();
            let pending = interceptor.list_pending();

            interceptor
                .fulfill_immediately(pending[1], FixtureResponse::text("b"))
                .await
                .unwrap();
            interceptor
                .fulfill_immediately(pending[0], FixtureResponse::text("a"))
                .await
                .unwrap();

            let order: Vec<_> = transport.events().into_iter().map(|e| e.request_id).collect();
            assert_eq!(order, vec!["second", "first"]);
        }
    }

    mod verify_tests {
        use super::*;

        #[tokio::test]
        async fn test_held_leak_fails_verification() {
            let (interceptor, transport) = interceptor();
            interceptor
                .arm(&[RouteSpec::new("**/api/cases", RouteHandler::hold())])
                .unwrap();
            interceptor.dispatch(get("1")).unwrap();

            let err = interceptor.verify().unwrap_err();
            assert_eq!(err.kind(), "UnfulfilledRequests");
            assert!(err.to_string().contains(CASES));

            assert_eq!(interceptor.abandon_pending(), 1);
            let events = transport.wait_for_events(1, Duration::from_secs(1)).await;
            assert_eq!(events[0].action, TransportAction::Aborted);
            assert!(interceptor.verify().is_ok());
        }

        #[test]
        fn test_route_expectation_checked() {
            let (interceptor, _) = interceptor();
            interceptor
                .arm(&[RouteSpec::new("**/api/cases", RouteHandler::hold()).expect_at_least(1)])
                .unwrap();
            assert_eq!(interceptor.verify().unwrap_err().kind(), "RouteConfigError");
        }

        #[tokio::test]
        async fn test_settle_then_verify_catches_delayed_dispatch_failure() {
            let (interceptor, transport) = interceptor();
            interceptor
                .arm(&[RouteSpec::new(
                    "**/api/cases",
                    RouteHandler::respond(FixtureResponse::json_text("[]").unwrap().with_delay(60)),
                )])
                .unwrap();
            transport.fail_with("target closed");
            interceptor.dispatch(get("1")).unwrap();

            assert!(interceptor.verify().is_ok());
            interceptor.settle(Duration::from_secs(2)).await.unwrap();
            let err = interceptor.verify().unwrap_err();
            assert_eq!(err.kind(), "TransportError");
            assert!(err.to_string().contains("target closed"));
        }

        #[test]
        fn test_faults_surface_once() {
            let (interceptor, _) = interceptor();
            interceptor.record_fault(FreezeError::transport("boom"));
            assert!(interceptor.check_faults().is_err());
            assert!(interceptor.check_faults().is_ok());
        }
    }
}
