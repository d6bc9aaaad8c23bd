//! Held-request registry.
//!
//! Owns intercepted requests that a route decided to hold. A handle stays valid
//! until it is released; there is no implicit expiry. Releasing twice, or
//! releasing a handle the registry never issued, is a [`FreezeError::StaleHandle`].

use crate::network::{InterceptedRequest, RequestPredicate};
use crate::result::{FreezeError, FreezeResult};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

/// Handle to a held request. Handles increase in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(u64);

impl RequestHandle {
    /// Raw value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Store of pending requests for one browsing context
#[derive(Debug, Default)]
pub struct HeldRequestRegistry {
    pending: BTreeMap<RequestHandle, InterceptedRequest>,
    retired: HashSet<RequestHandle>,
    next: u64,
}

impl HeldRequestRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a paused request and return its handle
    pub fn capture(&mut self, request: InterceptedRequest) -> RequestHandle {
        self.next += 1;
        let handle = RequestHandle(self.next);
        debug!(%handle, request = %request, "request held");
        self.pending.insert(handle, request);
        handle
    }

    /// Remove a request, handing ownership back to the caller
    pub fn release(&mut self, handle: RequestHandle) -> FreezeResult<InterceptedRequest> {
        match self.pending.remove(&handle) {
            Some(request) => {
                self.retired.insert(handle);
                debug!(%handle, request = %request, "request released");
                Ok(request)
            }
            None => Err(self.stale(handle)),
        }
    }

    /// Pending handles in capture order
    #[must_use]
    pub fn list_pending(&self) -> Vec<RequestHandle> {
        self.pending.keys().copied().collect()
    }

    /// Earliest-captured pending request accepted by `predicate`
    #[must_use]
    pub fn find_pending(&self, predicate: &RequestPredicate) -> Option<RequestHandle> {
        self.pending
            .iter()
            .find(|(_, request)| predicate.accepts(request))
            .map(|(handle, _)| *handle)
    }

    /// Inspect a pending request
    #[must_use]
    pub fn get(&self, handle: RequestHandle) -> Option<&InterceptedRequest> {
        self.pending.get(&handle)
    }

    /// Number of pending requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Release everything, returning the requests in capture order
    pub fn drain(&mut self) -> Vec<InterceptedRequest> {
        let drained = std::mem::take(&mut self.pending);
        self.retired.extend(drained.keys().copied());
        drained.into_values().collect()
    }

    fn stale(&self, handle: RequestHandle) -> FreezeError {
        let message = if self.retired.contains(&handle) {
            "request was already released or fulfilled"
        } else {
            "handle was never issued by this registry"
        };
        FreezeError::StaleHandle {
            handle: handle.as_u64(),
            message: message.to_string(),
        }
    }
}
