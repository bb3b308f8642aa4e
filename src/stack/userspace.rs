use super::{LinkEndpoint, NetworkStack, StackBackend, StackLifecycle, StackState};
use crate::error::Result;
use log::{debug, info, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

struct StackParts {
    stack: Box<dyn NetworkStack>,
    endpoint: Arc<dyn LinkEndpoint>,
}

impl StackParts {
    fn teardown(self) -> Result<()> {
        // Packets must stop arriving before any stack state goes away.
        self.endpoint.attach(None);

        let result = self.stack.close();
        if let Err(e) = &result {
            warn!("User-space stack reported an error on close: {}", e);
        }

        // Flows left behind by the stack would otherwise outlive it.
        let flows = self.stack.cleanup_endpoints();
        let aborted = flows.len();
        for flow in flows {
            flow.abort();
        }
        debug!("Aborted {} pending flows", aborted);

        result
    }
}

enum Lifecycle {
    Running(StackParts),
    Closing,
    Closed,
}

/// Lifecycle for backends embedding the user-space stack.
///
/// Closing detaches the link endpoint, closes the stack, then aborts every
/// flow the stack still holds. The stack reference is dropped afterwards, so
/// every later `close` is a no-op. A `close` arriving mid-teardown waits for
/// it to finish before returning.
pub struct UserspaceStackAdapter {
    backend: StackBackend,
    lifecycle: Mutex<Lifecycle>,
    closed: Condvar,
}

/// Marks the adapter `Closed` and wakes waiting callers, even if teardown panics.
struct ClosedOnDrop<'a> {
    adapter: &'a UserspaceStackAdapter,
}

impl Drop for ClosedOnDrop<'_> {
    fn drop(&mut self) {
        *self.adapter.lock() = Lifecycle::Closed;
        self.adapter.closed.notify_all();
    }
}

impl UserspaceStackAdapter {
    pub fn new(
        backend: StackBackend,
        stack: Box<dyn NetworkStack>,
        endpoint: Arc<dyn LinkEndpoint>,
    ) -> Self {
        Self {
            backend,
            lifecycle: Mutex::new(Lifecycle::Running(StackParts { stack, endpoint })),
            closed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StackLifecycle for UserspaceStackAdapter {
    fn backend(&self) -> StackBackend {
        self.backend
    }

    fn state(&self) -> StackState {
        match *self.lock() {
            Lifecycle::Running(_) => StackState::Running,
            Lifecycle::Closing => StackState::Closing,
            Lifecycle::Closed => StackState::Closed,
        }
    }

    fn close(&self) -> Result<()> {
        let parts = {
            let mut lifecycle = self.lock();
            loop {
                match std::mem::replace(&mut *lifecycle, Lifecycle::Closing) {
                    Lifecycle::Running(parts) => break parts,
                    Lifecycle::Closing => {
                        debug!("Waiting for {} stack teardown", self.backend);
                        lifecycle = self
                            .closed
                            .wait(lifecycle)
                            .unwrap_or_else(|e| e.into_inner());
                    }
                    Lifecycle::Closed => {
                        *lifecycle = Lifecycle::Closed;
                        debug!("{} stack already closed", self.backend);
                        return Ok(());
                    }
                }
            }
        };

        let _closed = ClosedOnDrop { adapter: self };
        info!("Closing {} stack", self.backend);
        parts.teardown()
    }
}
