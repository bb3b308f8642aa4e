use super::{NetworkStack, StackBackend, StackLifecycle, StackState};
use crate::error::Result;
use log::{debug, info};
use std::sync::{Mutex, MutexGuard};

/// Lifecycle for the kernel-stack backend: there is no embedded endpoint to
/// detach, so closing just shuts the stack down once.
pub struct SystemStackLifecycle {
    stack: Mutex<Option<Box<dyn NetworkStack>>>,
}

impl SystemStackLifecycle {
    pub fn new(stack: Box<dyn NetworkStack>) -> Self {
        Self {
            stack: Mutex::new(Some(stack)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn NetworkStack>>> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StackLifecycle for SystemStackLifecycle {
    fn backend(&self) -> StackBackend {
        StackBackend::System
    }

    fn state(&self) -> StackState {
        if self.lock().is_some() {
            StackState::Running
        } else {
            StackState::Closed
        }
    }

    fn close(&self) -> Result<()> {
        // Held across close so a concurrent caller never sees a half-closed stack.
        let mut stack = self.lock();
        match stack.take() {
            Some(stack) => {
                info!("Closing system stack");
                stack.close()
            }
            None => {
                debug!("System stack already closed");
                Ok(())
            }
        }
    }
}
