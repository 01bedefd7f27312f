//! Scoped native execution context
//!
//! Every protocol operation runs between one `open_context` and one
//! `close_context`. The release lives in a guard's `Drop`, so it happens on
//! success, on error, on early return and when the operation future is
//! dropped mid-flight.

use ariesagent_core::{AgentConfig, Error, Result};
use ariesagent_vcx::VcxLibrary;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct SessionContext {
    library: Arc<dyn VcxLibrary>,
    config: Arc<AgentConfig>,
    active: AtomicBool,
}

/// Releases the native context when dropped.
struct SessionGuard<'a> {
    ctx: &'a SessionContext,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.ctx.library.close_context();
        self.ctx.active.store(false, Ordering::SeqCst);
        debug!("session released for {}", self.ctx.config.agent_name);
    }
}

impl SessionContext {
    pub fn new(library: Arc<dyn VcxLibrary>, config: Arc<AgentConfig>) -> Self {
        Self {
            library,
            config,
            active: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    /// Whether an operation currently holds the context.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> Result<SessionGuard<'_>> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::SessionBusy);
        }
        // Built before opening so a half-initialised context is torn down too.
        let guard = SessionGuard { ctx: self };
        match self.library.open_context(&self.config).await {
            Ok(()) => {
                debug!("session acquired for {}", self.config.agent_name);
                Ok(guard)
            }
            Err(e) => {
                drop(guard);
                Err(Error::session_acquisition(e))
            }
        }
    }

    /// Run `operation` inside exactly one acquire/release pair.
    ///
    /// A nested or concurrent call on the same context fails with
    /// `SessionBusy` without touching the native library.
    pub async fn scoped<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _guard = self.acquire().await?;
        operation.await
    }
}
