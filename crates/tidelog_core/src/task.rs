//! Background maintenance tasks.
//!
//! Compaction and retention run on their own named threads. Each thread
//! holds a [`CancelToken`]; stopping a task cancels the token and joins the
//! thread, so a pass in progress either finishes or aborts before it
//! changes anything visible.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A cancellation signal shared between a task and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every waiter.
    pub fn cancel(&self) {
        let (flag, cv) = &*self.inner;
        *flag.lock() = true;
        cv.notify_all();
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps for `timeout` or until cancelled.
    ///
    /// Returns true if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cv) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if cv.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// A periodically running thread that stops when dropped.
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawns a thread that calls `tick` every `interval` until stopped.
    ///
    /// `tick` receives the task's token so long passes can check for
    /// cancellation between steps.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn_periodic<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut(&CancelToken) + Send + 'static,
    {
        let name = name.into();
        let token = CancelToken::new();
        let thread_token = token.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            while !thread_token.wait_timeout(interval) {
                tick(&thread_token);
            }
        })?;
        debug!(task = %name, ?interval, "background task started");

        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the task and waits for the thread to exit.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(task = %self.name, "background task panicked");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
