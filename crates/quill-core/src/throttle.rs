//! Auto-save throttle.
//!
//! A throttle, not a debounce: while edits keep arriving, the latest content
//! is flushed at least once per interval. Must be used inside a tokio
//! runtime; trailing flushes run on a spawned timer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;

type FlushSink<T> = Arc<dyn Fn(T) -> Result<()> + Send + Sync>;

struct ThrottleState<T> {
    pending: Option<T>,
    last_flush: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

pub struct AutoSaveThrottle<T> {
    state: Arc<Mutex<ThrottleState<T>>>,
    /// Held for the whole take-and-deliver step so flushes never overlap
    delivering: Arc<Mutex<()>>,
    sink: FlushSink<T>,
    interval: Duration,
}

impl<T: Send + 'static> AutoSaveThrottle<T> {
    /// `sink` receives flushed content; its errors are logged and dropped
    pub fn new(interval: Duration, sink: impl Fn(T) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(ThrottleState {
                pending: None,
                last_flush: None,
                timer: None,
            })),
            delivering: Arc::new(Mutex::new(())),
            sink: Arc::new(sink),
            interval,
        }
    }

    /// Buffer the latest content and flush now or schedule a flush
    pub fn edit(&self, content: T) {
        let now = Instant::now();
        let mut state = lock(&self.state);
        state.pending = Some(content);

        let since_flush = state.last_flush.map(|at| now.saturating_duration_since(at));
        match since_flush {
            Some(elapsed) if elapsed < self.interval => {
                if state.timer.is_none() {
                    let delay = self.interval - elapsed;
                    let shared = Arc::clone(&self.state);
                    let delivering = Arc::clone(&self.delivering);
                    let sink = Arc::clone(&self.sink);
                    state.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _delivering = hold(&delivering);
                        let content = {
                            let mut state = lock(&shared);
                            state.timer = None;
                            take_pending(&mut state)
                        };
                        if let Some(content) = content {
                            deliver(&sink, content);
                        }
                    }));
                }
            }
            _ => {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                drop(state);
                self.flush_pending();
            }
        }
    }

    /// Flush whatever is buffered and cancel the scheduled flush.
    ///
    /// Once this returns no timer flush is left outstanding and no delivery
    /// is still running.
    pub async fn force_flush(&self) {
        let timer = lock(&self.state).timer.take();
        if let Some(timer) = timer {
            timer.abort();
            let _ = timer.await;
        }
        self.flush_pending();
    }

    fn flush_pending(&self) {
        let _delivering = hold(&self.delivering);
        let content = take_pending(&mut lock(&self.state));
        if let Some(content) = content {
            deliver(&self.sink, content);
        }
    }

    /// Whether content is waiting for a flush
    pub fn has_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }
}

fn lock<T>(state: &Mutex<ThrottleState<T>>) -> MutexGuard<'_, ThrottleState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hold(delivering: &Mutex<()>) -> MutexGuard<'_, ()> {
    delivering.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_pending<T>(state: &mut ThrottleState<T>) -> Option<T> {
    let content = state.pending.take()?;
    state.last_flush = Some(Instant::now());
    Some(content)
}

fn deliver<T>(sink: &FlushSink<T>, content: T) {
    if let Err(error) = sink(content) {
        tracing::error!("Auto-save flush failed: {}", error);
    }
}
