//! Edge event sessions and backend selection
//!
//! Each pin opened for events gets one session, shared by every waiter and
//! callback on that pin. A session owns a watcher thread that pulls edges
//! from the backend line, marks bounces, runs callbacks and wakes waiters.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::edge::{CallbackId, CancelToken, Edge, EdgeCallback, EdgeEvent, EdgeMask, WaitResult};
use super::native::NativeProvider;
use super::sysfs::SysfsProvider;
use crate::config::{BackendPreference, GpioConfig};
use crate::error::{GpioError, GpioResult};
use crate::timer;

/// How long a watcher blocks on its line before re-checking for shutdown
const POLL_SLICE: Duration = Duration::from_millis(50);
/// How often a blocked waiter re-checks its cancel token
const CANCEL_SLICE: Duration = Duration::from_millis(10);

/// A single GPIO line delivering edges
pub trait EdgeLine: Send {
    /// Block up to `timeout` for the next edge; `Ok(None)` on timeout
    fn next_edge(&mut self, timeout: Duration) -> GpioResult<Option<Edge>>;
}

/// Backend that can open GPIO lines for edge delivery
pub trait EdgeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_line(&self, pin: u8) -> GpioResult<Box<dyn EdgeLine>>;
}

// ============================================================================
// Per-pin session
// ============================================================================

struct SessionState {
    seq: u64,
    /// Sequence number of the latest edge of each direction; 0 before any
    last_rising_seq: u64,
    last_falling_seq: u64,
    last_clean_ms: Option<f64>,
    callbacks: Vec<(CallbackId, EdgeMask, EdgeCallback)>,
    failure: Option<String>,
    closed: bool,
}

impl SessionState {
    /// Edges in `mask` published after sequence number `seen`
    fn edges_since(&self, seen: u64, mask: EdgeMask) -> EdgeMask {
        let mut edges = EdgeMask::NONE;
        if mask.contains(Edge::Rising) && self.last_rising_seq > seen {
            edges = edges | EdgeMask::RISING;
        }
        if mask.contains(Edge::Falling) && self.last_falling_seq > seen {
            edges = edges | EdgeMask::FALLING;
        }
        edges
    }
}

struct PinSession {
    pin: u8,
    bounce_delay_ms: f64,
    state: Mutex<SessionState>,
    changed: Condvar,
    stop: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl PinSession {
    fn start(pin: u8, line: Box<dyn EdgeLine>, bounce_delay_ms: f64) -> GpioResult<Arc<Self>> {
        let session = Arc::new(Self {
            pin,
            bounce_delay_ms,
            state: Mutex::new(SessionState {
                seq: 0,
                last_rising_seq: 0,
                last_falling_seq: 0,
                last_clean_ms: None,
                callbacks: Vec::new(),
                failure: None,
                closed: false,
            }),
            changed: Condvar::new(),
            stop: AtomicBool::new(false),
            watcher: Mutex::new(None),
        });

        let worker = Arc::clone(&session);
        let handle = thread::Builder::new()
            .name(format!("gpio{}-edges", pin))
            .spawn(move || worker.watch(line))?;
        *session
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(session)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watch(&self, mut line: Box<dyn EdgeLine>) {
        debug!("Edge watcher for GPIO {} started", self.pin);
        while !self.stop.load(Ordering::SeqCst) {
            match line.next_edge(POLL_SLICE) {
                Ok(Some(edge)) => self.publish(edge),
                Ok(None) => {}
                Err(e) => {
                    error!("Edge watcher for GPIO {} failed: {}", self.pin, e);
                    self.lock().failure = Some(e.to_string());
                    self.changed.notify_all();
                    return;
                }
            }
        }
        debug!("Edge watcher for GPIO {} stopped", self.pin);
    }

    fn publish(&self, edge: Edge) {
        let now = timer::now();
        let mut state = self.lock();

        let bounced = match state.last_clean_ms {
            Some(last) if now - last < self.bounce_delay_ms => true,
            _ => {
                state.last_clean_ms = Some(now);
                false
            }
        };
        let event = EdgeEvent {
            pin: self.pin,
            edge,
            bounced,
            timestamp_ms: now,
        };

        state.seq += 1;
        let seq = state.seq;
        match edge {
            Edge::Rising => state.last_rising_seq = seq,
            Edge::Falling => state.last_falling_seq = seq,
        }

        let callbacks: Vec<EdgeCallback> = state
            .callbacks
            .iter()
            .filter(|(_, mask, _)| mask.contains(edge))
            .map(|(_, _, callback)| Arc::clone(callback))
            .collect();
        drop(state);
        self.changed.notify_all();

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!("Edge callback for GPIO {} panicked", self.pin);
            }
        }
    }

    fn wait(
        &self,
        mask: EdgeMask,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> GpioResult<WaitResult> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.lock();
        let seen = state.seq;

        loop {
            let edges = state.edges_since(seen, mask);
            if !edges.is_empty() {
                return Ok(WaitResult {
                    timed_out: false,
                    edges,
                });
            }

            if state.closed {
                return Err(GpioError::PinNotOpen(self.pin));
            }
            if let Some(reason) = &state.failure {
                return Err(GpioError::EventBackend(reason.clone()));
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Ok(WaitResult::timeout());
            }

            let slice = match (timeout, deadline) {
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(WaitResult::timeout());
                    }
                    (deadline - now).min(CANCEL_SLICE)
                }
                _ => CANCEL_SLICE,
            };
            state = self
                .changed
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn add_callback(&self, id: CallbackId, mask: EdgeMask, callback: EdgeCallback) {
        self.lock().callbacks.push((id, mask, callback));
    }

    fn remove_callback(&self, id: CallbackId) -> bool {
        let mut state = self.lock();
        let before = state.callbacks.len();
        state.callbacks.retain(|(existing, _, _)| *existing != id);
        state.callbacks.len() != before
    }

    fn remove_all_callbacks(&self) -> usize {
        let mut state = self.lock();
        let removed = state.callbacks.len();
        state.callbacks.clear();
        removed
    }

    fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.lock().closed = true;
        self.changed.notify_all();

        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // A callback closing its own pin runs on the watcher thread.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Edge watcher for GPIO {} panicked", self.pin);
            }
        }
    }
}

// ============================================================================
// Interrupt source
// ============================================================================

/// Edge notification over one selected backend
pub struct InterruptSource {
    provider: Box<dyn EdgeProvider>,
    bounce_delay_ms: f64,
    sessions: Mutex<HashMap<u8, Arc<PinSession>>>,
    next_callback: AtomicU64,
}

impl InterruptSource {
    pub fn new(provider: Box<dyn EdgeProvider>, bounce_delay_ms: f64) -> Self {
        Self {
            provider,
            bounce_delay_ms,
            sessions: Mutex::new(HashMap::new()),
            next_callback: AtomicU64::new(1),
        }
    }

    /// Construct the configured backend
    ///
    /// With `Auto`, the native character device is tried first and sysfs
    /// polling is used only if the native facility is unsupported. Any other
    /// native failure is returned.
    pub fn select(config: &GpioConfig) -> GpioResult<Self> {
        let provider = Self::construct(config).map_err(|e| match e {
            GpioError::EventBackendUnavailable(reason) => {
                GpioError::EventBackend(format!("no edge event backend available: {}", reason))
            }
            other => other,
        })?;
        info!("Edge events via {} backend", provider.name());
        Ok(Self::new(provider, config.bounce_delay_ms))
    }

    fn construct(config: &GpioConfig) -> GpioResult<Box<dyn EdgeProvider>> {
        match config.event_backend {
            BackendPreference::Native => Ok(Box::new(NativeProvider::open(config)?)),
            BackendPreference::Polling => Ok(Box::new(SysfsProvider::open(config)?)),
            BackendPreference::Auto => match NativeProvider::open(config) {
                Ok(native) => Ok(Box::new(native)),
                Err(GpioError::EventBackendUnavailable(reason)) => {
                    debug!("Native edge events unavailable: {}", reason);
                    Ok(Box::new(SysfsProvider::open(config)?))
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Name of the backend in use
    pub fn backend(&self) -> &'static str {
        self.provider.name()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u8, Arc<PinSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, pin: u8) -> GpioResult<Arc<PinSession>> {
        self.sessions()
            .get(&pin)
            .cloned()
            .ok_or(GpioError::PinNotOpen(pin))
    }

    /// Start delivering edges for a pin; a no-op if already open
    pub fn open_pin(&self, pin: u8) -> GpioResult<()> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&pin) {
            return Ok(());
        }
        let line = self.provider.open_line(pin)?;
        let session = PinSession::start(pin, line, self.bounce_delay_ms)?;
        sessions.insert(pin, session);
        debug!("GPIO {} opened for edge events ({})", pin, self.provider.name());
        Ok(())
    }

    /// Stop the pin's session, failing its pending waits with `PinNotOpen`
    pub fn close_pin(&self, pin: u8) -> bool {
        let session = self.sessions().remove(&pin);
        match session {
            Some(session) => {
                session.shutdown();
                debug!("GPIO {} closed for edge events", pin);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, pin: u8) -> bool {
        self.sessions().contains_key(&pin)
    }

    /// Block until an edge in `mask` occurs, the timeout passes or `cancel`
    /// is set. `None` waits indefinitely.
    pub fn wait(
        &self,
        pin: u8,
        mask: EdgeMask,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> GpioResult<WaitResult> {
        self.session(pin)?.wait(mask, timeout, cancel)
    }

    /// `wait` on tokio's blocking pool
    ///
    /// Dropping the future does not stop the blocking wait; cancel the
    /// token to end it early.
    pub async fn wait_async(
        self: Arc<Self>,
        pin: u8,
        mask: EdgeMask,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> GpioResult<WaitResult> {
        tokio::task::spawn_blocking(move || self.wait(pin, mask, timeout, Some(&cancel)))
            .await
            .map_err(|e| GpioError::EventBackend(format!("edge wait task failed: {}", e)))?
    }

    /// Register a callback for edges in `mask`
    pub fn add_callback(
        &self,
        pin: u8,
        mask: EdgeMask,
        callback: EdgeCallback,
    ) -> GpioResult<CallbackId> {
        let session = self.session(pin)?;
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::SeqCst));
        session.add_callback(id, mask, callback);
        Ok(id)
    }

    /// Remove a callback; false if it was not registered on this pin
    pub fn remove_callback(&self, pin: u8, id: CallbackId) -> GpioResult<bool> {
        Ok(self.session(pin)?.remove_callback(id))
    }

    /// Detach every callback on a pin; returns how many were registered
    pub fn remove_all_callbacks(&self, pin: u8) -> GpioResult<usize> {
        Ok(self.session(pin)?.remove_all_callbacks())
    }
}

impl Drop for InterruptSource {
    fn drop(&mut self) {
        let sessions: Vec<Arc<PinSession>> = self.sessions().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown();
        }
    }
}
