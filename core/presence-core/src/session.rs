//! The presence session: public handle plus the background worker that owns
//! the IPC channel.
//!
//! Public operations never touch the socket. They update the shared state under
//! one lock, leave an [`Outbound`] command in the single pending slot, and wake
//! the worker. A newer command replaces an unsent one, so nothing piles up
//! while the desktop app is away. The worker is
//! the only code that opens, writes, reads, or closes the channel, so there is
//! never more than one writer per connection.
//!
//! ```text
//!   caller threads                     worker thread
//!   ──────────────                     ─────────────
//!   update/pause/resume ──► pending ─► tick(): connect ─► handshake ─► send activity
//!                           Condvar        │  send pending, keep-alive, probe
//!   stop ──► running=false ─────────────►  └─ exit: clear activity, close channel
//! ```
//!
//! Transport, protocol, and transmit failures stay inside the worker. They are
//! handed to the [`DiagnosticsSink`] and answered with a reconnect after the
//! backoff interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use presence_protocol::{CloseEvent, CommandFrame, EventFrame, Opcode};

use crate::activity::{to_wire, to_wire_clear, Activity, ActivityUpdate};
use crate::channel::FramedChannel;
use crate::clock::{Clock, SystemClock};
use crate::config::{PresenceConfig, SessionTiming};
use crate::diagnostics::{Diagnostic, DiagnosticsSink, Phase, TracingSink};
use crate::error::{PresenceError, Result};
use crate::handshake::handshake;
use crate::transport::{platform_transport, Transport};

const WORKER_THREAD_NAME: &str = "presence-session";
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Work left for the worker by the public operations.
#[derive(Debug, Clone, PartialEq)]
enum Outbound {
    Push(Activity),
    Clear,
}

#[derive(Debug, Default)]
struct SessionState {
    running: bool,
    paused: bool,
    /// Bumped by every `start()`; a worker from an older run exits on mismatch.
    generation: u64,
    activity: Option<Activity>,
    /// Latest unsent command; replaced, never appended to.
    pending: Option<Outbound>,
}

struct Shared {
    state: Mutex<SessionState>,
    wake: Condvar,
    /// Mirror of `SessionState::paused` for lock-free reads.
    paused: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            wake: Condvar::new(),
            paused: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleeps up to `timeout` for worker `generation`.
    ///
    /// Always returns early on stop. With `wake_on_work` it also returns as
    /// soon as a command is pending. Returns whether the worker should go on.
    fn wait(&self, generation: u64, timeout: Duration, wake_on_work: bool) -> bool {
        let guard = self.lock();
        let (state, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |state| {
                state.running
                    && state.generation == generation
                    && !(wake_on_work && state.pending.is_some())
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.running && state.generation == generation
    }
}

/// A rich-presence session with the local desktop app.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and is safe to
/// call from any thread. Dropping the session stops it.
pub struct PresenceSession {
    shared: Arc<Shared>,
    config: Arc<PresenceConfig>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn DiagnosticsSink>,
    timing: SessionTiming,
    pid: u32,
    /// Held across the whole of `start` and the reset half of `stop`, so a
    /// stop never takes the handle of a worker started after it.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceSession {
    /// Session on the platform transport with default timing.
    ///
    /// Fails with [`PresenceError::ConfigurationMissing`] when the config has
    /// no client id.
    pub fn new(config: PresenceConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: PresenceConfig) -> PresenceSessionBuilder {
        PresenceSessionBuilder::new(config)
    }

    /// Launches the worker. No-op while already running.
    pub fn start(&self) {
        let mut slot = self.lock_worker();
        let Some(generation) = self.begin() else {
            tracing::debug!("Presence session already running");
            return;
        };

        let worker = self.new_worker(generation);
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                tracing::info!(
                    transport = self.transport.name(),
                    generation,
                    "Presence session started"
                );
                // Only a worker that stop() detached can be left here, and it
                // has already seen its generation end.
                drop(slot.replace(handle));
            }
            Err(source) => {
                let error = PresenceError::Io {
                    context: "spawning presence worker".to_string(),
                    source,
                };
                self.sink.report(&Diagnostic {
                    phase: Phase::Spawn,
                    error: &error,
                });
                self.reset_state();
            }
        }
    }

    /// Stops the worker, hides the presence, and closes the channel.
    ///
    /// Waits for the worker to exit, at most [`SessionTiming::stop_grace`].
    /// A worker still blocked in I/O after that is detached; it exits on its
    /// own once the I/O returns. Safe to call repeatedly, before any `start()`,
    /// concurrently with `start()`, and from the worker thread (which is then
    /// not joined).
    pub fn stop(&self) {
        let handle = {
            let mut slot = self.lock_worker();
            if self.reset_state() {
                tracing::info!("Presence session stopping");
            }
            self.shared.wake.notify_all();
            slot.take()
        };
        if let Some(handle) = handle {
            self.join_worker(handle);
        }
    }

    /// Hides the presence but keeps the connection. No-op unless running and
    /// not already paused.
    pub fn pause(&self) {
        {
            let mut state = self.shared.lock();
            if !state.running || state.paused {
                return;
            }
            state.paused = true;
            self.shared.paused.store(true, Ordering::SeqCst);
            state.pending = Some(Outbound::Clear);
        }
        tracing::debug!("Presence paused");
        self.shared.wake.notify_all();
    }

    /// Shows the last known activity again. No-op unless running and paused.
    pub fn resume(&self) {
        {
            let mut state = self.shared.lock();
            if !state.running || !state.paused {
                return;
            }
            state.paused = false;
            self.shared.paused.store(false, Ordering::SeqCst);
            state.pending = state.activity.clone().map(Outbound::Push);
        }
        tracing::debug!("Presence resumed");
        self.shared.wake.notify_all();
    }

    /// Merges `update` into the current activity and, unless paused, marks it
    /// for transmission. Ignored while stopped.
    pub fn update(&self, update: ActivityUpdate) {
        {
            let mut state = self.shared.lock();
            if !state.running {
                tracing::debug!("Ignoring activity update on stopped session");
                return;
            }
            let Some(current) = state.activity.as_ref() else {
                return;
            };
            let merged = current.merge(&update);
            state.activity = Some(merged.clone());
            if !state.paused {
                state.pending = Some(Outbound::Push(merged));
            }
        }
        self.shared.wake.notify_all();
    }

    /// Lock-free; may briefly lag a concurrent `pause`/`resume`.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Current activity; `None` while stopped.
    pub fn activity(&self) -> Option<Activity> {
        self.shared.lock().activity.clone()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Marks the session running and returns the new worker generation, or
    /// `None` if it already was.
    fn begin(&self) -> Option<u64> {
        let mut state = self.shared.lock();
        if state.running {
            return None;
        }
        state.running = true;
        state.paused = false;
        state.generation += 1;
        state.activity = Some(Activity::from_config(
            &self.config,
            self.clock.unix_timestamp(),
        ));
        state.pending = None;
        self.shared.paused.store(false, Ordering::SeqCst);
        Some(state.generation)
    }

    /// Returns whether the session was running.
    fn reset_state(&self) -> bool {
        let mut state = self.shared.lock();
        let was_running = state.running;
        state.running = false;
        state.paused = false;
        state.activity = None;
        state.pending = None;
        self.shared.paused.store(false, Ordering::SeqCst);
        was_running
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn join_worker(&self, handle: JoinHandle<()>) {
        if handle.thread().id() == thread::current().id() {
            return;
        }
        let deadline = Instant::now() + self.timing.stop_grace();
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    grace_ms = self.timing.stop_grace().as_millis() as u64,
                    "Presence worker still blocked in I/O; detaching it"
                );
                return;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if handle.join().is_err() {
            tracing::warn!("Presence worker panicked before shutdown");
        }
    }

    fn new_worker(&self, generation: u64) -> Worker {
        Worker {
            shared: Arc::clone(&self.shared),
            client_id: self.config.client_id.clone(),
            transport: Arc::clone(&self.transport),
            clock: Arc::clone(&self.clock),
            sink: Arc::clone(&self.sink),
            timing: self.timing,
            pid: self.pid,
            generation,
            channel: None,
            last_keepalive: Duration::ZERO,
        }
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct PresenceSessionBuilder {
    config: PresenceConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn DiagnosticsSink>,
    timing: SessionTiming,
    pid: u32,
}

impl PresenceSessionBuilder {
    fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            transport: None,
            clock: Arc::new(SystemClock::new()),
            sink: Arc::new(TracingSink),
            timing: SessionTiming::default(),
            pid: std::process::id(),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Process id reported in `SET_ACTIVITY`. Defaults to this process.
    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn build(self) -> Result<PresenceSession> {
        self.config.validate()?;
        let transport = self.transport.unwrap_or_else(platform_transport);
        tracing::debug!(transport = transport.name(), "Presence transport selected");

        Ok(PresenceSession {
            shared: Arc::new(Shared::new()),
            config: Arc::new(self.config),
            transport,
            clock: self.clock,
            sink: self.sink,
            timing: self.timing,
            pid: self.pid,
            worker: Mutex::new(None),
        })
    }
}

/// What the worker does after one `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Connected (or just sent); wait one tick, waking early for pending work.
    Idle(Duration),
    /// Not connected; wait out the backoff, waking early only for stop.
    Backoff(Duration),
    Exit,
}

struct Worker {
    shared: Arc<Shared>,
    client_id: String,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn DiagnosticsSink>,
    timing: SessionTiming,
    pid: u32,
    generation: u64,
    channel: Option<FramedChannel>,
    last_keepalive: Duration,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!(generation = self.generation, "Presence worker running");
        loop {
            let (timeout, wake_on_work) = match self.tick() {
                Step::Idle(timeout) => (timeout, true),
                Step::Backoff(timeout) => (timeout, false),
                Step::Exit => break,
            };
            if !self.shared.wait(self.generation, timeout, wake_on_work) {
                break;
            }
        }
        self.shutdown();
        tracing::debug!(generation = self.generation, "Presence worker exited");
    }

    fn tick(&mut self) -> Step {
        if !self.is_current() {
            return Step::Exit;
        }
        if self.channel.is_none() {
            return self.connect();
        }

        let (paused, pending) = {
            let mut state = self.shared.lock();
            if !state.running || state.generation != self.generation {
                return Step::Exit;
            }
            (state.paused, state.pending.take())
        };

        if let Some(outbound) = pending {
            let sent = match &outbound {
                Outbound::Push(activity) => self.send_activity(activity),
                Outbound::Clear => self.send_clear(),
            };
            if let Some(step) = self.settle(Phase::Transmit, sent) {
                return step;
            }
        }

        let now = self.clock.now();
        if !paused && now.saturating_sub(self.last_keepalive) >= self.timing.keepalive_interval {
            let sent = self.send_command(&CommandFrame::ping());
            if let Some(step) = self.settle(Phase::Transmit, sent) {
                return step;
            }
            self.last_keepalive = now;
            tracing::trace!("Presence keep-alive sent");
        }

        let probed = self.probe();
        if let Some(step) = self.settle(Phase::Probe, probed) {
            return step;
        }
        Step::Idle(self.timing.tick)
    }

    fn connect(&mut self) -> Step {
        let mut channel = match FramedChannel::connect_first(self.transport.as_ref()) {
            Ok(channel) => channel,
            Err(err) => {
                self.report(Phase::Connect, &err);
                return Step::Backoff(self.timing.reconnect_backoff);
            }
        };
        if let Err(err) = channel.set_write_timeout(Some(self.timing.write_timeout)) {
            tracing::debug!(
                endpoint = %channel.endpoint(),
                error = %err,
                "Transport has no write deadline"
            );
        }
        if let Err(err) = handshake(&mut channel, &self.client_id, self.timing.handshake_timeout) {
            self.report(Phase::Handshake, &err);
            channel.close();
            return Step::Backoff(self.timing.reconnect_backoff);
        }
        tracing::info!(endpoint = %channel.endpoint(), "Connected to presence endpoint");

        self.channel = Some(channel);
        self.last_keepalive = self.clock.now();

        // A command left pending before the connection is superseded by the
        // current activity.
        let (paused, activity) = {
            let mut state = self.shared.lock();
            if !state.running || state.generation != self.generation {
                return Step::Exit;
            }
            state.pending = None;
            (state.paused, state.activity.clone())
        };

        if let (false, Some(activity)) = (paused, activity) {
            let sent = self.send_activity(&activity);
            if let Some(step) = self.settle(Phase::Transmit, sent) {
                return step;
            }
        }
        Step::Idle(self.timing.tick)
    }

    /// Reads whatever the remote has sent since the last tick.
    ///
    /// Responses are discarded. End of stream or a close frame means the
    /// connection is gone.
    fn probe(&mut self) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };
        for frame in channel.drain()? {
            match frame.opcode {
                Opcode::Close => {
                    let close: CloseEvent = frame.parse().unwrap_or_default();
                    return Err(PresenceError::RemoteClosed {
                        code: close.code,
                        message: close.message,
                    });
                }
                Opcode::Ping => channel.send(Opcode::Pong, &frame.payload)?,
                Opcode::Frame => match frame.parse::<EventFrame>() {
                    Ok(event) if event.is_error() => {
                        tracing::debug!(data = %event.data, "Presence command rejected");
                    }
                    Ok(event) => {
                        tracing::trace!(cmd = ?event.cmd, evt = ?event.evt, "Presence response");
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "Undecodable presence response");
                    }
                },
                Opcode::Handshake | Opcode::Pong => {}
            }
        }
        Ok(())
    }

    fn send_activity(&mut self, activity: &Activity) -> Result<()> {
        self.send_command(&to_wire(activity, self.pid))
    }

    fn send_clear(&mut self) -> Result<()> {
        self.send_command(&to_wire_clear(self.pid))
    }

    fn send_command<T: serde::Serialize>(&mut self, command: &T) -> Result<()> {
        match self.channel.as_mut() {
            Some(channel) => channel.send_json(Opcode::Frame, command),
            None => Ok(()),
        }
    }

    /// Connection losses drop the channel and back off. Anything else is
    /// reported and the tick carries on with the channel intact.
    fn settle(&mut self, phase: Phase, result: Result<()>) -> Option<Step> {
        match result {
            Ok(()) => None,
            Err(err) if err.is_connection_loss() => Some(self.lose_channel(phase, &err)),
            Err(err) => {
                self.report(phase, &err);
                None
            }
        }
    }

    fn lose_channel(&mut self, phase: Phase, error: &PresenceError) -> Step {
        self.report(phase, error);
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        Step::Backoff(self.timing.reconnect_backoff)
    }

    /// Best-effort: hide the presence, then close.
    fn shutdown(&mut self) {
        if let Err(err) = self.send_clear() {
            self.report(Phase::Transmit, &err);
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn is_current(&self) -> bool {
        let state = self.shared.lock();
        state.running && state.generation == self.generation
    }

    fn report(&self, phase: Phase, error: &PresenceError) {
        self.sink.report(&Diagnostic { phase, error });
    }
}
