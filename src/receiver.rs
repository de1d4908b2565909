//! Public receiver: start/stop lifecycle, volume and disposal
//!
//! At most one session exists at a time. [`Receiver::start`] takes the start
//! gate and [`Receiver::stop`] gives it back, so a second `start` blocks until
//! the running session is stopped. `stop` only signals the worker; the next
//! `start` joins the retired worker before binding a new socket, so two
//! sessions never hold the port at once.

use parking_lot::{Condvar, Mutex};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use crate::audio::playback::CpalBackend;
use crate::audio::sink::OutputBackend;
use crate::audio::volume::{Volume, VolumeControl};
use crate::config::ReceiverConfig;
use crate::error::{Error, Result};
use crate::network::session::{self, SessionContext, SessionSnapshot, SessionStats};
use crate::network::udp;

/// Binary semaphore held for the lifetime of a session
#[derive(Debug, Default)]
pub struct StartGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl StartGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the gate is free, then take it
    pub fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    /// Take the gate if it is free
    pub fn try_acquire(&self) -> bool {
        let mut held = self.held.lock();
        if *held {
            false
        } else {
            *held = true;
            true
        }
    }

    pub fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

struct ActiveSession {
    id: Uuid,
    /// None when the socket could not be created
    socket: Option<Arc<UdpSocket>>,
    cancel: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
    worker: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn dead(id: Uuid) -> Self {
        Self {
            id,
            socket: None,
            cancel: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(SessionStats::default()),
            worker: None,
        }
    }
}

#[derive(Default)]
struct ControllerState {
    active: Option<ActiveSession>,
    /// Stopped workers that may still be tearing down
    retired: Vec<JoinHandle<()>>,
    disposed: bool,
}

/// Multicast audio receiver
pub struct Receiver {
    config: ReceiverConfig,
    backend: Arc<dyn OutputBackend>,
    volume: Arc<VolumeControl>,
    gate: StartGate,
    state: Mutex<ControllerState>,
}

impl Receiver {
    /// Receiver playing to the configured cpal output device
    pub fn new(config: ReceiverConfig) -> Self {
        let backend = Arc::new(CpalBackend::new(config.playback.device.clone()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: ReceiverConfig, backend: Arc<dyn OutputBackend>) -> Self {
        let initial = Volume::new(config.playback.initial_volume).unwrap_or_default();
        Self {
            config,
            backend,
            volume: Arc::new(VolumeControl::new(initial)),
            gate: StartGate::new(),
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Start receiving and playing. Blocks while another session is running.
    /// Failures are logged; the session slot stays taken until [`stop`](Self::stop).
    pub fn start(&self) {
        if let Err(e) = self.try_start() {
            tracing::error!("Failed to start receiver: {}", e);
        }
    }

    /// Like [`start`](Self::start), but reports socket setup failures.
    ///
    /// Even on error the start gate stays held until `stop`, matching a
    /// session that died on its own.
    pub fn try_start(&self) -> Result<()> {
        if self.state.lock().disposed {
            return Err(Error::Disposed);
        }

        self.gate.acquire();

        // Joined without the state lock so a slow teardown never blocks
        // stop, dispose or the status queries
        let retired = std::mem::take(&mut self.state.lock().retired);
        for worker in retired {
            if worker.join().is_err() {
                tracing::warn!("Previous session worker panicked");
            }
        }

        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            self.gate.release();
            return Err(Error::Disposed);
        }

        let id = Uuid::new_v4();
        let socket = match udp::create_multicast_socket(&self.config.network) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                state.active = Some(ActiveSession::dead(id));
                return Err(e.into());
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SessionStats::default());
        let ctx = SessionContext {
            socket: socket.clone(),
            cancel: cancel.clone(),
            backend: self.backend.clone(),
            volume: self.volume.clone(),
            window: self.config.playback.buffer_window(),
            stats: stats.clone(),
        };

        let span = tracing::info_span!("session", id = %id);
        let spawned = thread::Builder::new()
            .name("multicast-receiver".to_string())
            .spawn(move || {
                let _entered = span.enter();
                session::run(ctx);
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                state.active = Some(ActiveSession::dead(id));
                return Err(e.into());
            }
        };

        tracing::info!(
            "Session {} receiving {}:{} on {}",
            id,
            self.config.network.multicast_group,
            self.config.network.port,
            socket
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        );

        state.active = Some(ActiveSession {
            id,
            socket: Some(socket),
            cancel,
            stats,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Signal the running session to stop and let the next `start` proceed.
    /// Returns without waiting for the worker to finish tearing down.
    pub fn stop(&self) {
        let stopped = Self::retire_active(&mut self.state.lock());
        if let Some(id) = stopped {
            self.gate.release();
            tracing::info!("Session {} stopping", id);
        }
    }

    /// Stop any session, wait for all workers and refuse further starts.
    /// Safe to call at any time, more than once.
    pub fn dispose(&self) {
        // Marked under the same lock that retires the session, so a start
        // waiting on the gate backs off once it is released
        let (stopped, retired) = {
            let mut state = self.state.lock();
            state.disposed = true;
            let stopped = Self::retire_active(&mut state);
            (stopped, std::mem::take(&mut state.retired))
        };
        if let Some(id) = stopped {
            self.gate.release();
            tracing::info!("Session {} stopping", id);
        }
        for worker in retired {
            let _ = worker.join();
        }

        // A start may still be joining workers it took before we got here
        self.gate.acquire();
        self.gate.release();
    }

    /// Cancel and wake the active session and retire its worker. The caller
    /// releases the gate after dropping the state lock.
    fn retire_active(state: &mut ControllerState) -> Option<Uuid> {
        let session = state.active.take()?;

        session.cancel.store(true, Ordering::Release);
        if let Some(socket) = &session.socket {
            udp::wake(socket);
        }
        if let Some(worker) = session.worker {
            state.retired.push(worker);
        }
        Some(session.id)
    }

    /// Current volume, `0..=100`, also before any session has started
    pub fn volume(&self) -> u8 {
        self.volume.get().level()
    }

    /// Set the volume; takes effect on the live output's next buffer.
    /// Values outside `0..=100` are rejected and change nothing.
    pub fn set_volume(&self, value: i32) -> Result<()> {
        let volume = Volume::try_from(value)?;
        self.volume.set(volume);
        Ok(())
    }

    /// Whether a session holds the start gate
    pub fn is_active(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Whether the current session's worker is still running
    pub fn is_receiving(&self) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .and_then(|session| session.worker.as_ref())
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn stats(&self) -> Option<SessionSnapshot> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|session| session.stats.snapshot())
    }

    /// Address the current session's socket is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .active
            .as_ref()
            .and_then(|session| session.socket.as_ref())
            .and_then(|socket| socket.local_addr().ok())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.dispose();
    }
}
