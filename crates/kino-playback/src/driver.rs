//! Tokio driver for a [`PlayerSession`]
//!
//! The session itself never sleeps or performs I/O. The driver owns it on a
//! task, applies commands sent through a [`SessionHandle`], runs the manifest
//! loads the session asks for and polls its timers when they fall due.

use crate::clock::{Clock, Scheduled, SharedClock};
use crate::manifest::{ManifestData, ManifestLoader};
use crate::media_sources::ManifestRequest;
use crate::player::{PauseRequest, PlayerSession, SessionEvent};
use crate::strategy::HostEvent;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Commands accepted by a running driver
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    Play,
    Pause(PauseRequest),
    Seek(f64),
    SetPlaybackRate(f64),
    SetSubtitles(bool),
    HostEvent(HostEvent),
    TearDown,
}

/// Wall clock that follows tokio's timer, including paused test time
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch_ms: u64,
    started: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch_ms: u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0),
            started: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}

/// Sending side of a running driver
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Queue a command; fails once the driver has stopped
    pub fn send(&self, command: DriverCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::TornDown)
    }

    pub fn play(&self) -> Result<()> {
        self.send(DriverCommand::Play)
    }

    pub fn pause(&self, request: PauseRequest) -> Result<()> {
        self.send(DriverCommand::Pause(request))
    }

    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.send(DriverCommand::Seek(seconds))
    }

    pub fn host_event(&self, event: impl Into<HostEvent>) -> Result<()> {
        self.send(DriverCommand::HostEvent(event.into()))
    }

    pub fn tear_down(&self) -> Result<()> {
        self.send(DriverCommand::TearDown)
    }

    /// Subscribe to the events of the driven session
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

struct ManifestCompletion {
    generation: u64,
    result: Result<ManifestData>,
}

/// Owns a session and drives it on the tokio runtime
pub struct SessionDriver {
    session: PlayerSession,
    loader: Arc<dyn ManifestLoader>,
    clock: SharedClock,
    manifest_timeout: Duration,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    completions_tx: mpsc::UnboundedSender<ManifestCompletion>,
    completions_rx: mpsc::UnboundedReceiver<ManifestCompletion>,
}

impl SessionDriver {
    /// Wrap `session`; `clock` must be the clock the session was built with
    pub fn new(
        session: PlayerSession,
        loader: Arc<dyn ManifestLoader>,
        clock: SharedClock,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: commands_tx,
            events: session.event_sender(),
        };
        let manifest_timeout = Duration::from_millis(session.config().timeouts.manifest_request_ms);
        let driver = Self {
            session,
            loader,
            clock,
            manifest_timeout,
            commands,
            completions_tx,
            completions_rx,
        };
        (driver, handle)
    }

    /// Run until torn down or every handle is dropped; returns the released session
    #[instrument(skip(self), fields(session = %self.session.id()))]
    pub async fn run(mut self) -> PlayerSession {
        info!("Session driver started");
        self.dispatch_manifest_requests();

        loop {
            let delay = self.next_delay();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(DriverCommand::TearDown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(completion) = self.completions_rx.recv() => {
                    self.session.complete_manifest_load(completion.generation, completion.result);
                }
                _ = tokio::time::sleep(delay.unwrap_or_default()), if delay.is_some() => {
                    self.session.poll_timers();
                }
            }
            self.dispatch_manifest_requests();
        }

        self.session.tear_down();
        info!("Session driver stopped");
        self.session
    }

    fn next_delay(&self) -> Option<Duration> {
        self.session
            .next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(self.clock.now_ms())))
    }

    fn apply(&mut self, command: DriverCommand) {
        debug!(?command, "Applying command");
        let result = match command {
            DriverCommand::Play => self.session.play(),
            DriverCommand::Pause(request) => self.session.pause(request),
            DriverCommand::Seek(seconds) => self.session.set_current_time(seconds),
            DriverCommand::SetPlaybackRate(rate) => self.session.set_playback_rate(rate),
            DriverCommand::SetSubtitles(enabled) => {
                self.session.set_subtitles_enabled(enabled);
                Ok(())
            }
            DriverCommand::HostEvent(event) => {
                self.session.handle_host_event(event);
                Ok(())
            }
            DriverCommand::TearDown => Ok(()),
        };
        if let Err(error) = result {
            warn!(%error, code = error.error_code(), "Command rejected");
        }
    }

    fn dispatch_manifest_requests(&mut self) {
        for request in self.session.take_manifest_requests() {
            self.spawn_load(request);
        }
    }

    fn spawn_load(&self, request: ManifestRequest) {
        let loader = self.loader.clone();
        let completions = self.completions_tx.clone();
        let timeout = self.manifest_timeout;
        debug!(url = %request.url, generation = request.generation, "Loading manifest");

        tokio::spawn(async move {
            let load = loader.load(&request.url, request.options);
            let result = match tokio::time::timeout(timeout, load).await {
                Ok(result) => result,
                Err(_) => Err(Error::ManifestTimeout(request.url.clone())),
            };
            let completion = ManifestCompletion {
                generation: request.generation,
                result,
            };
            if completions.send(completion).is_err() {
                debug!(
                    generation = request.generation,
                    "Driver stopped before the manifest arrived"
                );
            }
        });
    }
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("session", &self.session)
            .field("manifest_timeout", &self.manifest_timeout)
            .finish()
    }
}
