use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::sleep;

use crate::config::ConnectionSettings;
use crate::desk::{DeskCommand, DeskEvent, DeskLink, DeskLinkFactory, DiscoveredDesk, EventSink, Preset};
use crate::error::{DeskError, Result};
use crate::units::to_inches;

/// Connection state of a desk session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Last known state of a desk, replaced wholesale on every update
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeskSnapshot {
    pub connected: bool,
    pub height_mm: Option<u16>,
    pub height_in: Option<f64>,
    pub moving: bool,
}

type LinkSlot = Option<Box<dyn DeskLink>>;

/// Owns the connection to one desk and republishes its state to subscribers.
///
/// Cheaply cloneable. At most one link is alive at a time; a stale link is
/// closed before a new one is opened.
#[derive(Clone)]
pub struct DeskCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for DeskCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeskCoordinator")
            .field("desk", &self.inner.desk)
            .field("state", &self.state())
            .finish()
    }
}

struct Inner {
    desk: DiscoveredDesk,
    factory: Arc<dyn DeskLinkFactory>,
    settings: ConnectionSettings,
    state: watch::Sender<SessionState>,
    snapshot: watch::Sender<DeskSnapshot>,
    link: Mutex<LinkSlot>,
    /// Bumped on every connect and disconnect; events from older links are dropped
    session: AtomicU64,
    settle_generation: AtomicU64,
}

impl DeskCoordinator {
    pub fn new(
        desk: DiscoveredDesk,
        factory: Arc<dyn DeskLinkFactory>,
        settings: ConnectionSettings,
    ) -> Self {
        log::debug!("Initializing coordinator for desk {}", desk);
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (snapshot, _) = watch::channel(DeskSnapshot::default());

        Self {
            inner: Arc::new(Inner {
                desk,
                factory,
                settings,
                state,
                snapshot,
                link: Mutex::new(None),
                session: AtomicU64::new(0),
                settle_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn desk(&self) -> &DiscoveredDesk {
        &self.inner.desk
    }

    pub fn desk_address(&self) -> &str {
        &self.inner.desk.address
    }

    pub fn desk_name(&self) -> &str {
        &self.inner.desk.name
    }

    /// "name - address", for logs
    pub fn desk_info(&self) -> String {
        self.inner.desk.to_string()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn snapshot(&self) -> DeskSnapshot {
        *self.inner.snapshot.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeskSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Connect to the desk unless a live connection already exists
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.inner.link.lock().await;

        if let Some(link) = slot.as_ref() {
            if self.is_connected() && link.is_connected().await {
                log::debug!("Using existing connection to {}", self.inner.desk);
                return Ok(());
            }
        }
        if let Some(stale) = slot.take() {
            log::warn!("Discarding stale connection to {}", self.inner.desk);
            let _ = self.inner.release(stale).await;
        }

        log::info!("Connecting to desk {}", self.inner.desk);
        self.inner.state.send_replace(SessionState::Connecting);
        // Heights from an earlier session say nothing about motion in this one
        self.inner.settle_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.snapshot.send_modify(|s| {
            s.height_mm = None;
            s.height_in = None;
            s.moving = false;
        });
        let session = self.inner.session.fetch_add(1, Ordering::SeqCst) + 1;

        match self.open_with_retries(session).await {
            Ok(link) => {
                *slot = Some(link);
                self.inner.state.send_replace(SessionState::Connected);
                self.inner.snapshot.send_modify(|s| s.connected = true);
                log::info!("Desk {} connected", self.inner.desk);
                Ok(())
            }
            Err(e) => {
                self.inner.state.send_replace(SessionState::Disconnected);
                self.inner.snapshot.send_modify(|s| {
                    s.connected = false;
                    s.moving = false;
                });
                Err(e)
            }
        }
    }

    /// Same as [`connect`](Self::connect); reads better at call sites about to issue a command
    pub async fn ensure_connected(&self) -> Result<()> {
        self.connect().await
    }

    async fn open_with_retries(&self, session: u64) -> Result<Box<dyn DeskLink>> {
        let max_attempts = self.inner.settings.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                log::info!("Connection retry attempt {} of {}", attempt, max_attempts);
                sleep(self.inner.settings.retry_delay()).await;
            }

            match self.open_once(session).await {
                Ok(link) => {
                    log::debug!("Connected on attempt {}", attempt);
                    return Ok(link);
                }
                Err(e) if !e.is_retryable() => {
                    log::error!("Connecting to {} failed: {}", self.inner.desk, e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }
        }

        Err(DeskError::ConnectFailed {
            attempts: max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| DeskError::Link("no connection attempt made".into())),
            ),
        })
    }

    async fn open_once(&self, session: u64) -> Result<Box<dyn DeskLink>> {
        let link = self
            .inner
            .factory
            .open(&self.inner.desk, self.event_sink(session))
            .await?;

        if let Err(e) = link.validate().await {
            let _ = self.inner.release(link).await;
            return Err(e);
        }
        Ok(link)
    }

    fn event_sink(&self, session: u64) -> EventSink {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |event: DeskEvent| {
            if let Some(inner) = inner.upgrade() {
                inner.handle_event(session, event);
            }
        })
    }

    /// Close the connection. The session is disconnected afterwards even if closing fails.
    pub async fn disconnect(&self) -> Result<()> {
        let mut slot = self.inner.link.lock().await;
        let link = slot.take();
        self.inner.session.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_disconnected();

        match link {
            Some(link) => {
                log::info!("Disconnecting from desk {}", self.inner.desk);
                self.inner.release(link).await
            }
            None => Ok(()),
        }
    }

    /// Lock the link slot, failing fast unless the session is connected and the link is alive
    async fn live_link(&self) -> Result<MutexGuard<'_, LinkSlot>> {
        if !self.is_connected() {
            return Err(DeskError::NotConnected);
        }

        let mut slot = self.inner.link.lock().await;
        let alive = match slot.as_ref() {
            Some(link) => link.is_connected().await,
            None => false,
        };
        if !alive {
            log::warn!("Connection to {} was lost", self.inner.desk);
            self.inner.session.fetch_add(1, Ordering::SeqCst);
            self.inner.mark_disconnected();
            if let Some(dead) = slot.take() {
                let _ = self.inner.release(dead).await;
            }
            return Err(DeskError::NotConnected);
        }
        Ok(slot)
    }

    /// Send the wake command
    pub async fn wake(&self) -> Result<()> {
        let slot = self.live_link().await?;
        let link = slot.as_deref().ok_or(DeskError::NotConnected)?;
        link.send(DeskCommand::Wake).await
    }

    async fn wake_if_needed(&self, link: &dyn DeskLink) -> Result<()> {
        if self.inner.settings.wake_before_command {
            link.send(DeskCommand::Wake).await?;
        }
        Ok(())
    }

    /// Ask the desk for its height, publish it and return it in inches
    pub async fn read_height(&self) -> Result<f64> {
        let slot = self.live_link().await?;
        let link = slot.as_deref().ok_or(DeskError::NotConnected)?;

        self.wake_if_needed(link).await?;
        let height_mm = link.request_height().await?;
        log::debug!("{} - Height: {}mm", self.inner.desk.address, height_mm);

        self.inner.snapshot.send_modify(|s| {
            s.height_mm = Some(height_mm);
            s.height_in = Some(to_inches(height_mm));
        });
        Ok(to_inches(height_mm))
    }

    /// Stop any movement in progress
    pub async fn stop(&self) -> Result<()> {
        let slot = self.live_link().await?;
        let link = slot.as_deref().ok_or(DeskError::NotConnected)?;

        log::info!("Stopping desk {}", self.inner.desk);
        link.send(DeskCommand::Stop).await
    }

    /// Move to preset `n` (1-4)
    pub async fn move_to_preset(&self, n: u8) -> Result<()> {
        let preset = Preset::from_number(n).ok_or(DeskError::InvalidPreset(n))?;
        self.move_to(preset).await
    }

    pub async fn move_to_sit(&self) -> Result<()> {
        self.move_to(Preset::SIT).await
    }

    pub async fn move_to_stand(&self) -> Result<()> {
        self.move_to(Preset::STAND).await
    }

    async fn move_to(&self, preset: Preset) -> Result<()> {
        let slot = self.live_link().await?;
        let link = slot.as_deref().ok_or(DeskError::NotConnected)?;

        self.wake_if_needed(link).await?;
        log::info!("Moving {} to preset {}", self.inner.desk, preset.number());
        link.send(DeskCommand::MoveToPreset(preset)).await
    }
}

impl Inner {
    fn handle_event(self: Arc<Self>, session: u64, event: DeskEvent) {
        if self.session.load(Ordering::SeqCst) != session {
            log::trace!("Ignoring {:?} from a previous connection", event);
            return;
        }

        match event {
            DeskEvent::Height(mm) => {
                log::trace!("{} - Height notification: {}mm", self.desk.address, mm);
                self.record_height(mm);
            }
            DeskEvent::Disconnected => {
                if *self.state.borrow() == SessionState::Connected {
                    log::warn!("Desk {} disconnected", self.desk);
                    self.mark_disconnected();
                }
            }
        }
    }

    fn mark_disconnected(&self) {
        self.state.send_replace(SessionState::Disconnected);
        self.snapshot.send_modify(|s| {
            s.connected = false;
            s.moving = false;
        });
    }

    /// A height report that differs from the previous one means the desk is
    /// moving until reports settle
    fn record_height(self: &Arc<Self>, mm: u16) {
        let mut changed = false;
        self.snapshot.send_modify(|s| {
            changed = s.height_mm.is_some_and(|last| last != mm);
            s.height_mm = Some(mm);
            s.height_in = Some(to_inches(mm));
            if changed {
                s.moving = true;
            }
        });

        if changed {
            self.schedule_settle();
        }
    }

    fn schedule_settle(self: &Arc<Self>) {
        let generation = self.settle_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let inner = Arc::downgrade(self);
        let delay = self.settings.moving_settle();
        runtime.spawn(async move {
            sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.settle_generation.load(Ordering::SeqCst) == generation {
                inner.snapshot.send_if_modified(|s| std::mem::replace(&mut s.moving, false));
            }
        });
    }

    /// Stop notifications and close, best effort. Returns the close error, if any.
    async fn release(&self, link: Box<dyn DeskLink>) -> Result<()> {
        if let Err(e) = link.stop_notifications().await {
            log::warn!("Failed to stop notifications for {}: {}", self.desk, e);
        }
        link.close().await.map_err(|e| {
            log::warn!("Failed to close connection to {}: {}", self.desk, e);
            e
        })
    }
}
