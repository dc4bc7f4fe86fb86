//! In-memory desk used by the unit tests

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::ConnectionSettings;
use crate::desk::{DeskCommand, DeskEvent, DeskLink, DeskLinkFactory, DiscoveredDesk, EventSink};
use crate::error::{DeskError, Result};

pub(crate) fn test_desk() -> DiscoveredDesk {
    DiscoveredDesk::new("Office Desk", "AA:BB:CC:DD:EE:FF")
}

pub(crate) fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        connect_attempts: 3,
        retry_delay_ms: 0,
        connect_timeout_secs: 1,
        command_timeout_ms: 100,
        moving_settle_ms: 500,
        wake_before_command: true,
        scan_secs: 0,
        reconnect_secs: 1,
    }
}

/// Shared state behind a [`FakeFactory`] and every link it opens
pub(crate) struct FakeDesk {
    pub present: AtomicBool,
    pub opens: AtomicU32,
    pub closes: AtomicU32,
    /// Number of upcoming opens that fail
    pub failing_opens: AtomicU32,
    pub invalid: AtomicBool,
    pub fail_close: AtomicBool,
    /// Commands block forever once reaching the link
    pub hang: AtomicBool,
    pub height_mm: AtomicU16,
    pub commands: Mutex<Vec<DeskCommand>>,
    sink: Mutex<Option<EventSink>>,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl FakeDesk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            present: AtomicBool::new(true),
            opens: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            failing_opens: AtomicU32::new(0),
            invalid: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            height_mm: AtomicU16::new(762),
            commands: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            current: Mutex::new(None),
        })
    }

    /// Push an event through the sink of the most recently opened link
    pub fn notify(&self, event: DeskEvent) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    /// Simulate the desk dropping the current connection without an event
    pub fn drop_connection(&self) {
        if let Some(alive) = self.current.lock().unwrap().as_ref() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn commands(&self) -> Vec<DeskCommand> {
        self.commands.lock().unwrap().clone()
    }
}

pub(crate) struct FakeFactory(pub Arc<FakeDesk>);

#[async_trait]
impl DeskLinkFactory for FakeFactory {
    async fn locate(&self, _address: &str) -> Result<bool> {
        Ok(self.0.present.load(Ordering::SeqCst))
    }

    async fn open(&self, desk: &DiscoveredDesk, events: EventSink) -> Result<Box<dyn DeskLink>> {
        let fake = &self.0;
        fake.opens.fetch_add(1, Ordering::SeqCst);

        if !fake.present.load(Ordering::SeqCst) {
            return Err(DeskError::DeviceNotFound {
                address: desk.address.clone(),
            });
        }
        let failing = fake.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            fake.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(DeskError::Link("connection refused".into()));
        }

        let alive = Arc::new(AtomicBool::new(true));
        *fake.current.lock().unwrap() = Some(alive.clone());
        *fake.sink.lock().unwrap() = Some(events);

        Ok(Box::new(FakeLink {
            desk: fake.clone(),
            alive,
        }))
    }
}

struct FakeLink {
    desk: Arc<FakeDesk>,
    alive: Arc<AtomicBool>,
}

impl FakeLink {
    async fn record(&self, command: DeskCommand) -> Result<()> {
        if self.desk.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.alive.load(Ordering::SeqCst) {
            return Err(DeskError::Link("link closed".into()));
        }
        self.desk.commands.lock().unwrap().push(command);
        Ok(())
    }
}

#[async_trait]
impl DeskLink for FakeLink {
    async fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn validate(&self) -> Result<()> {
        if self.desk.invalid.load(Ordering::SeqCst) {
            Err(DeskError::Validation("missing data-in characteristic".into()))
        } else {
            Ok(())
        }
    }

    async fn send(&self, command: DeskCommand) -> Result<()> {
        self.record(command).await
    }

    async fn request_height(&self) -> Result<u16> {
        self.record(DeskCommand::QueryHeight).await?;
        let height = self.desk.height_mm.load(Ordering::SeqCst);
        self.desk.notify(DeskEvent::Height(height));
        Ok(height)
    }

    async fn stop_notifications(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.desk.closes.fetch_add(1, Ordering::SeqCst);
        if self.desk.fail_close.load(Ordering::SeqCst) {
            return Err(DeskError::Link("close failed".into()));
        }
        Ok(())
    }
}
