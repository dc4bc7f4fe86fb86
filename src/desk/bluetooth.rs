use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::link::{DeskEvent, DeskLink, DeskLinkFactory, DiscoveredDesk, EventSink};
use super::protocol::{
    DeskCommand, FrameDecoder, Report, DATA_IN_UUID, DATA_OUT_UUID, DESK_SERVICE_UUID,
};
use crate::config::ConnectionSettings;
use crate::error::{DeskError, Result};

/// Opens btleplug connections to Uplift desks on the first Bluetooth adapter
pub struct BleDeskFactory {
    adapter: Adapter,
    settings: ConnectionSettings,
}

impl BleDeskFactory {
    pub async fn new(settings: ConnectionSettings) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeskError::Link("No Bluetooth adapters found".into()))?;

        Ok(Self { adapter, settings })
    }

    /// Scan for desks advertising the Uplift service
    pub async fn scan_for_desks(&self) -> Result<Vec<DiscoveredDesk>> {
        let scan_duration = self.settings.scan_duration();
        log::info!("Starting BLE scan for Uplift desks ({:?})...", scan_duration);
        self.adapter
            .start_scan(ScanFilter {
                services: vec![DESK_SERVICE_UUID],
            })
            .await?;

        sleep(scan_duration).await;

        let peripherals = self.adapter.peripherals().await?;
        log::info!("Found {} BLE devices", peripherals.len());

        let mut desks = Vec::new();
        for peripheral in peripherals {
            let props = match peripheral.properties().await {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("Failed to get peripheral properties: {}", e);
                    continue;
                }
            };

            // Some platforms ignore the scan filter
            if !props.services.contains(&DESK_SERVICE_UUID) {
                continue;
            }

            let address = peripheral_address(&peripheral, &props.address.to_string());
            let name = props
                .local_name
                .unwrap_or_else(|| format!("Uplift Desk {}", address));
            log::info!("Found Uplift desk: {} ({})", name, address);
            desks.push(DiscoveredDesk::new(name, address));
        }

        self.adapter.stop_scan().await?;
        Ok(desks)
    }

    /// Find a known peripheral by address, without scanning
    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            match peripheral.properties().await {
                Ok(Some(props)) => {
                    let p_addr = peripheral_address(&peripheral, &props.address.to_string());
                    log::trace!("Checking peripheral with address: {}", p_addr);
                    if p_addr.eq_ignore_ascii_case(address) {
                        return Ok(Some(peripheral));
                    }
                }
                Ok(None) => log::trace!("Peripheral has no properties"),
                Err(e) => log::debug!("Failed to get peripheral properties: {}", e),
            }
        }
        Ok(None)
    }

    /// Find a peripheral, scanning once if the adapter has not seen it yet
    async fn find_or_scan(&self, address: &str) -> Result<Option<Peripheral>> {
        if let Some(peripheral) = self.find_peripheral(address).await? {
            return Ok(Some(peripheral));
        }

        log::info!("Desk {} not cached, scanning...", address);
        self.scan_for_desks().await?;
        self.find_peripheral(address).await
    }

    async fn connect_peripheral(&self, peripheral: &Peripheral) -> Result<()> {
        let connect_timeout = self.settings.connect_timeout();

        if peripheral.is_connected().await? {
            log::info!("Desk already connected at the adapter level");
        } else {
            log::info!("Desk not connected, establishing connection...");
            match timeout(connect_timeout, peripheral.connect()).await {
                Ok(Ok(())) => log::info!("Bluetooth connection established"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(DeskError::Timeout(connect_timeout)),
            }
        }

        log::debug!("Discovering desk services and characteristics...");
        timeout(connect_timeout, peripheral.discover_services())
            .await
            .map_err(|_| DeskError::Timeout(connect_timeout))??;

        Ok(())
    }

    /// Decode height notifications and watch the adapter for the desk dropping the connection
    async fn start_event_tasks(
        &self,
        link: &BleDeskLink,
        desk: &DiscoveredDesk,
        height_tx: watch::Sender<Option<u16>>,
        events: EventSink,
    ) -> Result<()> {
        let peripheral = &link.peripheral;

        if let Some(data_out) = &link.data_out {
            let mut notifications = peripheral.notifications().await?;
            let sink = events.clone();
            let address = desk.address.clone();
            link.track(tokio::spawn(async move {
                let mut decoder = FrameDecoder::new();
                while let Some(notification) = notifications.next().await {
                    if notification.uuid != DATA_OUT_UUID {
                        continue;
                    }
                    log::trace!("{} - Notification: {:02X?}", address, notification.value);
                    for report in decoder.push(&notification.value) {
                        match report {
                            Report::Height(mm) => {
                                height_tx.send_replace(Some(mm));
                                sink(DeskEvent::Height(mm));
                            }
                            Report::Other { command, payload } => {
                                log::trace!(
                                    "{} - Ignoring report {:#04x}: {:02X?}",
                                    address,
                                    command,
                                    payload
                                );
                            }
                        }
                    }
                }
                log::debug!("{} - Notification stream ended", address);
            }));
            peripheral.subscribe(data_out).await?;
        }

        let mut adapter_events = self.adapter.events().await?;
        let peripheral_id = peripheral.id();
        link.track(tokio::spawn(async move {
            while let Some(event) = adapter_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        log::info!("Desk {:?} dropped the connection", id);
                        events(DeskEvent::Disconnected);
                        break;
                    }
                }
            }
        }));

        Ok(())
    }
}

/// btleplug reports an all-zero address on macOS, fall back to the peripheral id
fn peripheral_address(peripheral: &Peripheral, address: &str) -> String {
    if address == "00:00:00:00:00:00" {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

#[async_trait]
impl DeskLinkFactory for BleDeskFactory {
    async fn locate(&self, address: &str) -> Result<bool> {
        Ok(self.find_or_scan(address).await?.is_some())
    }

    async fn open(&self, desk: &DiscoveredDesk, events: EventSink) -> Result<Box<dyn DeskLink>> {
        let peripheral = self
            .find_or_scan(&desk.address)
            .await?
            .ok_or_else(|| DeskError::DeviceNotFound {
                address: desk.address.clone(),
            })?;

        if let Err(e) = self.connect_peripheral(&peripheral).await {
            // Don't leave a half-open connection behind for the next attempt
            if let Ok(true) = peripheral.is_connected().await {
                let _ = peripheral.disconnect().await;
            }
            return Err(e);
        }

        let chars = peripheral.characteristics();
        log::debug!("Found {} characteristics total", chars.len());
        let data_in = chars.iter().find(|c| c.uuid == DATA_IN_UUID).cloned();
        let data_out = chars.iter().find(|c| c.uuid == DATA_OUT_UUID).cloned();

        let (height_tx, height_rx) = watch::channel(None);
        let link = BleDeskLink {
            peripheral,
            data_in,
            data_out,
            heights: height_rx,
            tasks: StdMutex::new(Vec::new()),
            command_timeout: self.settings.command_timeout(),
        };

        // Closing the link undoes any partial setup
        if let Err(e) = self.start_event_tasks(&link, desk, height_tx, events).await {
            if let Err(close_err) = link.close().await {
                log::warn!("Failed to close {} after setup error: {}", desk, close_err);
            }
            return Err(e);
        }

        Ok(Box::new(link))
    }
}

/// A GATT session with one desk
pub struct BleDeskLink {
    peripheral: Peripheral,
    data_in: Option<Characteristic>,
    data_out: Option<Characteristic>,
    heights: watch::Receiver<Option<u16>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    command_timeout: Duration,
}

impl BleDeskLink {
    fn track(&self, task: JoinHandle<()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(task),
            Err(_) => task.abort(),
        }
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl DeskLink for BleDeskLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn validate(&self) -> Result<()> {
        if self.data_in.is_none() {
            return Err(DeskError::Validation(format!(
                "missing data-in characteristic {}",
                DATA_IN_UUID
            )));
        }
        if self.data_out.is_none() {
            return Err(DeskError::Validation(format!(
                "missing data-out characteristic {}",
                DATA_OUT_UUID
            )));
        }
        Ok(())
    }

    async fn send(&self, command: DeskCommand) -> Result<()> {
        let data_in = self
            .data_in
            .as_ref()
            .ok_or_else(|| DeskError::Validation("data-in characteristic not available".into()))?;

        let bytes = command.to_bytes();
        log::debug!("Sending command: {:?} -> bytes: {:02X?}", command, bytes);

        timeout(
            self.command_timeout,
            self.peripheral.write(data_in, &bytes, WriteType::WithoutResponse),
        )
        .await
        .map_err(|_| DeskError::Timeout(self.command_timeout))??;

        Ok(())
    }

    async fn request_height(&self) -> Result<u16> {
        let mut heights = self.heights.clone();
        heights.borrow_and_update();

        self.send(DeskCommand::QueryHeight).await?;

        timeout(self.command_timeout, heights.changed())
            .await
            .map_err(|_| DeskError::Timeout(self.command_timeout))?
            .map_err(|_| DeskError::Link("Notification stream closed".into()))?;

        let height = *heights.borrow();
        height.ok_or_else(|| DeskError::Link("Desk reported no height".into()))
    }

    async fn stop_notifications(&self) -> Result<()> {
        if let Some(data_out) = &self.data_out {
            self.peripheral.unsubscribe(data_out).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.abort_tasks();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
            log::info!("Disconnected from desk");
        }
        Ok(())
    }
}

impl Drop for BleDeskLink {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
