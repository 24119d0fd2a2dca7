//! Scripted in-memory transport for session tests.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::ble::transport::{
    Advertisement, AdvertisementStream, CharacteristicHandle, ConnectionHandle, DeviceId,
    NotificationEvent, NotificationStream, ServiceHandle, Transport,
};
use crate::ble::uuids::{TEMPERATURE_CHARACTERISTIC_UUID, TEMPERATURE_PERIOD_CHARACTERISTIC_UUID};
use crate::error::{Error, Result};

/// A transport call, as recorded by [`FakeTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    WaitUntilReady,
    Scan,
    StopScan,
    Connect(DeviceId),
    CancelConnection(DeviceId),
    DiscoverServices(DeviceId),
    DiscoverCharacteristics(Uuid),
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
}

#[derive(Default)]
struct Script {
    advertisements: VecDeque<Advertisement>,
    hold_scan_open: bool,
    unavailable: bool,
    failing_connects: HashSet<DeviceId>,
    stalled_connects: HashSet<DeviceId>,
    missing_services: HashSet<DeviceId>,
    missing_characteristics: HashSet<Uuid>,
    period: Vec<u8>,
    temperature: Vec<u8>,
    fail_writes: bool,
    stall_writes: bool,
    fail_cancel: bool,
    stall_unsubscribe: bool,
    calls: Vec<Call>,
    notifier: Option<mpsc::UnboundedSender<NotificationEvent>>,
}

/// Transport whose behaviour is scripted up front by the test.
#[derive(Clone)]
pub(crate) struct FakeTransport {
    script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    /// A ready adapter with no advertisements and a 2000 ms period.
    pub(crate) fn new() -> Self {
        let script = Script {
            period: vec![0xD0, 0x07],
            temperature: vec![0x15],
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    pub(crate) fn advertise(&self, id: &str, name: Option<&str>) {
        self.script.lock().advertisements.push_back(Advertisement {
            id: DeviceId::new(id),
            name: name.map(str::to_string),
            rssi: Some(-60),
        });
    }

    /// Keep the scan stream open once the scripted advertisements run out.
    pub(crate) fn hold_scan_open(&self) {
        self.script.lock().hold_scan_open = true;
    }

    pub(crate) fn set_unavailable(&self) {
        self.script.lock().unavailable = true;
    }

    pub(crate) fn fail_connect(&self, id: &str) {
        self.script.lock().failing_connects.insert(DeviceId::new(id));
    }

    pub(crate) fn stall_connect(&self, id: &str) {
        self.script.lock().stalled_connects.insert(DeviceId::new(id));
    }

    pub(crate) fn hide_service(&self, id: &str) {
        self.script.lock().missing_services.insert(DeviceId::new(id));
    }

    pub(crate) fn hide_characteristic(&self, uuid: Uuid) {
        self.script.lock().missing_characteristics.insert(uuid);
    }

    pub(crate) fn set_period_bytes(&self, bytes: Vec<u8>) {
        self.script.lock().period = bytes;
    }

    pub(crate) fn fail_writes(&self) {
        self.script.lock().fail_writes = true;
    }

    pub(crate) fn stall_writes(&self) {
        self.script.lock().stall_writes = true;
    }

    /// Make `cancel_connection` report a Bluetooth failure.
    pub(crate) fn fail_cancel(&self) {
        self.script.lock().fail_cancel = true;
    }

    pub(crate) fn stall_unsubscribe(&self) {
        self.script.lock().stall_unsubscribe = true;
    }

    /// Push a notification to the current subscriber.
    pub(crate) fn notify(&self, uuid: Uuid, data: Vec<u8>) {
        let script = self.script.lock();
        if let Some(notifier) = &script.notifier {
            let _ = notifier.unbounded_send(NotificationEvent {
                characteristic_uuid: uuid,
                data,
            });
        }
    }

    /// End the notification stream, as a dropped link does.
    pub(crate) fn drop_link(&self) {
        self.script.lock().notifier = None;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    fn record(&self, call: Call) {
        self.script.lock().calls.push(call);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn wait_until_ready(&self) -> Result<()> {
        self.record(Call::WaitUntilReady);
        let unavailable = self.script.lock().unavailable;
        if unavailable {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn scan(&self) -> Result<AdvertisementStream> {
        self.record(Call::Scan);
        let script = self.script.clone();
        let stream = stream::unfold(script, |script| async move {
            let next = script.lock().advertisements.pop_front();
            if let Some(advertisement) = next {
                return Some((advertisement, script));
            }
            let hold = script.lock().hold_scan_open;
            if hold {
                futures::future::pending::<()>().await;
            }
            None
        });
        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(Call::StopScan);
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<ConnectionHandle> {
        self.record(Call::Connect(device.clone()));
        let (stalled, failing) = {
            let script = self.script.lock();
            (
                script.stalled_connects.contains(device),
                script.failing_connects.contains(device),
            )
        };
        if stalled {
            futures::future::pending::<()>().await;
        }
        if failing {
            return Err(Error::Timeout {
                operation: "connect",
            });
        }
        Ok(ConnectionHandle {
            device: device.clone(),
        })
    }

    async fn cancel_connection(&self, device: &DeviceId) -> Result<()> {
        self.record(Call::CancelConnection(device.clone()));
        let fail = {
            let mut script = self.script.lock();
            script.notifier = None;
            script.fail_cancel
        };
        if fail {
            return Err(Error::Bluetooth(btleplug::Error::NotConnected));
        }
        Ok(())
    }

    async fn discover_services(
        &self,
        connection: &ConnectionHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<ServiceHandle>> {
        self.record(Call::DiscoverServices(connection.device.clone()));
        if self.script.lock().missing_services.contains(&connection.device) {
            return Ok(Vec::new());
        }
        Ok(uuids.iter().map(|uuid| ServiceHandle { uuid: *uuid }).collect())
    }

    async fn discover_characteristics(
        &self,
        _connection: &ConnectionHandle,
        service: &ServiceHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>> {
        let script_uuids = uuids.to_vec();
        for uuid in &script_uuids {
            self.record(Call::DiscoverCharacteristics(*uuid));
        }
        let missing = self.script.lock().missing_characteristics.clone();
        Ok(script_uuids
            .into_iter()
            .filter(|uuid| !missing.contains(uuid))
            .map(|uuid| CharacteristicHandle {
                uuid,
                service_uuid: service.uuid,
            })
            .collect())
    }

    async fn read(
        &self,
        _connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<u8>> {
        self.record(Call::Read(characteristic.uuid));
        let script = self.script.lock();
        match characteristic.uuid {
            uuid if uuid == TEMPERATURE_PERIOD_CHARACTERISTIC_UUID => Ok(script.period.clone()),
            uuid if uuid == TEMPERATURE_CHARACTERISTIC_UUID => Ok(script.temperature.clone()),
            uuid => Err(Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            }),
        }
    }

    async fn write(
        &self,
        _connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<()> {
        self.record(Call::Write(characteristic.uuid, data.to_vec()));
        let (stall, fail) = {
            let script = self.script.lock();
            (script.stall_writes, script.fail_writes)
        };
        if stall {
            futures::future::pending::<()>().await;
        }
        if fail {
            return Err(Error::Timeout {
                operation: "write",
            });
        }
        if characteristic.uuid == TEMPERATURE_PERIOD_CHARACTERISTIC_UUID {
            self.script.lock().period = data.to_vec();
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<NotificationStream> {
        self.record(Call::Subscribe(characteristic.uuid));
        let (tx, rx) = mpsc::unbounded();
        self.script.lock().notifier = Some(tx);
        Ok(rx.boxed())
    }

    async fn unsubscribe(
        &self,
        _connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<()> {
        self.record(Call::Unsubscribe(characteristic.uuid));
        let stall = self.script.lock().stall_unsubscribe;
        if stall {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}
