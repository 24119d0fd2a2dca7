//! BLE scanning functionality.
//!
//! Wraps a btleplug adapter and turns its central events into a stream of
//! [`Advertisement`]s. Named peripherals of the current scan are remembered
//! so a later connect can resolve a [`DeviceId`] back to the platform handle.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::ble::transport::{Advertisement, AdvertisementStream, DeviceId};
use crate::error::{Error, Result};

/// Delay between adapter readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// BLE scanner for discovering micro:bits.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Named peripherals seen during the current scan.
    discovered: Arc<RwLock<PeripheralCache<Peripheral>>>,
}

/// Named peripherals seen during one scan, by identifier.
///
/// Reset at the start of every scan so it only grows with what one scan
/// reports, and unnamed advertisers are never kept.
#[derive(Debug)]
pub(crate) struct PeripheralCache<P> {
    entries: HashMap<DeviceId, P>,
}

impl<P: Clone> PeripheralCache<P> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Forget everything from the previous scan.
    pub(crate) fn reset(&mut self) {
        self.entries.clear();
    }

    /// Keep `peripheral` if it advertises a name. Returns whether it was kept.
    pub(crate) fn remember(&mut self, id: DeviceId, name: Option<&str>, peripheral: P) -> bool {
        match name {
            Some(name) if !name.is_empty() => {
                self.entries.insert(id, peripheral);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn get(&self, id: &DeviceId) -> Option<P> {
        self.entries.get(id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl BleScanner {
    /// Create a scanner on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] if there is no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::TransportUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::TransportUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            discovered: Arc::new(RwLock::new(PeripheralCache::new())),
        }
    }

    /// Wait until the adapter answers queries.
    ///
    /// Polls indefinitely; callers bound the wait with their own timeout.
    pub async fn wait_until_ready(&self) {
        loop {
            match self.adapter.adapter_info().await {
                Ok(info) => {
                    debug!("Adapter ready: {}", info);
                    return;
                }
                Err(e) => {
                    trace!("Adapter not ready yet: {}", e);
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Start scanning and return the advertisement stream.
    ///
    /// The stream yields one item per discovery or update of any peripheral,
    /// named or not; filtering is left to the caller.
    pub async fn start_scanning(&self) -> Result<AdvertisementStream> {
        info!("Starting BLE scan");

        // Subscribe before starting so no early advertisement is missed
        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;
        self.discovered.write().reset();

        let adapter = self.adapter.clone();
        let discovered = self.discovered.clone();

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let discovered = discovered.clone();
            async move { Self::handle_event(event, &adapter, &discovered).await }
        });

        Ok(stream.boxed())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Look up a peripheral seen during a scan.
    pub fn peripheral(&self, id: &DeviceId) -> Result<Peripheral> {
        self.discovered
            .read()
            .get(id)
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: id.to_string(),
            })
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Handle a BLE central event.
    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        discovered: &Arc<RwLock<PeripheralCache<Peripheral>>>,
    ) -> Option<Advertisement> {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                Self::process_peripheral(adapter, id, discovered).await
            }
            CentralEvent::DeviceUpdated(id) => {
                trace!("Device updated: {:?}", id);
                Self::process_peripheral(adapter, id, discovered).await
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                None
            }
            _ => None,
        }
    }

    /// Resolve a peripheral's advertised properties.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        discovered: &Arc<RwLock<PeripheralCache<Peripheral>>>,
    ) -> Option<Advertisement> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to get peripheral {:?}: {}", id, e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let device = DeviceId::new(id.to_string());
        let kept = discovered.write().remember(
            device.clone(),
            properties.local_name.as_deref(),
            peripheral,
        );
        if kept {
            trace!("Remembering {} ({} cached)", device, discovered.read().len());
        }

        Some(Advertisement {
            id: device,
            name: properties.local_name,
            rssi: properties.rssi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cache_skips_unnamed_peripherals() {
        let mut cache = PeripheralCache::new();

        assert!(!cache.remember(DeviceId::new("anon"), None, 1));
        assert!(!cache.remember(DeviceId::new("blank"), Some(""), 2));
        assert!(cache.remember(DeviceId::new("dev-1"), Some("BBC micro:bit [zavog]"), 3));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&DeviceId::new("dev-1")), Some(3));
        assert_eq!(cache.get(&DeviceId::new("anon")), None);
    }

    #[test]
    fn test_cache_updates_in_place_and_resets_per_scan() {
        let mut cache = PeripheralCache::new();
        for _ in 0..10 {
            cache.remember(DeviceId::new("dev-1"), Some("Pixel 8"), 1);
        }
        cache.remember(DeviceId::new("dev-1"), Some("Pixel 8"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&DeviceId::new("dev-1")), Some(2));

        cache.reset();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&DeviceId::new("dev-1")), None);
    }
}
