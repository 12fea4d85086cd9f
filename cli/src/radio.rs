// btleplug-backed radio for the gateway
//
// Scans for advertisements on one local adapter and forwards every EnOcean
// manufacturer data entry to the gateway's frame sink.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use enocean_ble_core::{
    parse_advertisement, DeviceId, EnOceanAdvertisement, FrameMetadata, FrameSink,
    RadioCollaborator, RadioError,
};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveScan {
    central: Adapter,
    task: JoinHandle<()>,
}

pub struct BtleRadio {
    adapter_index: usize,
    scan: Mutex<Option<ActiveScan>>,
}

impl BtleRadio {
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            scan: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RadioCollaborator for BtleRadio {
    async fn begin_scan(&self, sink: FrameSink) -> Result<(), RadioError> {
        let mut scan = self.scan.lock().await;
        if scan.is_some() {
            return Err(RadioError::Other("scan already active".to_string()));
        }

        let central = open_adapter(self.adapter_index).await?;
        let mut events = central.events().await.map_err(radio_error)?;
        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(radio_error)?;
        info!("BLE scan started on adapter {}", self.adapter_index);

        let adapter = central.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } = event
                else {
                    continue;
                };

                let Some(adv) = advertisement(&adapter, &id, &manufacturer_data).await else {
                    continue;
                };
                debug!("EnOcean frame from {} ({})", adv.device_id, adv.address);

                if !sink.deliver(adv.device_id, &adv.raw, FrameMetadata::now(adv.rssi)) {
                    break;
                }
            }
        });

        *scan = Some(ActiveScan { central, task });
        Ok(())
    }

    async fn end_scan(&self) -> Result<(), RadioError> {
        let Some(scan) = self.scan.lock().await.take() else {
            return Ok(());
        };
        scan.task.abort();
        scan.central.stop_scan().await.map_err(radio_error)?;
        info!("BLE scan stopped");
        Ok(())
    }
}

/// Scan for `timeout` and return the latest advertisement of every EnOcean
/// device heard, ordered by device id.
pub async fn discover(
    adapter_index: usize,
    timeout: Duration,
) -> Result<Vec<EnOceanAdvertisement>, RadioError> {
    let central = open_adapter(adapter_index).await?;
    let mut events = central.events().await.map_err(radio_error)?;
    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(radio_error)?;

    let mut seen: BTreeMap<DeviceId, EnOceanAdvertisement> = BTreeMap::new();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => {
                let Some(event) = event else { break };
                if let CentralEvent::ManufacturerDataAdvertisement { id, manufacturer_data } = event {
                    if let Some(adv) = advertisement(&central, &id, &manufacturer_data).await {
                        seen.insert(adv.device_id, adv);
                    }
                }
            }
        }
    }

    if let Err(e) = central.stop_scan().await {
        warn!("Failed to stop discovery scan: {}", e);
    }
    Ok(seen.into_values().collect())
}

async fn advertisement(
    central: &Adapter,
    id: &PeripheralId,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Option<EnOceanAdvertisement> {
    let properties = peripheral_properties(central, id).await;
    let rssi = properties.as_ref().and_then(|p| p.rssi);
    parse_advertisement(&address_of(id, properties.as_ref()), manufacturer_data, rssi)
}

async fn open_adapter(index: usize) -> Result<Adapter, RadioError> {
    let manager = Manager::new().await.map_err(radio_error)?;
    manager
        .adapters()
        .await
        .map_err(radio_error)?
        .into_iter()
        .nth(index)
        .ok_or_else(|| RadioError::AdapterUnavailable(format!("no Bluetooth adapter at index {}", index)))
}

async fn peripheral_properties(central: &Adapter, id: &PeripheralId) -> Option<PeripheralProperties> {
    let peripheral = central.peripheral(id).await.ok()?;
    peripheral.properties().await.ok().flatten()
}

fn address_of(id: &PeripheralId, properties: Option<&PeripheralProperties>) -> String {
    match properties {
        Some(p) => p.address.to_string(),
        None => format!("{:?}", id),
    }
}

fn radio_error(e: btleplug::Error) -> RadioError {
    match e {
        btleplug::Error::PermissionDenied => RadioError::PermissionDenied(e.to_string()),
        other => RadioError::Other(other.to_string()),
    }
}
