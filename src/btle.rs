use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{DeviceFilter, FrameHandler, Transport};

const SCAN_POLL_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct BtleService {
    peripheral: PlatformPeripheral,
    service: Service,
}

#[derive(Debug, Clone)]
pub struct BtleCharacteristic {
    peripheral: PlatformPeripheral,
    characteristic: Characteristic,
}

#[derive(Debug)]
pub struct BtleSubscription {
    characteristic: BtleCharacteristic,
    cancel: CancellationToken,
}

/// [`Transport`] over the first Bluetooth adapter btleplug reports.
#[derive(Clone)]
pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(other_error)?;
        let adapter_list = manager.adapters().await.map_err(other_error)?;

        let adapter = adapter_list
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Other("No Bluetooth adapter found".to_string()))?;
        info!(
            "using adapter {}",
            adapter
                .adapter_info()
                .await
                .unwrap_or("No name adapter".to_string())
        );

        Ok(BtleTransport { adapter })
    }

    async fn find_matching(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Option<PlatformPeripheral>, TransportError> {
        // may contain peripherals that are no longer in range
        let peripherals = self.adapter.peripherals().await.map_err(discovery_error)?;

        for peripheral in peripherals {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            if !filter.matches_name(properties.local_name.as_deref()) {
                continue;
            }
            if !filter
                .services
                .iter()
                .all(|id| properties.services.contains(id))
            {
                continue;
            }

            debug!("found matching peripheral {:?}", properties.local_name);
            return Ok(Some(peripheral));
        }
        Ok(None)
    }
}

impl Transport for BtleTransport {
    type Device = PlatformPeripheral;
    type Link = PlatformPeripheral;
    type Service = BtleService;
    type Characteristic = BtleCharacteristic;
    type Subscription = BtleSubscription;

    async fn is_available(&self) -> bool {
        self.adapter.adapter_info().await.is_ok()
    }

    async fn discover(&self, filter: &DeviceFilter) -> Result<PlatformPeripheral, TransportError> {
        let scan_filter = ScanFilter {
            services: filter.services.clone(),
        };
        self.adapter
            .start_scan(scan_filter)
            .await
            .map_err(discovery_error)?;

        let deadline = Instant::now() + filter.scan_timeout;
        let found = loop {
            match self.find_matching(filter).await {
                Ok(Some(peripheral)) => break Ok(peripheral),
                Ok(None) if Instant::now() >= deadline => {
                    break Err(TransportError::Discovery("No device selected".to_string()))
                }
                Ok(None) => tokio::time::sleep(SCAN_POLL_PERIOD).await,
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = self.adapter.stop_scan().await {
            warn!("failed to stop scan: {err}");
        }
        found
    }

    async fn device_name(&self, device: &PlatformPeripheral) -> Option<String> {
        let Ok(Some(properties)) = device.properties().await else {
            return None;
        };

        properties.local_name
    }

    async fn connect(&self, device: &PlatformPeripheral) -> Result<PlatformPeripheral, TransportError> {
        if !device.is_connected().await.map_err(connection_error)? {
            device.connect().await.map_err(connection_error)?;
        }
        debug!("discovering peripheral services");
        if let Err(err) = device.discover_services().await {
            if let Err(disconnect_err) = device.disconnect().await {
                warn!("failed to disconnect after service discovery failed: {disconnect_err}");
            }
            return Err(connection_error(err));
        }
        Ok(device.clone())
    }

    async fn is_connected(&self, link: &PlatformPeripheral) -> bool {
        link.is_connected().await.unwrap_or(false)
    }

    async fn disconnect_link(&self, link: &PlatformPeripheral) -> Result<(), TransportError> {
        link.disconnect().await.map_err(other_error)
    }

    async fn forget(&self, device: &PlatformPeripheral) -> Result<(), TransportError> {
        // btleplug has no per-device permission to revoke
        debug!("forgetting peripheral {:?}", device.id());
        Ok(())
    }

    async fn resolve_service(
        &self,
        link: &PlatformPeripheral,
        id: Uuid,
    ) -> Result<BtleService, TransportError> {
        link.services()
            .into_iter()
            .find(|service| service.uuid == id)
            .map(|service| BtleService {
                peripheral: link.clone(),
                service,
            })
            .ok_or(TransportError::ServiceNotFound(id))
    }

    async fn resolve_characteristic(
        &self,
        service: &BtleService,
        id: Uuid,
    ) -> Result<BtleCharacteristic, TransportError> {
        service
            .service
            .characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == id)
            .map(|characteristic| BtleCharacteristic {
                peripheral: service.peripheral.clone(),
                characteristic: characteristic.clone(),
            })
            .ok_or(TransportError::CharacteristicNotFound(id))
    }

    async fn read(&self, characteristic: &BtleCharacteristic) -> Result<Vec<u8>, TransportError> {
        characteristic
            .peripheral
            .read(&characteristic.characteristic)
            .await
            .map_err(|err| TransportError::Read(err.to_string()))
    }

    async fn write(
        &self,
        characteristic: &BtleCharacteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        characteristic
            .peripheral
            .write(&characteristic.characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|err| TransportError::Write(err.to_string()))
    }

    async fn subscribe(
        &self,
        characteristic: &BtleCharacteristic,
        mut on_frame: FrameHandler,
    ) -> Result<BtleSubscription, TransportError> {
        let peripheral = &characteristic.peripheral;
        let mut notifications = peripheral.notifications().await.map_err(subscribe_error)?;
        peripheral
            .subscribe(&characteristic.characteristic)
            .await
            .map_err(subscribe_error)?;
        debug!(
            "subscribed to characteristic {:?}",
            characteristic.characteristic.uuid
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let uuid = characteristic.characteristic.uuid;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    notification = notifications.next() => match notification {
                        Some(data) if data.uuid == uuid => on_frame(data.value.as_slice()),
                        Some(_) => {}
                        None => {
                            debug!("notification stream ended");
                            break;
                        }
                    },
                }
            }
        });

        Ok(BtleSubscription {
            characteristic: characteristic.clone(),
            cancel,
        })
    }

    async fn unsubscribe(&self, subscription: BtleSubscription) -> Result<(), TransportError> {
        subscription.cancel.cancel();
        let BtleCharacteristic {
            peripheral,
            characteristic,
        } = subscription.characteristic;
        peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(other_error)
    }
}

fn discovery_error(err: btleplug::Error) -> TransportError {
    TransportError::Discovery(err.to_string())
}

fn connection_error(err: btleplug::Error) -> TransportError {
    TransportError::Connection(err.to_string())
}

fn subscribe_error(err: btleplug::Error) -> TransportError {
    TransportError::Subscribe(err.to_string())
}

fn other_error(err: btleplug::Error) -> TransportError {
    TransportError::Other(err.to_string())
}
