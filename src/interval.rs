//! Sampling interval of the ECG stream, stored on the sensor as a
//! little-endian `u16` in its own characteristic.

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{IntervalError, IntervalFault};
use crate::options::ECG_INTERVAL_CHARACTERISTIC_UUID;
use crate::transport::Transport;

pub fn decode_interval(payload: &[u8]) -> Result<u16, IntervalFault> {
    match payload {
        [] => Err(IntervalFault::ValueUnavailable),
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        short => Err(IntervalFault::MalformedLength(short.len())),
    }
}

pub fn encode_interval(value: i64) -> Result<[u8; 2], IntervalError> {
    u16::try_from(value)
        .map(u16::to_le_bytes)
        .map_err(|_| IntervalError::Encoding(value))
}

/// Owns the interval characteristic and the last known interval value.
///
/// The value is published through a `watch` channel so decoders can read the
/// current interval per frame without owning it.
pub struct IntervalController<T: Transport> {
    transport: T,
    characteristic: Option<T::Characteristic>,
    value: watch::Sender<Option<u16>>,
}

impl<T: Transport> IntervalController<T> {
    pub fn new(transport: T) -> Self {
        let (value, _) = watch::channel(None);
        IntervalController {
            transport,
            characteristic: None,
            value,
        }
    }

    pub fn value(&self) -> Option<u16> {
        *self.value.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<u16>> {
        self.value.subscribe()
    }

    pub fn is_attached(&self) -> bool {
        self.characteristic.is_some()
    }

    /// Resolve the interval characteristic on `service` and read the value.
    /// Leaves the controller detached on failure.
    pub async fn attach(&mut self, service: &T::Service) -> Result<u16, IntervalError> {
        match self
            .transport
            .resolve_characteristic(service, ECG_INTERVAL_CHARACTERISTIC_UUID)
            .await
        {
            Ok(characteristic) => self.characteristic = Some(characteristic),
            Err(err) => {
                error!("failed to connect to ECG interval characteristic: {err}");
                self.detach();
                return Err(IntervalError::ReadFailed(err.into()));
            }
        }

        let result = self.read().await;
        if result.is_err() {
            self.detach();
        }
        result
    }

    pub fn detach(&mut self) {
        self.characteristic = None;
        self.value.send_replace(None);
    }

    pub async fn read(&self) -> Result<u16, IntervalError> {
        let characteristic = self
            .characteristic
            .as_ref()
            .ok_or(IntervalError::NotConnected)?;

        let decoded = match self.transport.read(characteristic).await {
            Ok(payload) => decode_interval(&payload),
            Err(err) => Err(err.into()),
        };

        match decoded {
            Ok(interval) => {
                info!("ECG interval found: {interval}");
                self.value.send_replace(Some(interval));
                Ok(interval)
            }
            Err(fault) => {
                error!("failed to read ECG interval value: {fault}");
                Err(IntervalError::ReadFailed(fault))
            }
        }
    }

    /// Write `value` to the sensor. The stored value only changes on success.
    pub async fn write(&self, value: i64) -> Result<(), IntervalError> {
        let characteristic = self
            .characteristic
            .as_ref()
            .ok_or(IntervalError::NotConnected)?;

        let payload = encode_interval(value).inspect_err(|err| {
            warn!("failed to set ECG interval: {err}");
        })?;

        if let Err(err) = self.transport.write(characteristic, &payload).await {
            error!("failed to write ECG interval to characteristic: {err}");
            return Err(IntervalError::CharacteristicWrite(err));
        }

        let interval = u16::from_le_bytes(payload);
        self.value.send_replace(Some(interval));
        info!("ECG interval set: {interval}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::options::ACTIVITY_SERVICE_UUID;
    use crate::sim::{SimFaults, SimService, SimTransport};
    use crate::transport::DeviceFilter;

    async fn activity_service(sim: &SimTransport) -> SimService {
        let device = sim.discover(&DeviceFilter::default()).await.unwrap();
        let link = sim.connect(&device).await.unwrap();
        sim.resolve_service(&link, ACTIVITY_SERVICE_UUID).await.unwrap()
    }

    #[test]
    fn test_decode_interval() {
        assert_eq!(decode_interval(&[0x34, 0x12]), Ok(0x1234));
        assert_eq!(decode_interval(&[0xff, 0xff, 0x00]), Ok(65535));
        assert_eq!(decode_interval(&[]), Err(IntervalFault::ValueUnavailable));
        assert_eq!(decode_interval(&[7]), Err(IntervalFault::MalformedLength(1)));
    }

    #[test]
    fn test_encode_interval_range() {
        assert_eq!(encode_interval(0), Ok([0, 0]));
        assert_eq!(encode_interval(65535), Ok([0xff, 0xff]));
        assert_eq!(encode_interval(65536), Err(IntervalError::Encoding(65536)));
        assert_eq!(encode_interval(-1), Err(IntervalError::Encoding(-1)));
    }

    #[tokio::test]
    async fn test_attach_reads_initial_value() {
        let sim = SimTransport::new().with_value(ECG_INTERVAL_CHARACTERISTIC_UUID, &[8, 0]);
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());
        assert_eq!(controller.value(), None);

        assert_eq!(controller.attach(&service).await, Ok(8));
        assert_eq!(controller.value(), Some(8));
        assert!(controller.is_attached());

        controller.detach();
        assert_eq!(controller.value(), None);
        assert!(!controller.is_attached());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let sim = SimTransport::new();
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());
        controller.attach(&service).await.unwrap();

        for value in [0i64, 1, 5, 255, 256, 4096, 65535] {
            controller.write(value).await.unwrap();
            assert_eq!(controller.read().await, Ok(value as u16));
        }
    }

    #[tokio::test]
    async fn test_out_of_range_write_leaves_value_untouched() {
        let sim = SimTransport::new();
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());
        controller.attach(&service).await.unwrap();
        controller.write(20).await.unwrap();

        assert_eq!(controller.write(65536).await, Err(IntervalError::Encoding(65536)));
        assert_eq!(controller.write(-5).await, Err(IntervalError::Encoding(-5)));
        assert_eq!(controller.value(), Some(20));
        assert_eq!(sim.value(ECG_INTERVAL_CHARACTERISTIC_UUID), Some(vec![20, 0]));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let sim = SimTransport::new();
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());
        controller.attach(&service).await.unwrap();

        sim.set_faults(SimFaults {
            write: true,
            ..Default::default()
        });
        let err = controller.write(30).await.unwrap_err();
        assert!(matches!(err, IntervalError::CharacteristicWrite(TransportError::Write(_))));
        assert_eq!(controller.value(), Some(10));
    }

    #[tokio::test]
    async fn test_read_failures_are_reported_as_read_failed() {
        let sim = SimTransport::new().with_value(ECG_INTERVAL_CHARACTERISTIC_UUID, &[3]);
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());

        assert_eq!(
            controller.attach(&service).await,
            Err(IntervalError::ReadFailed(IntervalFault::MalformedLength(1)))
        );
        assert!(!controller.is_attached());
        assert_eq!(controller.value(), None);

        let sim = SimTransport::new().with_value(ECG_INTERVAL_CHARACTERISTIC_UUID, &[]);
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());
        assert_eq!(
            controller.attach(&service).await,
            Err(IntervalError::ReadFailed(IntervalFault::ValueUnavailable))
        );

        let sim = SimTransport::new();
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());
        controller.attach(&service).await.unwrap();
        sim.set_faults(SimFaults {
            read: true,
            ..Default::default()
        });
        let err = controller.read().await.unwrap_err();
        assert!(matches!(
            err,
            IntervalError::ReadFailed(IntervalFault::Transport(TransportError::Read(_)))
        ));
        assert_eq!(controller.value(), Some(10));
    }

    #[tokio::test]
    async fn test_attach_fails_without_interval_characteristic() {
        let sim = SimTransport::new().without_characteristic(ECG_INTERVAL_CHARACTERISTIC_UUID);
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());

        let err = controller.attach(&service).await.unwrap_err();
        assert_eq!(
            err,
            IntervalError::ReadFailed(IntervalFault::Transport(
                TransportError::CharacteristicNotFound(ECG_INTERVAL_CHARACTERISTIC_UUID)
            ))
        );
        assert_eq!(controller.write(5).await, Err(IntervalError::NotConnected));
    }

    #[tokio::test]
    async fn test_watchers_see_updates() {
        let sim = SimTransport::new();
        let service = activity_service(&sim).await;
        let mut controller = IntervalController::new(sim.clone());
        let watcher = controller.watch();

        controller.attach(&service).await.unwrap();
        assert_eq!(*watcher.borrow(), Some(10));
        controller.write(4).await.unwrap();
        assert_eq!(*watcher.borrow(), Some(4));
        controller.detach();
        assert_eq!(*watcher.borrow(), None);
    }
}
