//! Simulated ECG sensor.
//!
//! Behaves like a single sensor exposing the activity and battery services.
//! Faults can be injected per operation, and frames are either pushed by hand
//! ([`SimTransport::push_frame`]) or generated every frame period with a bit
//! of random noise on top of a periodic spike.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::ecg::encode_frame;
use crate::error::TransportError;
use crate::options::{
    ACTIVITY_SERVICE_UUID, BATTERY_LEVEL_CHARACTERISTIC_UUID, BATTERY_SERVICE_UUID,
    ECG_INTERVAL_CHARACTERISTIC_UUID, ECG_VOLTAGE_CHARACTERISTIC_UUID,
};
use crate::transport::{DeviceFilter, FrameHandler, Transport};

const SIM_DEVICE_ID: &str = "sim-ecg-0001";
const SIM_DEVICE_NAME: &str = "Sim ECG";
const DEFAULT_INTERVAL_MS: u16 = 10;
const SAMPLES_PER_FRAME: usize = 16;
const BEAT_PERIOD_SAMPLES: usize = 80;

/// Operations that should fail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimFaults {
    pub unavailable: bool,
    pub discovery: bool,
    pub connect: bool,
    /// The link comes up but service discovery on it fails.
    pub service_discovery: bool,
    pub disconnect: bool,
    pub forget: bool,
    pub read: bool,
    pub write: bool,
    pub subscribe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimDevice {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimLink {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimService {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
}

#[derive(Debug)]
pub struct SimSubscription {
    id: u64,
    cancel: CancellationToken,
}

struct SimState {
    name: Option<String>,
    services: HashMap<Uuid, Vec<Uuid>>,
    values: HashMap<Uuid, Vec<u8>>,
    faults: SimFaults,
    frame_period: Option<Duration>,
    connected: bool,
    forgotten: bool,
    resolved_services: Vec<Uuid>,
    disconnect_calls: usize,
    forget_calls: usize,
    handlers: HashMap<u64, (Uuid, FrameHandler)>,
    next_subscription: u64,
    clock_ms: u32,
    beat_phase: usize,
}

#[derive(Clone)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    pub fn new() -> Self {
        let services = HashMap::from([
            (
                ACTIVITY_SERVICE_UUID,
                vec![ECG_VOLTAGE_CHARACTERISTIC_UUID, ECG_INTERVAL_CHARACTERISTIC_UUID],
            ),
            (BATTERY_SERVICE_UUID, vec![BATTERY_LEVEL_CHARACTERISTIC_UUID]),
        ]);
        let values = HashMap::from([
            (
                ECG_INTERVAL_CHARACTERISTIC_UUID,
                DEFAULT_INTERVAL_MS.to_le_bytes().to_vec(),
            ),
            (BATTERY_LEVEL_CHARACTERISTIC_UUID, vec![87]),
        ]);

        SimTransport {
            state: Arc::new(Mutex::new(SimState {
                name: Some(SIM_DEVICE_NAME.to_string()),
                services,
                values,
                faults: SimFaults::default(),
                frame_period: None,
                connected: false,
                forgotten: false,
                resolved_services: vec![],
                disconnect_calls: 0,
                forget_calls: 0,
                handlers: HashMap::new(),
                next_subscription: 0,
                clock_ms: 0,
                beat_phase: 0,
            })),
        }
    }

    /// Sensor that streams a frame every `SAMPLES_PER_FRAME * interval` ms.
    pub fn demo() -> Self {
        let interval = u64::from(DEFAULT_INTERVAL_MS);
        Self::new().with_frame_period(Duration::from_millis(SAMPLES_PER_FRAME as u64 * interval))
    }

    pub fn with_frame_period(self, period: Duration) -> Self {
        self.lock().frame_period = Some(period);
        self
    }

    pub fn with_name(self, name: Option<&str>) -> Self {
        self.lock().name = name.map(str::to_string);
        self
    }

    pub fn without_service(self, id: Uuid) -> Self {
        self.lock().services.remove(&id);
        self
    }

    pub fn without_characteristic(self, id: Uuid) -> Self {
        for characteristics in self.lock().services.values_mut() {
            characteristics.retain(|c| *c != id);
        }
        self
    }

    pub fn with_value(self, characteristic: Uuid, value: &[u8]) -> Self {
        self.lock().values.insert(characteristic, value.to_vec());
        self
    }

    pub fn with_faults(self, faults: SimFaults) -> Self {
        self.set_faults(faults);
        self
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.lock().faults = faults;
    }

    /// Drop the link as if the sensor went out of range.
    pub fn drop_link(&self) {
        self.lock().connected = false;
    }

    pub fn is_link_up(&self) -> bool {
        self.lock().connected
    }

    pub fn was_forgotten(&self) -> bool {
        self.lock().forgotten
    }

    pub fn resolved_services(&self) -> Vec<Uuid> {
        self.lock().resolved_services.clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.lock().disconnect_calls
    }

    pub fn forget_calls(&self) -> usize {
        self.lock().forget_calls
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        self.lock().values.get(&characteristic).cloned()
    }

    /// Deliver `frame` to every subscriber of `characteristic`.
    pub fn push_frame(&self, characteristic: Uuid, frame: &[u8]) {
        let mut state = self.lock();
        for (target, handler) in state.handlers.values_mut() {
            if *target == characteristic {
                handler(frame);
            }
        }
    }

    fn next_frame(&self) -> Vec<u8> {
        let mut state = self.lock();
        let interval = state
            .values
            .get(&ECG_INTERVAL_CHARACTERISTIC_UUID)
            .and_then(|v| v.get(..2))
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
            .unwrap_or(DEFAULT_INTERVAL_MS);

        let mut rng = rand::thread_rng();
        let mut values = Vec::with_capacity(SAMPLES_PER_FRAME);
        for _ in 0..SAMPLES_PER_FRAME {
            let spike = match state.beat_phase {
                0 => 900,
                1 => -250,
                _ => 0,
            };
            let noise: i16 = rng.gen_range(-15..=15);
            values.push(spike + noise);
            state.beat_phase = (state.beat_phase + 1) % BEAT_PERIOD_SAMPLES;
        }

        state.clock_ms = state
            .clock_ms
            .wrapping_add(SAMPLES_PER_FRAME as u32 * u32::from(interval));
        encode_frame(state.clock_ms, &values)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    type Device = SimDevice;
    type Link = SimLink;
    type Service = SimService;
    type Characteristic = SimCharacteristic;
    type Subscription = SimSubscription;

    async fn is_available(&self) -> bool {
        !self.lock().faults.unavailable
    }

    async fn discover(&self, filter: &DeviceFilter) -> Result<SimDevice, TransportError> {
        let mut state = self.lock();
        if state.faults.discovery {
            return Err(TransportError::Discovery("no device selected".to_string()));
        }
        if !filter.matches_name(state.name.as_deref()) {
            return Err(TransportError::Discovery(
                "no device matches the requested name".to_string(),
            ));
        }
        if let Some(missing) = filter
            .services
            .iter()
            .find(|id| !state.services.contains_key(*id))
        {
            return Err(TransportError::Discovery(format!(
                "no device advertises service {missing}"
            )));
        }

        state.forgotten = false;
        Ok(SimDevice {
            id: SIM_DEVICE_ID.to_string(),
            name: state.name.clone(),
        })
    }

    async fn device_name(&self, device: &SimDevice) -> Option<String> {
        device.name.clone()
    }

    async fn connect(&self, device: &SimDevice) -> Result<SimLink, TransportError> {
        let mut state = self.lock();
        if state.faults.connect {
            return Err(TransportError::Connection(
                "GATT server is not available".to_string(),
            ));
        }
        state.connected = true;
        if state.faults.service_discovery {
            state.connected = false;
            return Err(TransportError::Connection(
                "service discovery failed".to_string(),
            ));
        }
        Ok(SimLink {
            device_id: device.id.clone(),
        })
    }

    async fn is_connected(&self, _link: &SimLink) -> bool {
        self.lock().connected
    }

    async fn disconnect_link(&self, link: &SimLink) -> Result<(), TransportError> {
        debug!(device = %link.device_id, "dropping simulated link");
        let mut state = self.lock();
        state.disconnect_calls += 1;
        if state.faults.disconnect {
            return Err(TransportError::Other("link refused to disconnect".to_string()));
        }
        state.connected = false;
        Ok(())
    }

    async fn forget(&self, _device: &SimDevice) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.forget_calls += 1;
        if state.faults.forget {
            return Err(TransportError::Other("device could not be forgotten".to_string()));
        }
        state.forgotten = true;
        Ok(())
    }

    async fn resolve_service(&self, _link: &SimLink, id: Uuid) -> Result<SimService, TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::Other("GATT server is disconnected".to_string()));
        }
        state.resolved_services.push(id);
        if state.services.contains_key(&id) {
            Ok(SimService { uuid: id })
        } else {
            Err(TransportError::ServiceNotFound(id))
        }
    }

    async fn resolve_characteristic(
        &self,
        service: &SimService,
        id: Uuid,
    ) -> Result<SimCharacteristic, TransportError> {
        let state = self.lock();
        let found = state
            .services
            .get(&service.uuid)
            .is_some_and(|characteristics| characteristics.contains(&id));
        if found {
            Ok(SimCharacteristic {
                service: service.uuid,
                uuid: id,
            })
        } else {
            Err(TransportError::CharacteristicNotFound(id))
        }
    }

    async fn read(&self, characteristic: &SimCharacteristic) -> Result<Vec<u8>, TransportError> {
        let state = self.lock();
        if state.faults.read {
            return Err(TransportError::Read("GATT operation failed".to_string()));
        }
        Ok(state
            .values
            .get(&characteristic.uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, characteristic: &SimCharacteristic, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.faults.write {
            return Err(TransportError::Write("GATT operation failed".to_string()));
        }
        state.values.insert(characteristic.uuid, data.to_vec());
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: &SimCharacteristic,
        on_frame: FrameHandler,
    ) -> Result<SimSubscription, TransportError> {
        let (id, frame_period) = {
            let mut state = self.lock();
            if state.faults.subscribe {
                return Err(TransportError::Subscribe(
                    "notifications are not supported".to_string(),
                ));
            }
            let id = state.next_subscription;
            state.next_subscription += 1;
            state.handlers.insert(id, (characteristic.uuid, on_frame));
            debug!(
                service = %characteristic.service,
                characteristic = %characteristic.uuid,
                "simulated subscription {id}"
            );
            (id, state.frame_period)
        };

        let cancel = CancellationToken::new();
        if let Some(period) = frame_period {
            let sim = self.clone();
            let token = cancel.clone();
            let target = characteristic.uuid;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let frame = sim.next_frame();
                            sim.push_frame(target, &frame);
                        }
                    }
                }
                debug!("simulated frame pump stopped");
            });
        }

        Ok(SimSubscription { id, cancel })
    }

    async fn unsubscribe(&self, subscription: SimSubscription) -> Result<(), TransportError> {
        subscription.cancel.cancel();
        self.lock().handlers.remove(&subscription.id);
        Ok(())
    }
}
