use std::time::Duration;

use uuid::Uuid;

use crate::transport::DeviceFilter;

/// Activity service exposed by the sensor (ECG + movement characteristics).
pub const ACTIVITY_SERVICE_UUID: Uuid = Uuid::from_u128(0x6b0d0001_7a9e_4d5c_8a3f_2f4e9c1b7d60);
pub const ECG_VOLTAGE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6b0d0002_7a9e_4d5c_8a3f_2f4e9c1b7d60);
pub const ECG_INTERVAL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6b0d0003_7a9e_4d5c_8a3f_2f4e9c1b7d60);

pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
pub const BATTERY_LEVEL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// How sensors are requested and which services a session needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorOptions {
    pub filter: DeviceFilter,
    pub required_services: Vec<Uuid>,
    pub optional_services: Vec<Uuid>,
}

impl SensorOptions {
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filter.name_prefix = Some(prefix.into());
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.filter.scan_timeout = timeout;
        self
    }
}

impl Default for SensorOptions {
    fn default() -> Self {
        Self {
            filter: DeviceFilter {
                name_prefix: None,
                services: vec![ACTIVITY_SERVICE_UUID],
                optional_services: vec![BATTERY_SERVICE_UUID],
                scan_timeout: Duration::from_secs(10),
            },
            required_services: vec![ACTIVITY_SERVICE_UUID],
            optional_services: vec![BATTERY_SERVICE_UUID],
        }
    }
}
