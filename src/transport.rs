//! Capability interface of the radio stack.
//!
//! Everything above this module talks to a sensor only through [`Transport`]:
//! discovery, link management and the GATT-style service/characteristic
//! operations (read, write, subscribe to notifications). `btle` implements it
//! over btleplug, `sim` over a simulated sensor.

use std::fmt::Debug;
use std::time::Duration;

use uuid::Uuid;

use crate::error::TransportError;

/// Callback invoked with the raw payload of every notification frame.
pub type FrameHandler = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// What to look for during discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFilter {
    /// Only accept devices whose advertised name starts with this.
    pub name_prefix: Option<String>,
    /// Services the device must advertise.
    pub services: Vec<Uuid>,
    /// Services we may want later. Some stacks need them declared up front.
    pub optional_services: Vec<Uuid>,
    pub scan_timeout: Duration,
}

impl DeviceFilter {
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        match (&self.name_prefix, name) {
            (None, _) => true,
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            name_prefix: None,
            services: vec![],
            optional_services: vec![],
            scan_timeout: Duration::from_secs(10),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Transport: Clone + Send + Sync + 'static {
    type Device: Clone + Debug + Send + Sync;
    type Link: Clone + Debug + Send + Sync;
    type Service: Clone + Debug + Send + Sync;
    type Characteristic: Clone + Debug + Send + Sync;
    type Subscription: Debug + Send;

    async fn is_available(&self) -> bool;

    async fn discover(&self, filter: &DeviceFilter) -> Result<Self::Device, TransportError>;

    async fn device_name(&self, device: &Self::Device) -> Option<String>;

    async fn connect(&self, device: &Self::Device) -> Result<Self::Link, TransportError>;

    async fn is_connected(&self, link: &Self::Link) -> bool;

    async fn disconnect_link(&self, link: &Self::Link) -> Result<(), TransportError>;

    /// Revoke whatever access the platform granted to `device`.
    async fn forget(&self, device: &Self::Device) -> Result<(), TransportError>;

    async fn resolve_service(
        &self,
        link: &Self::Link,
        id: Uuid,
    ) -> Result<Self::Service, TransportError>;

    async fn resolve_characteristic(
        &self,
        service: &Self::Service,
        id: Uuid,
    ) -> Result<Self::Characteristic, TransportError>;

    async fn read(&self, characteristic: &Self::Characteristic) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        characteristic: &Self::Characteristic,
        on_frame: FrameHandler,
    ) -> Result<Self::Subscription, TransportError>;

    async fn unsubscribe(&self, subscription: Self::Subscription) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_prefix_filter() {
        let any = DeviceFilter::default();
        assert!(any.matches_name(None));
        assert!(any.matches_name(Some("whatever")));

        let filter = DeviceFilter {
            name_prefix: Some("Movesense".to_string()),
            ..Default::default()
        };
        assert!(filter.matches_name(Some("Movesense 2034")));
        assert!(!filter.matches_name(Some("COROS PACE")));
        assert!(!filter.matches_name(None));
    }
}
