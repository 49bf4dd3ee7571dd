//! Connected sensor lifecycle.
//!
//! [`connect_sensor`] walks discovery, server connect and service negotiation,
//! and tears everything down again if any step fails. A [`Session`] is either
//! connected with all required services present or fully disconnected.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ConnectError, NegotiationError, Stage, TransportError};
use crate::negotiator::{negotiate, ServiceMap};
use crate::options::SensorOptions;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// Failures swallowed while tearing a session down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeardownReport {
    pub link: Option<TransportError>,
    pub forget: Option<TransportError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.link.is_none() && self.forget.is_none()
    }
}

pub struct Session<T: Transport> {
    transport: T,
    device: T::Device,
    link: T::Link,
    name: Option<String>,
    services: ServiceMap<T::Service>,
    state: SessionState,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("link", &self.link)
            .field("name", &self.name)
            .field("services", &self.services)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    /// Wrap an established link. Services are connected separately.
    pub fn open(transport: T, device: T::Device, link: T::Link, name: Option<String>) -> Self {
        Session {
            transport,
            device,
            link,
            name,
            services: ServiceMap::new(),
            state: SessionState::Connected,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Whether the underlying link is still up.
    pub async fn link_connected(&self) -> bool {
        self.transport.is_connected(&self.link).await
    }

    /// Copy of the connected services.
    pub fn services(&self) -> ServiceMap<T::Service> {
        self.services.clone()
    }

    pub fn service_ids(&self) -> Vec<Uuid> {
        self.services.keys().copied().collect()
    }

    pub fn service(&self, id: &Uuid) -> Option<T::Service> {
        self.services.get(id).cloned()
    }

    pub async fn connect_services(
        &mut self,
        required: &[Uuid],
        optional: &[Uuid],
    ) -> Result<(), NegotiationError> {
        let connected: HashSet<Uuid> = self.services.keys().copied().collect();
        let resolved = negotiate(&self.transport, &self.link, required, optional, &connected).await?;
        self.services.extend(resolved);
        Ok(())
    }

    /// Drop all services, disconnect the link and forget the device.
    ///
    /// Never fails; whatever went wrong is returned in the report. Calling it
    /// again only re-clears the service map.
    pub async fn disconnect(&mut self) -> TeardownReport {
        self.services.clear();

        if self.state == SessionState::Disconnected {
            debug!("sensor already disconnected");
            return TeardownReport::default();
        }
        self.state = SessionState::Disconnected;

        let mut report = TeardownReport::default();
        if self.transport.is_connected(&self.link).await {
            if let Err(err) = self.transport.disconnect_link(&self.link).await {
                warn!("failed to disconnect GATT server: {err}");
                report.link = Some(err);
            }
        }
        if let Err(err) = self.transport.forget(&self.device).await {
            warn!("failed to forget device: {err}");
            report.forget = Some(err);
        }

        info!(
            "disconnected from sensor \"{}\"",
            self.name().unwrap_or("unknown sensor")
        );
        report
    }
}

/// Discover a sensor, connect to it and negotiate its services.
pub async fn connect_sensor<T: Transport>(
    transport: &T,
    options: &SensorOptions,
) -> Result<Session<T>, ConnectError> {
    if !transport.is_available().await {
        error!("{}", ConnectError::BluetoothUnavailable);
        return Err(ConnectError::BluetoothUnavailable);
    }

    let device = match transport.discover(&options.filter).await {
        Ok(device) => device,
        Err(err) => {
            error!(stage = %Stage::Discovery, "{err}");
            return Err(ConnectError::DiscoveryFailed(err));
        }
    };

    let link = match transport.connect(&device).await {
        Ok(link) => link,
        Err(err) => {
            error!(stage = %Stage::ServerConnect, "{err}");
            if let Err(forget_err) = transport.forget(&device).await {
                warn!("failed to forget device: {forget_err}");
            }
            return Err(ConnectError::ServerConnectionFailed(err));
        }
    };

    let name = transport.device_name(&device).await;
    let mut session = Session::open(transport.clone(), device, link, name);
    if let Err(err) = session
        .connect_services(&options.required_services, &options.optional_services)
        .await
    {
        error!(stage = %Stage::ServiceNegotiation, "{err}");
        let report = session.disconnect().await;
        if !report.is_clean() {
            warn!(?report, "teardown after failed negotiation was incomplete");
        }
        return Err(ConnectError::Negotiation(err));
    }

    info!(
        "connected to sensor \"{}\"",
        session.name().unwrap_or("unknown sensor")
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::options::{ACTIVITY_SERVICE_UUID, BATTERY_SERVICE_UUID};
    use crate::sim::{SimFaults, SimService, SimTransport};

    #[tokio::test]
    async fn test_connect_sensor_negotiates_services() {
        let sim = SimTransport::new();
        let session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();

        assert!(session.is_connected());
        assert!(session.link_connected().await);
        assert_eq!(session.name(), Some("Sim ECG"));
        let ids: HashSet<Uuid> = session.service_ids().into_iter().collect();
        assert_eq!(ids, HashSet::from([ACTIVITY_SERVICE_UUID, BATTERY_SERVICE_UUID]));
    }

    #[tokio::test]
    async fn test_nameless_sensor() {
        let sim = SimTransport::new().with_name(None);
        let mut session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();
        assert_eq!(session.name(), None);
        assert!(session.disconnect().await.is_clean());

        // a name prefix can never match a device without a name
        let options = SensorOptions::default().with_name_prefix("Sim");
        let err = connect_sensor(&sim, &options).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Discovery);

        let sim = SimTransport::new().with_name(Some("Sim ECG 2"));
        let session = connect_sensor(&sim, &options).await.unwrap();
        assert_eq!(session.name(), Some("Sim ECG 2"));
    }

    #[tokio::test]
    async fn test_optional_service_may_be_absent() {
        let sim = SimTransport::new().without_service(BATTERY_SERVICE_UUID);
        let session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();

        assert_eq!(session.service_ids(), vec![ACTIVITY_SERVICE_UUID]);
        assert!(session.service(&BATTERY_SERVICE_UUID).is_none());
    }

    #[tokio::test]
    async fn test_services_snapshot_is_independent() {
        let sim = SimTransport::new();
        let session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();

        let mut snapshot = session.services();
        snapshot.clear();
        assert_eq!(session.services().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_bluetooth_fails_before_discovery() {
        let sim = SimTransport::new().with_faults(SimFaults {
            unavailable: true,
            ..Default::default()
        });
        let err = connect_sensor(&sim, &SensorOptions::default()).await.unwrap_err();
        assert_eq!(err, ConnectError::BluetoothUnavailable);
        assert_eq!(err.stage(), Stage::Availability);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_tagged() {
        let sim = SimTransport::new().with_faults(SimFaults {
            discovery: true,
            ..Default::default()
        });
        let err = connect_sensor(&sim, &SensorOptions::default()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Discovery);
        assert_eq!(err.to_string(), "discovery stage failed");
        assert_eq!(sim.forget_calls(), 0);
    }

    #[tokio::test]
    async fn test_name_filter_mismatch_is_a_discovery_failure() {
        let sim = SimTransport::new();
        let options = SensorOptions::default().with_name_prefix("Polar");
        let err = connect_sensor(&sim, &options).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Discovery);
    }

    #[tokio::test]
    async fn test_server_connect_failure_forgets_device() {
        let sim = SimTransport::new().with_faults(SimFaults {
            connect: true,
            ..Default::default()
        });
        let err = connect_sensor(&sim, &SensorOptions::default()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::ServerConnect);
        assert!(sim.was_forgotten());
        assert!(!sim.is_link_up());
    }

    #[tokio::test]
    async fn test_service_discovery_failure_leaves_no_link_up() {
        let sim = SimTransport::new().with_faults(SimFaults {
            service_discovery: true,
            ..Default::default()
        });
        let err = connect_sensor(&sim, &SensorOptions::default()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::ServerConnect);
        assert!(!sim.is_link_up());
        assert!(sim.was_forgotten());
    }

    #[tokio::test]
    async fn test_negotiation_failure_tears_everything_down() {
        let sim = SimTransport::new();
        let mut options = SensorOptions::default();
        options.filter.services.clear();
        options.required_services = vec![ACTIVITY_SERVICE_UUID, Uuid::from_u128(0xdead)];

        let err = connect_sensor(&sim, &options).await.unwrap_err();
        assert_eq!(err.stage(), Stage::ServiceNegotiation);
        assert_eq!(
            err,
            ConnectError::Negotiation(NegotiationError::RequiredServiceUnavailable {
                missing: vec![Uuid::from_u128(0xdead)]
            })
        );
        assert!(!sim.is_link_up());
        assert!(sim.was_forgotten());
    }

    #[tokio::test]
    async fn test_disconnect_twice_ends_in_same_state() {
        let sim = SimTransport::new();
        let mut session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();

        let first = session.disconnect().await;
        assert!(first.is_clean());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.services().is_empty());
        assert!(!sim.is_link_up());

        let second = session.disconnect().await;
        assert!(second.is_clean());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.services().is_empty());
        assert_eq!(sim.disconnect_calls(), 1);
        assert_eq!(sim.forget_calls(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_swallows_teardown_errors() {
        let sim = SimTransport::new();
        let mut session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();
        sim.set_faults(SimFaults {
            disconnect: true,
            forget: true,
            ..Default::default()
        });

        let report = session.disconnect().await;
        assert!(!report.is_clean());
        assert!(report.link.is_some());
        assert!(report.forget.is_some());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.service_ids().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_skips_link_already_down() {
        let sim = SimTransport::new();
        let mut session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();
        sim.drop_link();

        let report = session.disconnect().await;
        assert!(report.is_clean());
        assert_eq!(sim.disconnect_calls(), 0);
        assert!(sim.was_forgotten());
    }

    #[tokio::test]
    async fn test_connect_services_is_idempotent() {
        let sim = SimTransport::new();
        let mut session = connect_sensor(&sim, &SensorOptions::default()).await.unwrap();
        let before = sim.resolved_services().len();

        session
            .connect_services(&[ACTIVITY_SERVICE_UUID], &[BATTERY_SERVICE_UUID])
            .await
            .unwrap();
        assert_eq!(sim.resolved_services().len(), before);
        assert_eq!(
            session.service(&ACTIVITY_SERVICE_UUID),
            Some(SimService {
                uuid: ACTIVITY_SERVICE_UUID
            })
        );
        assert_eq!(session.services().len(), 2);
    }
}
