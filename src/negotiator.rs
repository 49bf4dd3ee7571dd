use std::collections::{HashMap, HashSet};

use futures::future::{join, join_all};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::NegotiationError;
use crate::transport::Transport;

pub type ServiceMap<S> = HashMap<Uuid, S>;

/// Resolve `required` and `optional` services on `link`.
///
/// All lookups run concurrently and are joined before deciding. A missing
/// required service fails the whole call and nothing is returned; a missing
/// optional service is only logged. Ids in `already_connected` are skipped.
pub async fn negotiate<T: Transport>(
    transport: &T,
    link: &T::Link,
    required: &[Uuid],
    optional: &[Uuid],
    already_connected: &HashSet<Uuid>,
) -> Result<ServiceMap<T::Service>, NegotiationError> {
    if !transport.is_connected(link).await {
        error!("{}", NegotiationError::LinkNotConnected);
        return Err(NegotiationError::LinkNotConnected);
    }

    let mut pending = already_connected.clone();
    let required: Vec<Uuid> = required.iter().copied().filter(|id| pending.insert(*id)).collect();
    let optional: Vec<Uuid> = optional.iter().copied().filter(|id| pending.insert(*id)).collect();

    let resolve = move |id: Uuid| async move {
        debug!(service = %id, "resolving GATT service");
        (id, transport.resolve_service(link, id).await)
    };
    let (required_results, optional_results) = join(
        join_all(required.iter().map(|&id| resolve(id))),
        join_all(optional.iter().map(|&id| resolve(id))),
    )
    .await;

    let mut services = ServiceMap::new();
    for (id, result) in optional_results {
        match result {
            Ok(service) => {
                services.insert(id, service);
            }
            Err(err) => info!("service with ID \"{id}\" was not found: {err}"),
        }
    }

    let mut missing = vec![];
    for (id, result) in required_results {
        match result {
            Ok(service) => {
                services.insert(id, service);
            }
            Err(err) => {
                error!("required service with ID \"{id}\" is unavailable: {err}");
                missing.push(id);
            }
        }
    }

    if !missing.is_empty() {
        return Err(NegotiationError::RequiredServiceUnavailable { missing });
    }
    Ok(services)
}
