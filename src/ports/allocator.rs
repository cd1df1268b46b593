use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use tracing::debug;

use super::reservations::{PortHold, Reservations};
use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, ListFilter};
use crate::servers::types::PORT_LABEL;

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

/// Validates a client-supplied port: an integer, or a string holding one, in
/// `[1024, 65535]`.
pub fn validate_port(value: &Value) -> Result<u16> {
    let port = match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| Error::invalid_port(n))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::invalid_port(format!("{s:?} is not a number")))?,
        other => return Err(Error::invalid_port(other)),
    };
    if !(i64::from(MIN_PORT)..=i64::from(MAX_PORT)).contains(&port) {
        return Err(Error::invalid_port(format!(
            "{port} is outside {MIN_PORT}-{MAX_PORT}"
        )));
    }
    Ok(port as u16)
}

/// Smallest port `>= base` not in `bound`.
///
/// This is advisory only: nothing stops a concurrent caller from receiving
/// the same answer before either port is actually bound.
pub fn find_free_port(bound: &HashSet<u16>, base: u16) -> Option<u16> {
    (base.max(MIN_PORT)..=MAX_PORT).find(|port| !bound.contains(port))
}

/// Every host port in use on this host: live published ports of all
/// containers, plus the recorded port label of stopped managed containers.
pub async fn bound_ports(runtime: &dyn ContainerRuntime) -> Result<HashSet<u16>> {
    let containers = runtime
        .list(ListFilter {
            all: true,
            ..Default::default()
        })
        .await?;

    let mut used = HashSet::new();
    for container in containers {
        used.extend(container.public_ports.iter().copied());
        if let Some(port) = container
            .labels
            .get(PORT_LABEL)
            .and_then(|p| p.parse::<u16>().ok())
        {
            used.insert(port);
        }
    }
    Ok(used)
}

/// Hands out host ports, skipping both runtime-reported bindings and holds
/// taken by in-flight operations of this process.
#[derive(Clone)]
pub struct PortAllocator {
    runtime: Arc<dyn ContainerRuntime>,
    reservations: Arc<Reservations>,
}

impl PortAllocator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, reservations: Arc<Reservations>) -> Self {
        PortAllocator {
            runtime,
            reservations,
        }
    }

    pub async fn bound_ports(&self) -> Result<HashSet<u16>> {
        bound_ports(self.runtime.as_ref()).await
    }

    /// One hold per base, in order, from a single scan. Holds taken earlier
    /// in the batch are excluded from later picks.
    pub async fn allocate_many(&self, bases: &[u16]) -> Result<Vec<PortHold>> {
        let mut bound = self.bound_ports().await?;
        let mut holds = Vec::with_capacity(bases.len());
        for &base in bases {
            let hold = self.allocate_from(&mut bound, base)?;
            bound.insert(hold.port());
            holds.push(hold);
        }
        Ok(holds)
    }

    pub async fn allocate(&self, base: u16) -> Result<PortHold> {
        let mut bound = self.bound_ports().await?;
        self.allocate_from(&mut bound, base)
    }

    fn allocate_from(&self, bound: &mut HashSet<u16>, base: u16) -> Result<PortHold> {
        loop {
            let port = find_free_port(bound, base)
                .ok_or_else(|| Error::InvalidInput(format!("no free host port at or above {base}")))?;
            match self.reservations.try_hold(port) {
                Some(hold) => {
                    debug!(base, host_port = port, "port allocated");
                    return Ok(hold);
                }
                // held by another in-flight operation
                None => {
                    bound.insert(port);
                }
            }
        }
    }

    /// A hold for a port the client asked for explicitly. `None` when another
    /// in-flight operation already holds it; the caller proceeds regardless.
    pub fn hold_explicit(&self, port: u16) -> Option<PortHold> {
        self.reservations.try_hold(port)
    }
}
