use crate::runtime::{ContainerDetails, ContainerSummary};

use super::types::{
    GAME_PORT_KEY, ManagedServer, PORT_LABEL, PRIMARY_LABEL, Projection, short_id,
};

/// Derives the server view from raw inspection data. Missing fields never
/// fail the projection; what cannot be derived is reported as a warning.
pub fn project(details: &ContainerDetails) -> Projection {
    let mut warnings = Vec::new();
    let name = details
        .name
        .as_deref()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let status = match (&details.state, &details.health) {
        (Some(state), Some(health)) => format!("{state} ({health})"),
        (Some(state), None) => state.clone(),
        (None, _) => {
            warnings.push(format!("{name}: runtime reported no state"));
            "unknown".to_string()
        }
    };

    let host_port = resolve_host_port(details, &name, &mut warnings);

    Projection {
        server: ManagedServer {
            id: short_id(&details.id),
            name,
            status,
            image: details.image.clone().unwrap_or_default(),
            host_port,
            transition: None,
        },
        warnings,
    }
}

/// Live binding of the primary port first; the creation-time label when the
/// container is not running.
fn resolve_host_port(
    details: &ContainerDetails,
    name: &str,
    warnings: &mut Vec<String>,
) -> Option<u16> {
    let primary = details
        .labels
        .get(PRIMARY_LABEL)
        .map(String::as_str)
        .unwrap_or(GAME_PORT_KEY);

    if let Some(raw) = details
        .port_bindings
        .get(primary)
        .and_then(|ports| ports.first())
    {
        match raw.parse::<u16>() {
            Ok(port) => return Some(port),
            Err(_) => warnings.push(format!("{name}: unparseable host port {raw:?} for {primary}")),
        }
    }

    let raw = details.labels.get(PORT_LABEL)?;
    match raw.parse::<u16>() {
        Ok(port) => Some(port),
        Err(_) => {
            warnings.push(format!("{name}: unparseable {PORT_LABEL} label {raw:?}"));
            None
        }
    }
}

/// Fallback record for a listed container whose inspection failed.
pub fn project_summary(summary: &ContainerSummary, reason: &str) -> Projection {
    let name = summary
        .names
        .first()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let host_port = summary
        .labels
        .get(PORT_LABEL)
        .and_then(|p| p.parse::<u16>().ok());

    Projection {
        warnings: vec![format!("{name}: inspection failed: {reason}")],
        server: ManagedServer {
            id: short_id(&summary.id),
            name,
            status: "unknown".to_string(),
            image: String::new(),
            host_port,
            transition: None,
        },
    }
}
