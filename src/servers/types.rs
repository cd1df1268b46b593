use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::RebindPhase;

/// Marks a container as managed by this service.
pub const MANAGED_LABEL: &str = "gs_manager";
pub const MANAGED_SELECTOR: &str = "gs_manager=1";
/// Host port recorded at creation so it stays visible while stopped.
pub const PORT_LABEL: &str = "gs_manager.port";
/// Container port key the recorded host port belongs to.
pub const PRIMARY_LABEL: &str = "gs_manager.primary";
/// Number of container ports bound at creation.
pub const PORT_COUNT_LABEL: &str = "gs_manager.ports";
pub const TEMPLATE_LABEL: &str = "gs_manager.template";

/// Well-known Minecraft port, the default primary port.
pub const GAME_PORT: u16 = 25565;
pub const GAME_PORT_KEY: &str = "25565/tcp";

/// Externally visible view of one managed container. Never stored; always
/// derived from inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServer {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    /// Phase of an in-flight rebind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<RebindPhase>,
}

/// A projection plus whatever could not be derived cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub server: ManagedServer,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerList {
    pub servers: Vec<ManagedServer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Body of a create request. `port` stays untyped so that validation can
/// report non-numeric input as an invalid port. A null or absent name is a
/// missing name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRequest {
    pub name: Option<String>,
    pub image: Option<String>,
    pub template: Option<String>,
    pub port: Option<Value>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebindOutcome {
    pub result: &'static str,
    pub host_port: u16,
}

/// First 12 characters of a runtime id.
pub fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}
