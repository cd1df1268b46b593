use std::{collections::HashMap, fmt, sync::LazyLock};

use serde::Serialize;

/// Lifecycle of one managed server as seen from the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Absent,
    Created,
    Running,
    Stopped,
    Removed,
}

impl ServerState {
    /// Maps a runtime state string onto the lifecycle.
    pub fn from_runtime(state: &str) -> Self {
        match state {
            "created" => ServerState::Created,
            "running" | "restarting" | "paused" => ServerState::Running,
            "removing" => ServerState::Removed,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Absent => "absent",
            ServerState::Created => "created",
            ServerState::Running => "running",
            ServerState::Stopped => "stopped",
            ServerState::Removed => "removed",
        };
        f.write_str(name)
    }
}

static SERVER_TRANSITIONS: LazyLock<HashMap<ServerState, Vec<ServerState>>> =
    LazyLock::new(|| {
        let mut map = HashMap::new();
        map.insert(ServerState::Absent, vec![ServerState::Created]);
        map.insert(
            ServerState::Created,
            vec![ServerState::Running, ServerState::Stopped, ServerState::Removed],
        );
        map.insert(
            ServerState::Running,
            vec![ServerState::Running, ServerState::Stopped, ServerState::Removed],
        );
        map.insert(
            ServerState::Stopped,
            vec![ServerState::Stopped, ServerState::Running, ServerState::Removed],
        );
        map.insert(ServerState::Removed, vec![]);
        map
    });

pub fn valid_state_transition(src: ServerState, dst: ServerState) -> bool {
    SERVER_TRANSITIONS
        .get(&src)
        .is_some_and(|valid_states| valid_states.contains(&dst))
}

/// Phases of a rebind: the old container is torn down, then a new one with the
/// same name, image, environment and volumes is brought up on the new port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebindPhase {
    Stopping,
    Removing,
    Absent,
    Recreating,
    Starting,
    Running,
}

impl fmt::Display for RebindPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebindPhase::Stopping => "stopping",
            RebindPhase::Removing => "removing",
            RebindPhase::Absent => "absent",
            RebindPhase::Recreating => "recreating",
            RebindPhase::Starting => "starting",
            RebindPhase::Running => "running",
        };
        f.write_str(name)
    }
}

impl RebindPhase {
    /// The next phase on the success path; `None` once running.
    pub fn next(self) -> Option<RebindPhase> {
        match self {
            RebindPhase::Stopping => Some(RebindPhase::Removing),
            RebindPhase::Removing => Some(RebindPhase::Absent),
            RebindPhase::Absent => Some(RebindPhase::Recreating),
            RebindPhase::Recreating => Some(RebindPhase::Starting),
            RebindPhase::Starting => Some(RebindPhase::Running),
            RebindPhase::Running => None,
        }
    }

    /// Whether the old container is already gone, so a failure now leaves the
    /// server without a running container.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            RebindPhase::Absent | RebindPhase::Recreating | RebindPhase::Starting
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        assert!(valid_state_transition(ServerState::Absent, ServerState::Created));
        assert!(valid_state_transition(ServerState::Created, ServerState::Running));
        assert!(valid_state_transition(ServerState::Running, ServerState::Stopped));
        assert!(valid_state_transition(ServerState::Stopped, ServerState::Running));
        assert!(valid_state_transition(ServerState::Stopped, ServerState::Removed));
        assert!(!valid_state_transition(ServerState::Removed, ServerState::Running));
        assert!(!valid_state_transition(ServerState::Absent, ServerState::Running));
    }

    #[test]
    fn runtime_states_map_onto_lifecycle() {
        assert_eq!(ServerState::from_runtime("created"), ServerState::Created);
        assert_eq!(ServerState::from_runtime("running"), ServerState::Running);
        assert_eq!(ServerState::from_runtime("exited"), ServerState::Stopped);
        assert_eq!(ServerState::from_runtime("dead"), ServerState::Stopped);
    }

    #[test]
    fn rebind_walks_every_phase_in_order() {
        let mut phase = RebindPhase::Stopping;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                RebindPhase::Stopping,
                RebindPhase::Removing,
                RebindPhase::Absent,
                RebindPhase::Recreating,
                RebindPhase::Starting,
                RebindPhase::Running,
            ]
        );
        assert!(!RebindPhase::Removing.is_destructive());
        assert!(RebindPhase::Recreating.is_destructive());
    }
}
