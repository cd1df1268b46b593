pub mod lifecycle;
pub mod projector;
pub mod state;
pub mod types;

pub use lifecycle::{Lifecycle, LifecycleConfig};
pub use state::{RebindPhase, ServerState};
pub use types::{CreateOutcome, CreateRequest, ManagedServer, RebindOutcome, ServerList};
