pub mod segment;
pub mod session;

pub use segment::{Segment, Segmenter};
pub use session::{SessionKind, SessionParams, StreamConfig, run_session};
