//! Host port allocation.

pub mod allocator;
pub mod reservations;

pub use allocator::{PortAllocator, find_free_port, validate_port};
pub use reservations::{PortHold, Reservations};
