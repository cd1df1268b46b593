pub mod registry;
pub mod types;

pub use registry::TemplateRegistry;
pub use types::{ContainerPort, Protocol, Template, TemplateError};
