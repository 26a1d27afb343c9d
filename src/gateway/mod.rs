//! Gateway assembly and operation dispatch

mod builder;
pub mod dispatch;
mod terminology;

pub use builder::{Mimir, MimirBuilder};
pub use dispatch::{Operation, OperationDescriptor, error_body};
pub use terminology::TerminologyGateway;
