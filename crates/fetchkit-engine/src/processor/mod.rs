//! Transport-specific processors.
//!
//! Only the HTTP processor ships with the engine; cloud-object and other
//! transports implement the `Processor` port externally.

mod http;

pub use http::{HttpProcessor, HttpProcessorConfig};
