//! Port definitions (trait abstractions) for the engine's collaborators.
//!
//! Ports define the interfaces the core expects from infrastructure. They
//! contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` or HTTP-client types in any signature
//! - Cancellation primitives never leak through a port; callers cancel
//!   through the `Downloadable`
//! - Traits are minimal and object-safe (`Arc<dyn ...>` everywhere)

pub mod cache_index;
pub mod observer;
pub mod processor;

pub use cache_index::CacheIndex;
pub use observer::{
    ObserverToken, QueueObserver, ResourceCompletion, ResourceObserver, TaskSnapshot,
};
pub use processor::{Processor, ProcessorObserver};
