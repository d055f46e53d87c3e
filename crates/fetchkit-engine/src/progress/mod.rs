//! Progress reporting helpers.

mod gate;

pub use gate::ProgressGate;
