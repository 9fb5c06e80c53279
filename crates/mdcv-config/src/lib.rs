//! Shared runtime configuration for the MDCV workspace: deterministic seeding
//! and tracing initialisation.

pub mod determinism;
pub mod tracing;

pub use determinism::{config, configure, rng_from_label, rng_from_optional, DeterminismConfig};
pub use tracing::{init_tracing, init_tracing_lenient, InitError};
