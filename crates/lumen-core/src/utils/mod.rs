pub mod tracing;

pub use tracing::{LogTarget, init_tracing};
