pub mod digest;
pub mod error;
pub mod filter;
pub mod lock;
pub mod notify;
pub mod pipeline;
pub mod state;
pub mod types;

pub use error::PipelineError;
pub use filter::FilterEngine;
pub use pipeline::Pipeline;
pub use state::{JsonFileStore, MemoryStore, StateSnapshot, StateStore};
pub use types::{RunPhase, RunReport};
