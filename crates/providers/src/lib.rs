//! Model provider boundary.
//!
//! Concrete LLM backends live outside the gateway; this crate defines
//! the streaming contract they implement, an id-keyed registry, and a
//! deterministic scripted provider used by tests and demos.

pub mod registry;
pub mod scripted;
pub mod traits;

pub use registry::ProviderRegistry;
pub use scripted::ScriptedProvider;
pub use traits::{ChatRequest, ModelEvent, ModelProvider};
