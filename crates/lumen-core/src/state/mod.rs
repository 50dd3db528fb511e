//! Observable UI state: the model catalog, the model lifecycle and the chat transcript.

pub mod message;
pub mod model_status;
pub mod store;

pub use message::{Message, ModelInfo, Role};
pub use model_status::{IllegalTransition, ModelStatus, ModelStatusMap};
pub use store::{StatePatch, StateSnapshot, StateStore, Subscription};
