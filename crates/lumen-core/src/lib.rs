// Core lumen functionality shared by the relay and the chat client

pub mod api;
pub mod chat;
pub mod error;
pub mod lifecycle;
pub mod preferences;
pub mod state;
pub mod test_utils;
pub mod utils;
pub mod wire;
