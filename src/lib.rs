pub mod bypass;
pub mod core;
pub mod extract;
pub mod http;
pub mod safety;
pub mod session;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::{AppState, Settings};
pub use bypass::{BypassError, ChallengeState};
