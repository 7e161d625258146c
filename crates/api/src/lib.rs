//! Web console for the recap backup tool.
//!
//! Assembles the configuration coordinator, the conversation caches, the
//! destination client pool and the axum router that fronts them.

pub mod cache;
pub mod clients;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod server;

pub use cache::{ConversationCache, PageKey};
pub use clients::ClientPool;
pub use coordinator::ConfigCoordinator;
pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, AppState, build_router};
