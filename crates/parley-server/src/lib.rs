pub mod chat;
pub mod crud;
pub mod error;
pub mod events;
pub mod identity;
pub mod prompts;
pub mod ratelimit;
pub mod server;
pub mod share;
pub mod state;
pub mod users;

pub use error::{AppError, ServerError};
pub use identity::{Identity, USER_HEADER};
pub use server::{build_router, start, start_purge_task, ServerHandle};
pub use state::AppState;
