pub mod chat;
pub mod http;
pub mod prompt;
pub mod state;
pub mod stream;
pub mod subsystems;
pub mod tools;

pub use state::AppState;
