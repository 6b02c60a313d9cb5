pub mod api;
pub mod config;
pub mod credentials;
pub mod embed;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod powerbi;
pub mod state;
pub mod store;
pub mod sync;

pub use state::AppState;
