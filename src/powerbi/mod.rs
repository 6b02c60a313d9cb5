//! Azure AD token broker and Power BI REST client.

mod broker;
mod client;
pub mod types;

pub use broker::{AadCredentials, AadTokenBroker};
pub use client::PowerBiClient;

const MAX_ERROR_BODY: usize = 512;

/// Shorten an upstream error body for inclusion in messages.
pub(crate) fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
