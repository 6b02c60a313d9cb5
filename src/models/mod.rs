pub mod domain;
pub mod envelope;
pub mod query;
pub mod report;
pub mod settings;
pub mod workspace;

pub use domain::Domain;
pub use query::{Record, SearchQuery};
