//! Holiday Planner
//!
//! A personal list of trips kept in a document store, with a live,
//! searchable view over it.

pub mod config;
pub mod db;
pub mod models;
pub mod state;

pub use config::{Backend, Config, ConfigError};
pub use db::{
    open_store, DocumentStore, HolidayRepository, HolidayStream, MemoryStore, RepoError,
    SqliteStore, StoreError,
};
pub use models::Holiday;
pub use state::HolidayViewModel;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
