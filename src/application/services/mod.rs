//! Application services - the login and sync loop

pub mod sync_service;

pub use sync_service::SyncService;
