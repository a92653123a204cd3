pub mod credentials;
pub mod database;
pub mod inventory;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
