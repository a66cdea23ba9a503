pub mod models;
pub mod repository;

pub use models::*;
pub use repository::LedgerRepository;
