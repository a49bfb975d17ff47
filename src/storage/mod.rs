mod database;
mod usage_repo;


pub use database::Database;
pub use usage_repo::UsageRepo;
