pub mod alchemy;
pub mod config;
pub mod db;
pub mod object_store;
pub mod observability;
pub mod store;
pub mod types;
