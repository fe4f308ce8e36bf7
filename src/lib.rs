pub mod config;
pub mod db;
pub mod feed;
pub mod filter;
pub mod forum;
pub mod identity;
pub mod model;
pub mod publisher;
pub mod scheduler;
pub mod settings;
pub mod sync;
pub mod transform;
