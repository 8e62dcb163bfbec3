// Library exports for muniverse
// The admin binary and integration tests both build on these modules

pub mod assets;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod integrity;
pub mod repos;
pub mod state;
