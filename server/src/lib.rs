pub mod config;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod notifier;
pub mod pricing;
pub mod routes;
pub mod services;
pub mod store;
pub mod utils;
