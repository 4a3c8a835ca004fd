pub mod analytics;
pub mod api;
pub mod app;
pub mod auth;
pub mod cache;
pub mod clicklog;
pub mod client_ip;
pub mod config;
pub mod error;
pub mod lease;
pub mod links;
pub mod models;
pub mod redirect;
pub mod settings;
pub mod shutdown;
pub mod storage;
