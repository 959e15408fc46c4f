pub mod config;
pub mod connection;
pub mod container;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod notification_hub;
pub mod periodic;
pub mod provider;
pub mod proxy_server;
pub mod repository;
pub mod session_driver;
