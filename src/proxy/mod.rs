// proxy module - token-relay service

pub mod config;
pub mod relay;
pub mod server;
pub mod session;
pub mod token_manager;

pub mod handlers; // Route handlers
pub mod mappers; // Backend response normalization
pub mod middleware; // Axum middleware
pub mod upstream; // Backend client

pub use config::ProxyConfig;
pub use server::AxumServer;
pub use token_manager::TokenManager;
