pub mod cascade;
pub mod config;
pub mod generator;
pub mod loaders;
pub mod models;
pub mod normalize;
pub mod roster;
pub mod search;
pub mod server;

pub use cascade::Resolver;
pub use config::AppConfig;
pub use server::run_server;
