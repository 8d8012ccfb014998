pub mod bot;
pub mod config;
pub mod dify;
pub mod error;
pub mod relay;
pub mod slack;
pub mod store;
pub mod types;

pub use bot::run;
