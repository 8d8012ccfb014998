//! Slack platform adapter: Web API calls and the Socket Mode event loop.

mod api;
pub mod socket;

pub use api::SlackApi;
