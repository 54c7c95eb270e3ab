//! Fetches recent uploads from a YouTube account's subscriptions into a local
//! queue directory, one subdirectory per channel.

pub mod archive;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod mirror;
pub mod queue;
pub mod subscriptions;

pub use error::Error;
