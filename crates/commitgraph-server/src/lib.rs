//! HTTP surface for starting and tracking ingest runs.

pub mod handlers;
pub mod models;
pub mod server;

pub use server::{router, start};
