//! # dist-tracker
//!
//! Client-side interaction tracking for the distributor SDK.
//!
//! Captures pageviews, clicks, heatmap samples, churn points and time on
//! page, stamps them with session and sequence context, and posts them to
//! the ingestion API using the same JSON shapes as the Android client.

pub mod churn;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod heatmap;
pub mod model;
pub mod payload;
pub mod sequence;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod time_spent;
pub mod tracker;

pub use error::{Error, Result};
pub use tracker::Tracker;
