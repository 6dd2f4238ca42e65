//! Services of the application.
pub mod aggregate;
pub mod bridge;
pub mod schedule;
pub mod sensors;

pub use bridge::TibberBridgeBackgroundService;
