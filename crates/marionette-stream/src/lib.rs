//! Marionette pose stream client
//!
//! Keeps one WebSocket connection to the robot's telemetry endpoint while
//! active, decodes frames defensively, and publishes the latest accepted
//! frame into a [`PoseSlot`] that the render loop reads once per frame.

pub mod client;
pub mod slot;

pub use client::{PoseStreamClient, StreamError, StreamSettings};
pub use slot::{PoseSlot, StreamStats};
