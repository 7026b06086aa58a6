//! Marionette Core - Core types, telemetry decoding, and robot description parsing
//!
//! This crate provides the foundational types for the Marionette system:
//! - Telemetry pose frames and their defensive decoding
//! - URDF-style robot description parsing
//! - One-time surface classification (antenna, lens, shell, generic) and families
//! - The viewer configuration file model

pub mod config;
pub mod robot;
pub mod surface;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use robot::{JointKind, ModelError, RobotDescription};
pub use surface::{Family, FamilyRule, SurfaceClass};
pub use telemetry::{FrameError, PoseFrame, POSE_TOLERANCE};
