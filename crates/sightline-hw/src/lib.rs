//! sightline-hw — Hardware abstraction for the shared camera resource.
//!
//! Provides V4L2-based capture behind a cloneable single-owner handle and
//! the frame-processing primitives (area resize, vertical flip, grayscale)
//! the recognition and display paths share.

pub mod camera;
pub mod frame;
pub mod shared;

pub use camera::{CameraError, DeviceInfo, FrameSource, V4lSource};
pub use frame::RgbFrame;
pub use shared::{Opener, SharedCamera};
