//! faceid-hw — V4L2 camera access for the FaceID capture pipeline.

pub mod camera;
pub mod convert;

pub use camera::{CameraError, DeviceInfo, PixelFormat, V4lCamera};
