//! doorsight-hw — Hardware boundary for still capture and the motion sensor.
//!
//! Provides `libcamera-still` and V4L2 capture backends behind one
//! [`Capture`] trait, and a sysfs GPIO [`MotionSensor`].

pub mod camera;
pub mod capture;
pub mod frame;
pub mod sensor;

pub use camera::{Camera, CameraError, PixelFormat};
pub use capture::{Capture, CaptureError, CaptureSettings, LibcameraStill};
pub use frame::Frame;
pub use sensor::{MotionSensor, SensorError, SysfsGpioSensor, DEFAULT_GPIO_ROOT};
