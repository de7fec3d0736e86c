//! Camera capture boundary
//!
//! A [`CaptureBackend`] enumerates devices and opens them. The resulting
//! [`CaptureSource`] is pulled by the bridge's producer thread, so
//! `next_frame` is allowed to block until the camera delivers.

mod synthetic;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media::{CapturedFrame, PixelFormat};

pub use synthetic::{SyntheticBackend, SyntheticSource};

/// Resolution, rate and pixel layout of a capture stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub pixel_format: PixelFormat,
}

impl CaptureFormat {
    pub fn new(width: u32, height: u32, fps: f64, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            pixel_format,
        }
    }

    /// Nominal time between frames
    pub fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    /// Replace whichever fields the caller specified
    pub fn with_overrides(mut self, width: Option<u32>, height: Option<u32>, fps: Option<f64>) -> Self {
        if let Some(width) = width {
            self.width = width;
        }
        if let Some(height) = height {
            self.height = height;
        }
        if let Some(fps) = fps {
            self.fps = fps;
        }
        self
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}fps {}",
            self.width, self.height, self.fps, self.pixel_format
        )
    }
}

/// A camera the backend can open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_available: bool,
    pub formats: Vec<CaptureFormat>,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            is_available: true,
            formats: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn format(mut self, format: CaptureFormat) -> Self {
        self.formats.push(format);
        self
    }

    pub fn available(mut self, available: bool) -> Self {
        self.is_available = available;
        self
    }

    /// Format used when the caller does not ask for one
    pub fn default_format(&self) -> Option<CaptureFormat> {
        self.formats.first().copied()
    }

    /// Pick the device format matching `requested`
    ///
    /// Resolution and pixel layout must match exactly; the rate may be
    /// lowered but not raised.
    pub fn resolve_format(&self, requested: Option<CaptureFormat>) -> Result<CaptureFormat> {
        let Some(requested) = requested else {
            return self
                .default_format()
                .ok_or_else(|| Error::FormatNotSupported(format!("{} reports no formats", self.id)));
        };

        self.formats
            .iter()
            .find(|f| {
                f.width == requested.width
                    && f.height == requested.height
                    && f.pixel_format == requested.pixel_format
                    && requested.fps > 0.0
                    && requested.fps <= f.fps
            })
            .map(|_| requested)
            .ok_or_else(|| {
                Error::FormatNotSupported(format!("{} does not offer {}", self.id, requested))
            })
    }
}

/// Camera permission state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    NotDetermined,
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionInfo {
    pub status: PermissionStatus,
    pub message: String,
}

impl PermissionInfo {
    pub fn is_granted(&self) -> bool {
        self.status == PermissionStatus::Granted
    }
}

/// An open camera
pub trait CaptureSource: Send {
    /// Block until the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;

    fn format(&self) -> CaptureFormat;

    /// Release the device. Called once by the producer thread on exit.
    fn close(&mut self) {}
}

/// Platform camera access
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Prepare the platform camera stack
    async fn initialize(&self) -> Result<String>;

    async fn permission_status(&self) -> PermissionStatus;

    async fn request_permission(&self) -> Result<PermissionInfo>;

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    async fn open(
        &self,
        device_id: &str,
        format: Option<CaptureFormat>,
    ) -> Result<Box<dyn CaptureSource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceInfo {
        DeviceInfo::new("cam-0", "Test Camera")
            .format(CaptureFormat::new(640, 480, 30.0, PixelFormat::Nv12))
            .format(CaptureFormat::new(1280, 720, 60.0, PixelFormat::Nv12))
    }

    #[test]
    fn test_default_format_is_first() {
        let format = device().resolve_format(None).unwrap();
        assert_eq!(format.width, 640);
        assert_eq!(format.fps, 30.0);
    }

    #[test]
    fn test_resolve_lower_rate() {
        let requested = CaptureFormat::new(1280, 720, 24.0, PixelFormat::Nv12);
        assert_eq!(device().resolve_format(Some(requested)).unwrap(), requested);
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        let too_fast = CaptureFormat::new(640, 480, 120.0, PixelFormat::Nv12);
        let wrong_layout = CaptureFormat::new(640, 480, 30.0, PixelFormat::Rgba);
        assert!(matches!(
            device().resolve_format(Some(too_fast)),
            Err(Error::FormatNotSupported(_))
        ));
        assert!(device().resolve_format(Some(wrong_layout)).is_err());
        assert!(DeviceInfo::new("empty", "Empty").resolve_format(None).is_err());
    }

    #[test]
    fn test_overrides() {
        let base = CaptureFormat::new(640, 480, 30.0, PixelFormat::Nv12);
        let format = base.with_overrides(Some(1280), None, Some(15.0));
        assert_eq!((format.width, format.height, format.fps), (1280, 480, 15.0));
        assert_eq!(format.to_string(), "1280x480@15fps nv12");
    }

    #[test]
    fn test_frame_interval() {
        let format = CaptureFormat::new(2, 2, 4.0, PixelFormat::Nv12);
        assert_eq!(format.frame_interval(), Duration::from_millis(250));
        let unpaced = CaptureFormat::new(2, 2, 0.0, PixelFormat::Nv12);
        assert_eq!(unpaced.frame_interval(), Duration::ZERO);
    }
}
