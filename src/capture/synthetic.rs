//! Synthetic camera
//!
//! Produces a moving test pattern at the device's nominal rate. Used by the
//! demo and the test suites, and handy on machines without a camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::media::{CapturedFrame, PixelFormat};

use super::{CaptureBackend, CaptureFormat, CaptureSource, DeviceInfo, PermissionInfo, PermissionStatus};

/// In-process camera backend with scripted behaviour
pub struct SyntheticBackend {
    devices: Vec<DeviceInfo>,
    permission: Mutex<PermissionStatus>,
    grant_on_request: bool,
    frame_limit: Option<u64>,
    fail_after: Option<u64>,
    paced: bool,
    initialized: AtomicBool,
}

impl SyntheticBackend {
    /// A backend with no devices, permission already granted
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            permission: Mutex::new(PermissionStatus::Granted),
            grant_on_request: true,
            frame_limit: None,
            fail_after: None,
            paced: true,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.devices.push(device);
        self
    }

    pub fn permission(self, status: PermissionStatus) -> Self {
        *self.permission.lock() = status;
        self
    }

    /// Make `request_permission` leave the status as it is
    pub fn deny_requests(mut self) -> Self {
        self.grant_on_request = false;
        self
    }

    /// End every opened stream after `frames` frames
    pub fn frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Every frame from index `frames` on fails to capture
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Deliver frames as fast as they are pulled
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new().with_device(
            DeviceInfo::new("synthetic-0", "Synthetic Camera")
                .description("Moving test pattern")
                .format(CaptureFormat::new(640, 480, 30.0, PixelFormat::Nv12))
                .format(CaptureFormat::new(1280, 720, 30.0, PixelFormat::Nv12)),
        )
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    async fn initialize(&self) -> Result<String> {
        self.initialized.store(true, Ordering::Release);
        Ok(format!(
            "Synthetic camera backend ready with {} device(s)",
            self.devices.len()
        ))
    }

    async fn permission_status(&self) -> PermissionStatus {
        *self.permission.lock()
    }

    async fn request_permission(&self) -> Result<PermissionInfo> {
        let mut permission = self.permission.lock();
        if self.grant_on_request && *permission == PermissionStatus::NotDetermined {
            *permission = PermissionStatus::Granted;
        }

        let message = match *permission {
            PermissionStatus::Granted => "Camera access granted",
            PermissionStatus::Denied => "Camera access denied",
            PermissionStatus::NotDetermined => "Camera access not yet requested",
            PermissionStatus::Restricted => "Camera access restricted by policy",
        };

        Ok(PermissionInfo {
            status: *permission,
            message: message.to_string(),
        })
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    async fn open(
        &self,
        device_id: &str,
        format: Option<CaptureFormat>,
    ) -> Result<Box<dyn CaptureSource>> {
        let status = *self.permission.lock();
        if status != PermissionStatus::Granted {
            return Err(Error::PermissionDenied(format!(
                "camera permission is {:?}",
                status
            )));
        }

        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;

        if !device.is_available {
            return Err(Error::InitializationFailed(format!(
                "{} is in use by another application",
                device_id
            )));
        }

        let format = device.resolve_format(format)?;
        if format.pixel_format == PixelFormat::Mjpeg {
            return Err(Error::FormatNotSupported(
                "synthetic camera cannot produce mjpeg".to_string(),
            ));
        }

        tracing::debug!(device = device_id, format = %format, "Synthetic camera opened");

        let mut source = SyntheticSource::new(format).paced(self.paced);
        source.frame_limit = self.frame_limit;
        source.fail_after = self.fail_after;
        Ok(Box::new(source))
    }
}

/// One open synthetic camera stream
pub struct SyntheticSource {
    format: CaptureFormat,
    sequence: u64,
    frame_limit: Option<u64>,
    fail_after: Option<u64>,
    paced: bool,
    next_due: Option<Instant>,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(format: CaptureFormat) -> Self {
        Self {
            format,
            sequence: 0,
            frame_limit: None,
            fail_after: None,
            paced: false,
            next_due: None,
            closed: false,
        }
    }

    /// End the stream after `frames` frames
    pub fn frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Fail every capture from frame `frames` on
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Sleep between frames to match the format's rate
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    fn wait_for_slot(&mut self) {
        let interval = self.format.frame_interval();
        if !self.paced || interval.is_zero() {
            return;
        }

        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // Do not try to catch up after a stall
        self.next_due = Some(due.max(now) + interval);
    }
}

impl CaptureSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        if self.closed || self.frame_limit.is_some_and(|limit| self.sequence >= limit) {
            return Ok(None);
        }

        self.wait_for_slot();

        let sequence = self.sequence;
        self.sequence += 1;

        if self.fail_after.is_some_and(|n| sequence >= n) {
            return Err(Error::StreamingFailed(format!(
                "synthetic capture fault at frame {}",
                sequence
            )));
        }

        let data = test_pattern(&self.format, sequence);
        Ok(Some(CapturedFrame::new(
            data,
            self.format.width,
            self.format.height,
            self.format.pixel_format,
            sequence,
        )))
    }

    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Diagonal luma ramp that scrolls one pixel per frame, neutral chroma
fn test_pattern(format: &CaptureFormat, sequence: u64) -> Vec<u8> {
    let (w, h) = (format.width as usize, format.height as usize);
    let shift = sequence as usize;
    let luma = |x: usize, y: usize| 16 + ((x + y + shift) % 220) as u8;

    match format.pixel_format {
        PixelFormat::Nv12 | PixelFormat::I420 => {
            let mut data = Vec::with_capacity(w * h + 2 * w.div_ceil(2) * h.div_ceil(2));
            for y in 0..h {
                for x in 0..w {
                    data.push(luma(x, y));
                }
            }
            let chroma = 2 * w.div_ceil(2) * h.div_ceil(2);
            data.resize(data.len() + chroma, 128);
            data
        }
        PixelFormat::Yuyv => {
            let mut data = Vec::with_capacity(w.div_ceil(2) * 4 * h);
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    data.extend_from_slice(&[luma(x, y), 128, luma(x + 1, y), 128]);
                }
            }
            data
        }
        PixelFormat::Rgba | PixelFormat::Bgra => {
            let mut data = Vec::with_capacity(w * h * 4);
            for y in 0..h {
                for x in 0..w {
                    let v = luma(x, y);
                    data.extend_from_slice(&[v, v, v, 255]);
                }
            }
            data
        }
        PixelFormat::Rgb24 => {
            let mut data = Vec::with_capacity(w * h * 3);
            for y in 0..h {
                for x in 0..w {
                    let v = luma(x, y);
                    data.extend_from_slice(&[v, v, v]);
                }
            }
            data
        }
        PixelFormat::Mjpeg => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> CaptureFormat {
        CaptureFormat::new(4, 2, 30.0, PixelFormat::Nv12)
    }

    fn backend() -> SyntheticBackend {
        SyntheticBackend::new()
            .with_device(DeviceInfo::new("cam", "Cam").format(tiny()))
            .unpaced()
    }

    #[tokio::test]
    async fn test_open_and_pull() {
        let backend = backend().frame_limit(3);
        let mut source = backend.open("cam", None).await.unwrap();

        for expected in 0..3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.sequence, expected);
            assert!(frame.is_well_formed());
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let result = backend().open("nope", None).await;
        assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let backend = backend().permission(PermissionStatus::Denied);
        assert!(matches!(
            backend.open("cam", None).await,
            Err(Error::PermissionDenied(_))
        ));

        let info = backend.request_permission().await.unwrap();
        assert_eq!(info.status, PermissionStatus::Denied);
    }

    #[tokio::test]
    async fn test_permission_request_grants() {
        let backend = backend().permission(PermissionStatus::NotDetermined);
        let info = backend.request_permission().await.unwrap();
        assert!(info.is_granted());
        assert_eq!(backend.permission_status().await, PermissionStatus::Granted);

        let stubborn = SyntheticBackend::new()
            .permission(PermissionStatus::NotDetermined)
            .deny_requests();
        assert!(!stubborn.request_permission().await.unwrap().is_granted());
    }

    #[tokio::test]
    async fn test_unavailable_device() {
        let backend = SyntheticBackend::new()
            .with_device(DeviceInfo::new("busy", "Busy").format(tiny()).available(false));
        assert!(matches!(
            backend.open("busy", None).await,
            Err(Error::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let backend = backend().fail_after(1);
        let mut source = backend.open("cam", None).await.unwrap();
        assert!(source.next_frame().is_ok());
        assert!(matches!(source.next_frame(), Err(Error::StreamingFailed(_))));
    }

    #[test]
    fn test_close_ends_stream() {
        let mut source = SyntheticSource::new(tiny());
        assert!(source.next_frame().unwrap().is_some());
        source.close();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_pattern_sizes() {
        for format in [
            PixelFormat::Nv12,
            PixelFormat::I420,
            PixelFormat::Yuyv,
            PixelFormat::Rgba,
            PixelFormat::Bgra,
            PixelFormat::Rgb24,
        ] {
            let capture = CaptureFormat::new(5, 3, 30.0, format);
            let data = test_pattern(&capture, 9);
            assert_eq!(Some(data.len()), format.frame_size(5, 3), "{}", format);
        }
    }

    #[test]
    fn test_paced_source_waits() {
        let format = CaptureFormat::new(2, 2, 200.0, PixelFormat::Nv12);
        let mut source = SyntheticSource::new(format);
        source.paced = true;

        let start = Instant::now();
        for _ in 0..4 {
            source.next_frame().unwrap();
        }
        // First frame is immediate, the remaining three wait one interval each
        assert!(start.elapsed() >= format.frame_interval() * 3);
    }
}
