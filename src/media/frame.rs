//! Frame and sample types
//!
//! `bytes::Bytes` is reference counted, so handing one sample to several
//! sinks shares a single payload allocation.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::h264;

/// Pixel layout of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Y plane followed by interleaved UV at half resolution
    Nv12,
    /// Planar Y, U, V at 4:2:0
    I420,
    /// Packed 4:2:2
    Yuyv,
    Rgba,
    Bgra,
    Rgb24,
    /// Motion JPEG, one compressed image per frame
    Mjpeg,
}

impl PixelFormat {
    /// Expected buffer size for an uncompressed frame, `None` for compressed layouts
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Nv12 | PixelFormat::I420 => Some(w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))),
            PixelFormat::Yuyv => Some(w.div_ceil(2) * 4 * h),
            PixelFormat::Rgba | PixelFormat::Bgra => Some(w * h * 4),
            PixelFormat::Rgb24 => Some(w * h * 3),
            PixelFormat::Mjpeg => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Nv12 => "nv12",
            PixelFormat::I420 => "i420",
            PixelFormat::Yuyv => "yuyv",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Mjpeg => "mjpeg",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw frame straight from the capture source
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonically increasing per stream
    pub sequence: u64,
    /// Capture time in microseconds since the Unix epoch
    pub timestamp_us: u64,
}

impl CapturedFrame {
    pub fn new(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            sequence,
            timestamp_us: now_micros(),
        }
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// Whether the buffer length matches the declared layout
    pub fn is_well_formed(&self) -> bool {
        match self.format.frame_size(self.width, self.height) {
            Some(expected) => self.data.len() == expected,
            None => !self.data.is_empty(),
        }
    }
}

/// Payload format of an outgoing sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// H.264 Annex-B access unit
    H264,
    /// Uncompressed (or camera-compressed) pixels in the given layout
    Raw(PixelFormat),
}

impl SampleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::H264 => "h264",
            SampleFormat::Raw(format) => format.as_str(),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload derived from exactly one captured frame
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Bytes,
    pub format: SampleFormat,
    pub width: u32,
    pub height: u32,
    /// Sequence number of the originating frame
    pub sequence: u64,
    pub captured_at_us: u64,
    pub sent_at_us: u64,
    /// Presentation duration of this sample
    pub duration: Duration,
    pub is_keyframe: bool,
}

impl EncodedSample {
    /// Build a sample for `frame`, stamping the send time now
    pub fn from_frame(
        frame: &CapturedFrame,
        data: Bytes,
        format: SampleFormat,
        duration: Duration,
    ) -> Self {
        let is_keyframe = match format {
            SampleFormat::H264 => h264::contains_keyframe(&data),
            SampleFormat::Raw(_) => true,
        };

        Self {
            data,
            format,
            width: frame.width,
            height: frame.height,
            sequence: frame.sequence,
            captured_at_us: frame.timestamp_us,
            sent_at_us: now_micros(),
            duration,
            is_keyframe,
        }
    }

    /// Time between capture and hand-off to the sinks
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.sent_at_us.saturating_sub(self.captured_at_us))
    }
}

/// Frame pushed to a UI subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEvent {
    pub frame_id: u64,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: u64,
    pub format: String,
}

impl From<&EncodedSample> for FrameEvent {
    fn from(sample: &EncodedSample) -> Self {
        Self {
            frame_id: sample.sequence,
            data: sample.data.to_vec(),
            width: sample.width,
            height: sample.height,
            timestamp_ms: sample.captured_at_us / 1000,
            format: sample.format.to_string(),
        }
    }
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelFormat::Nv12.frame_size(4, 2), Some(12));
        assert_eq!(PixelFormat::I420.frame_size(3, 3), Some(9 + 8));
        assert_eq!(PixelFormat::Rgba.frame_size(2, 2), Some(16));
        assert_eq!(PixelFormat::Yuyv.frame_size(4, 1), Some(8));
        assert_eq!(PixelFormat::Mjpeg.frame_size(640, 480), None);
    }

    #[test]
    fn test_well_formed() {
        let frame = CapturedFrame::new(vec![0u8; 12], 4, 2, PixelFormat::Nv12, 0);
        assert!(frame.is_well_formed());
        let short = CapturedFrame::new(vec![0u8; 5], 4, 2, PixelFormat::Nv12, 0);
        assert!(!short.is_well_formed());
    }

    #[test]
    fn test_sample_keyframe_flag() {
        let frame = CapturedFrame::new(vec![0u8; 12], 4, 2, PixelFormat::Nv12, 7)
            .with_timestamp(1_000);
        let idr = Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]);
        let slice = Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9A]);

        let key = EncodedSample::from_frame(&frame, idr, SampleFormat::H264, Duration::ZERO);
        let delta = EncodedSample::from_frame(&frame, slice, SampleFormat::H264, Duration::ZERO);
        assert!(key.is_keyframe);
        assert!(!delta.is_keyframe);
        assert_eq!(key.sequence, 7);
        assert_eq!(key.captured_at_us, 1_000);
    }

    #[test]
    fn test_frame_event_wire_shape() {
        let frame = CapturedFrame::new(vec![1u8, 2, 3, 4], 1, 1, PixelFormat::Rgba, 3)
            .with_timestamp(5_000_000);
        let sample = EncodedSample::from_frame(
            &frame,
            frame.data.clone(),
            SampleFormat::Raw(PixelFormat::Rgba),
            Duration::from_millis(33),
        );
        let event = FrameEvent::from(&sample);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["frameId"], 3);
        assert_eq!(json["timestampMs"], 5_000);
        assert_eq!(json["format"], "rgba");
        assert_eq!(json["data"], serde_json::json!([1, 2, 3, 4]));
    }
}
