//! Frame encoders
//!
//! An encoder turns one [`CapturedFrame`] into the payload of one
//! [`EncodedSample`](super::EncodedSample). The bridge only calls it after
//! the gate says somebody can take the result.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureFormat;
use crate::error::{Error, Result};

use super::convert;
use super::frame::{CapturedFrame, PixelFormat, SampleFormat};

/// Converts captured frames into sample payloads
pub trait FrameEncoder: Send {
    /// Encode one frame. `Ok(None)` means the encoder swallowed the frame
    /// without producing output (rate control skip).
    fn encode(&mut self, frame: &CapturedFrame) -> Result<Option<Bytes>>;

    fn output_format(&self) -> SampleFormat;

    /// Ask for the next output to be independently decodable
    fn request_keyframe(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Hands frames through untouched
pub struct PassthroughEncoder {
    format: PixelFormat,
}

impl PassthroughEncoder {
    pub fn new(format: PixelFormat) -> Self {
        Self { format }
    }
}

impl FrameEncoder for PassthroughEncoder {
    fn encode(&mut self, frame: &CapturedFrame) -> Result<Option<Bytes>> {
        if frame.format != self.format {
            return Err(Error::FormatNotSupported(format!(
                "passthrough configured for {}, got {}",
                self.format, frame.format
            )));
        }
        Ok(Some(frame.data.clone()))
    }

    fn output_format(&self) -> SampleFormat {
        SampleFormat::Raw(self.format)
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Converts frames to RGBA for display surfaces
#[derive(Default)]
pub struct RgbaConverter;

impl FrameEncoder for RgbaConverter {
    fn encode(&mut self, frame: &CapturedFrame) -> Result<Option<Bytes>> {
        convert::to_rgba(frame).map(Some)
    }

    fn output_format(&self) -> SampleFormat {
        SampleFormat::Raw(PixelFormat::Rgba)
    }

    fn name(&self) -> &'static str {
        "rgba"
    }
}

/// OpenH264 encoder producing Annex-B access units
#[cfg(feature = "h264")]
pub struct H264Encoder {
    encoder: openh264::encoder::Encoder,
    width: u32,
    height: u32,
    frames: u64,
    /// Parameters of the last SPS emitted
    sps: Option<super::h264::SpsInfo>,
}

#[cfg(feature = "h264")]
impl H264Encoder {
    pub fn new(width: u32, height: u32, fps: f32, bitrate_kbps: u32) -> Result<Self> {
        use openh264::encoder::{Encoder, EncoderConfig, RateControlMode};
        use openh264::OpenH264API;

        if width % 2 != 0 || height % 2 != 0 {
            return Err(Error::FormatNotSupported(format!(
                "h264 needs even dimensions, got {}x{}",
                width, height
            )));
        }

        let config = EncoderConfig::new()
            .max_frame_rate(fps)
            .rate_control_mode(RateControlMode::Bitrate)
            .set_bitrate_bps(bitrate_kbps * 1000)
            .enable_skip_frame(false);

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| Error::Encoder(format!("Failed to create encoder: {}", e)))?;

        tracing::info!(
            width = width,
            height = height,
            fps = fps,
            bitrate_kbps = bitrate_kbps,
            "H.264 encoder initialized"
        );

        Ok(Self {
            encoder,
            width,
            height,
            frames: 0,
            sps: None,
        })
    }
}

#[cfg(feature = "h264")]
impl FrameEncoder for H264Encoder {
    fn encode(&mut self, frame: &CapturedFrame) -> Result<Option<Bytes>> {
        use openh264::formats::YUVBuffer;

        if frame.width != self.width || frame.height != self.height {
            return Err(Error::Encoder(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let i420 = convert::to_i420(frame)?;
        let yuv = YUVBuffer::from_vec(i420.to_vec(), self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| Error::Encoder(format!("Encoding failed: {}", e)))?;
        let data = bitstream.to_vec();
        self.frames += 1;

        if data.is_empty() {
            tracing::trace!(
                sequence = frame.sequence,
                encoded = self.frames,
                "Encoder skipped frame"
            );
            return Ok(None);
        }

        if let Some(sps) = super::h264::SpsInfo::find(&data) {
            if self.sps != Some(sps) {
                tracing::info!(
                    codec = %sps.codec_string(),
                    sequence = frame.sequence,
                    "H.264 parameter set"
                );
                self.sps = Some(sps);
            }
        }
        Ok(Some(Bytes::from(data)))
    }

    fn output_format(&self) -> SampleFormat {
        SampleFormat::H264
    }

    fn request_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }

    fn name(&self) -> &'static str {
        "openh264"
    }
}

/// What a stream's samples are for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPurpose {
    /// Local UI rendering
    Preview,
    /// A peer connection's video track
    Transport,
}

/// Payload handed to preview subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewFormat {
    /// Camera pixels as captured
    #[default]
    Raw,
    /// Converted to RGBA
    Rgba,
}

/// Builds one encoder per stream
pub trait EncoderFactory: Send + Sync {
    fn create(&self, purpose: StreamPurpose, format: &CaptureFormat) -> Result<Box<dyn FrameEncoder>>;
}

/// Default encoder selection
///
/// Transport streams get H.264 when the `h264` feature is enabled and raw
/// passthrough otherwise.
#[derive(Debug, Clone)]
pub struct DefaultEncoderFactory {
    preview: PreviewFormat,
    bitrate_kbps: u32,
}

impl DefaultEncoderFactory {
    pub fn new(preview: PreviewFormat) -> Self {
        Self {
            preview,
            bitrate_kbps: 2_000,
        }
    }

    pub fn bitrate_kbps(mut self, bitrate_kbps: u32) -> Self {
        self.bitrate_kbps = bitrate_kbps;
        self
    }

    pub fn target_bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
    }
}

impl Default for DefaultEncoderFactory {
    fn default() -> Self {
        Self::new(PreviewFormat::default())
    }
}

impl EncoderFactory for DefaultEncoderFactory {
    fn create(&self, purpose: StreamPurpose, format: &CaptureFormat) -> Result<Box<dyn FrameEncoder>> {
        match purpose {
            StreamPurpose::Preview => match self.preview {
                PreviewFormat::Raw => Ok(Box::new(PassthroughEncoder::new(format.pixel_format))),
                PreviewFormat::Rgba => Ok(Box::new(RgbaConverter)),
            },
            #[cfg(feature = "h264")]
            StreamPurpose::Transport => Ok(Box::new(H264Encoder::new(
                format.width,
                format.height,
                format.fps as f32,
                self.bitrate_kbps,
            )?)),
            #[cfg(not(feature = "h264"))]
            StreamPurpose::Transport => {
                tracing::debug!(
                    format = %format.pixel_format,
                    "h264 feature disabled, transport stream carries raw frames"
                );
                Ok(Box::new(PassthroughEncoder::new(format.pixel_format)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12_frame() -> CapturedFrame {
        CapturedFrame::new(vec![16u8, 16, 16, 16, 128, 128], 2, 2, PixelFormat::Nv12, 1)
    }

    #[test]
    fn test_passthrough_shares_payload() {
        let frame = nv12_frame();
        let mut encoder = PassthroughEncoder::new(PixelFormat::Nv12);
        let out = encoder.encode(&frame).unwrap().unwrap();
        assert_eq!(out, frame.data);
        assert_eq!(out.as_ptr(), frame.data.as_ptr());
        assert_eq!(encoder.output_format(), SampleFormat::Raw(PixelFormat::Nv12));
    }

    #[test]
    fn test_passthrough_rejects_other_layouts() {
        let mut encoder = PassthroughEncoder::new(PixelFormat::Rgba);
        assert!(matches!(
            encoder.encode(&nv12_frame()),
            Err(Error::FormatNotSupported(_))
        ));
    }

    #[test]
    fn test_rgba_converter() {
        let mut encoder = RgbaConverter;
        let out = encoder.encode(&nv12_frame()).unwrap().unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_factory_preview_selection() {
        let format = CaptureFormat::new(2, 2, 30.0, PixelFormat::Nv12);

        let raw = DefaultEncoderFactory::new(PreviewFormat::Raw)
            .create(StreamPurpose::Preview, &format)
            .unwrap();
        assert_eq!(raw.name(), "passthrough");

        let rgba = DefaultEncoderFactory::new(PreviewFormat::Rgba)
            .create(StreamPurpose::Preview, &format)
            .unwrap();
        assert_eq!(rgba.output_format(), SampleFormat::Raw(PixelFormat::Rgba));
    }

    #[cfg(not(feature = "h264"))]
    #[test]
    fn test_factory_transport_without_h264() {
        let format = CaptureFormat::new(2, 2, 30.0, PixelFormat::Nv12);
        let encoder = DefaultEncoderFactory::default()
            .create(StreamPurpose::Transport, &format)
            .unwrap();
        assert_eq!(encoder.output_format(), SampleFormat::Raw(PixelFormat::Nv12));
    }

    #[cfg(feature = "h264")]
    #[test]
    fn test_h264_first_output_carries_parameter_set() {
        let size = 64 * 48;
        let mut data = vec![80u8; size];
        data.extend(std::iter::repeat(128u8).take(size / 2));
        let frame = CapturedFrame::new(data, 64, 48, PixelFormat::Nv12, 1);

        let mut encoder = H264Encoder::new(64, 48, 30.0, 500).unwrap();
        let out = encoder.encode(&frame).unwrap().unwrap();
        assert!(super::super::h264::contains_keyframe(&out));

        let sps = encoder.sps.unwrap();
        assert!(sps.codec_string().starts_with("avc1."));
        assert_eq!(super::super::h264::SpsInfo::find(&out), Some(sps));
    }
}
