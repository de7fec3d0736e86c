//! Media types and processing
//!
//! This module provides:
//! - Captured frame and encoded sample types
//! - Pixel layout conversion (NV12, I420, RGBA, BGRA)
//! - H.264 Annex-B NAL scanning
//! - Frame encoders and encoder selection

pub mod convert;
pub mod encoder;
pub mod frame;
pub mod h264;

#[cfg(feature = "h264")]
pub use encoder::H264Encoder;
pub use encoder::{
    DefaultEncoderFactory, EncoderFactory, FrameEncoder, PassthroughEncoder, PreviewFormat,
    RgbaConverter, StreamPurpose,
};
pub use frame::{CapturedFrame, EncodedSample, FrameEvent, PixelFormat, SampleFormat};
pub use h264::NaluType;
