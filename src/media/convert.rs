//! Pixel layout conversion
//!
//! Integer limited-range YUV math. HD and larger frames use BT.709
//! coefficients, smaller ones BT.601, matching what capture drivers emit.

use bytes::Bytes;

use crate::error::{Error, Result};

use super::frame::{CapturedFrame, PixelFormat};

/// YUV to RGB coefficient set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMatrix {
    Bt601,
    Bt709,
}

impl ColorMatrix {
    pub fn for_resolution(width: u32, height: u32) -> Self {
        if width >= 1280 && height >= 720 {
            ColorMatrix::Bt709
        } else {
            ColorMatrix::Bt601
        }
    }

    #[inline]
    fn to_rgb(self, y: u8, u: u8, v: u8) -> [u8; 3] {
        let c = y as i32 - 16;
        let d = u as i32 - 128;
        let e = v as i32 - 128;

        let (r, g, b) = match self {
            ColorMatrix::Bt601 => (
                298 * c + 409 * e,
                298 * c - 100 * d - 208 * e,
                298 * c + 516 * d,
            ),
            ColorMatrix::Bt709 => (
                298 * c + 459 * e,
                298 * c - 55 * d - 136 * e,
                298 * c + 541 * d,
            ),
        };

        [clamp((r + 128) >> 8), clamp((g + 128) >> 8), clamp((b + 128) >> 8)]
    }
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
    ((width as usize).div_ceil(2), (height as usize).div_ceil(2))
}

fn check_len(data: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<()> {
    let expected = format
        .frame_size(width, height)
        .ok_or_else(|| Error::FormatNotSupported(format.to_string()))?;
    if data.len() < expected {
        return Err(Error::Encoder(format!(
            "{} buffer too small for {}x{}: {} < {}",
            format,
            width,
            height,
            data.len(),
            expected
        )));
    }
    Ok(())
}

/// De-interleave NV12 chroma into planar I420
pub fn nv12_to_i420(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_len(data, PixelFormat::Nv12, width, height)?;

    let y_size = width as usize * height as usize;
    let (cw, ch) = chroma_dims(width, height);
    let chroma = cw * ch;

    let mut out = Vec::with_capacity(y_size + 2 * chroma);
    out.extend_from_slice(&data[..y_size]);

    let uv = &data[y_size..y_size + 2 * chroma];
    out.extend(uv.iter().step_by(2));
    out.extend(uv.iter().skip(1).step_by(2));
    Ok(out)
}

/// Planar I420 to packed RGBA
pub fn i420_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_len(data, PixelFormat::I420, width, height)?;

    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_dims(width, height);
    let (y_plane, rest) = data.split_at(w * h);
    let (u_plane, v_plane) = rest.split_at(cw * ch);
    let matrix = ColorMatrix::for_resolution(width, height);

    let mut out = Vec::with_capacity(w * h * 4);
    for row in 0..h {
        for col in 0..w {
            let ci = (row / 2) * cw + col / 2;
            let [r, g, b] = matrix.to_rgb(y_plane[row * w + col], u_plane[ci], v_plane[ci]);
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }
    Ok(out)
}

/// Semi-planar NV12 to packed RGBA
pub fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_len(data, PixelFormat::Nv12, width, height)?;

    let (w, h) = (width as usize, height as usize);
    let (cw, _) = chroma_dims(width, height);
    let (y_plane, uv_plane) = data.split_at(w * h);
    let matrix = ColorMatrix::for_resolution(width, height);

    let mut out = Vec::with_capacity(w * h * 4);
    for row in 0..h {
        for col in 0..w {
            let ci = ((row / 2) * cw + col / 2) * 2;
            let [r, g, b] = matrix.to_rgb(y_plane[row * w + col], uv_plane[ci], uv_plane[ci + 1]);
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }
    Ok(out)
}

/// Packed 4-byte pixels to I420 (BT.601), averaging each 2x2 chroma block.
/// `order` gives the byte offsets of R, G and B within a pixel.
fn packed_to_i420(data: &[u8], width: u32, height: u32, order: [usize; 3]) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_dims(width, height);
    let [ri, gi, bi] = order;

    let rgb = |x: usize, y: usize| -> (i32, i32, i32) {
        let p = (y * w + x) * 4;
        (data[p + ri] as i32, data[p + gi] as i32, data[p + bi] as i32)
    };

    let mut out = vec![0u8; w * h + 2 * cw * ch];
    let (y_plane, chroma) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = rgb(x, y);
            y_plane[y * w + x] = clamp(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);
        }
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0, 0, 0, 0);
            for y in (cy * 2)..(cy * 2 + 2).min(h) {
                for x in (cx * 2)..(cx * 2 + 2).min(w) {
                    let (pr, pg, pb) = rgb(x, y);
                    r += pr;
                    g += pg;
                    b += pb;
                    n += 1;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            u_plane[cy * cw + cx] = clamp(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
            v_plane[cy * cw + cx] = clamp(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
        }
    }

    out
}

pub fn bgra_to_i420(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_len(data, PixelFormat::Bgra, width, height)?;
    Ok(packed_to_i420(data, width, height, [2, 1, 0]))
}

pub fn rgba_to_i420(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_len(data, PixelFormat::Rgba, width, height)?;
    Ok(packed_to_i420(data, width, height, [0, 1, 2]))
}

/// Convert any supported frame to planar I420, as encoders expect
pub fn to_i420(frame: &CapturedFrame) -> Result<Bytes> {
    let (data, w, h) = (&frame.data[..], frame.width, frame.height);
    match frame.format {
        PixelFormat::I420 => {
            check_len(data, PixelFormat::I420, w, h)?;
            Ok(frame.data.clone())
        }
        PixelFormat::Nv12 => nv12_to_i420(data, w, h).map(Bytes::from),
        PixelFormat::Bgra => bgra_to_i420(data, w, h).map(Bytes::from),
        PixelFormat::Rgba => rgba_to_i420(data, w, h).map(Bytes::from),
        other => Err(Error::FormatNotSupported(format!(
            "cannot convert {} to i420",
            other
        ))),
    }
}

/// Convert any supported frame to packed RGBA for display
pub fn to_rgba(frame: &CapturedFrame) -> Result<Bytes> {
    let (data, w, h) = (&frame.data[..], frame.width, frame.height);
    match frame.format {
        PixelFormat::Rgba => {
            check_len(data, PixelFormat::Rgba, w, h)?;
            Ok(frame.data.clone())
        }
        PixelFormat::Nv12 => nv12_to_rgba(data, w, h).map(Bytes::from),
        PixelFormat::I420 => i420_to_rgba(data, w, h).map(Bytes::from),
        PixelFormat::Bgra => {
            check_len(data, PixelFormat::Bgra, w, h)?;
            let mut out = data.to_vec();
            out.chunks_exact_mut(4).for_each(|px| px.swap(0, 2));
            Ok(Bytes::from(out))
        }
        PixelFormat::Rgb24 => {
            check_len(data, PixelFormat::Rgb24, w, h)?;
            let out: Vec<u8> = data
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect();
            Ok(Bytes::from(out))
        }
        other => Err(Error::FormatNotSupported(format!(
            "cannot convert {} to rgba",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12_solid(width: u32, height: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
        let y_size = (width * height) as usize;
        let (cw, ch) = chroma_dims(width, height);
        let mut data = vec![y; y_size];
        for _ in 0..cw * ch {
            data.push(u);
            data.push(v);
        }
        data
    }

    #[test]
    fn test_nv12_white_and_black() {
        let white = nv12_to_rgba(&nv12_solid(2, 2, 235, 128, 128), 2, 2).unwrap();
        assert_eq!(&white[..4], &[255, 255, 255, 255]);

        let black = nv12_to_rgba(&nv12_solid(2, 2, 16, 128, 128), 2, 2).unwrap();
        assert_eq!(&black[..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_nv12_red() {
        let red = nv12_to_rgba(&nv12_solid(2, 2, 82, 90, 240), 2, 2).unwrap();
        assert_eq!(red[0], 255);
        assert!(red[1] < 10);
        assert!(red[2] < 10);
    }

    #[test]
    fn test_nv12_to_i420_deinterleaves() {
        // 2x2 luma, one chroma pair
        let data = [1, 2, 3, 4, 50, 60];
        let out = nv12_to_i420(&data, 2, 2).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 50, 60]);

        // 4x2 luma, two chroma pairs interleaved as U V U V
        let data = [0, 0, 0, 0, 0, 0, 0, 0, 10, 20, 11, 21];
        let out = nv12_to_i420(&data, 4, 2).unwrap();
        assert_eq!(&out[8..], &[10, 11, 20, 21]);
    }

    #[test]
    fn test_i420_matches_nv12() {
        let nv12 = nv12_solid(4, 4, 120, 100, 160);
        let i420 = nv12_to_i420(&nv12, 4, 4).unwrap();
        assert_eq!(
            i420_to_rgba(&i420, 4, 4).unwrap(),
            nv12_to_rgba(&nv12, 4, 4).unwrap()
        );
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = nv12_to_rgba(&[0u8; 3], 2, 2).unwrap_err();
        assert!(matches!(err, Error::Encoder(_)));
    }

    #[test]
    fn test_bgra_to_i420_grey() {
        let bgra = vec![128u8; 4 * 4 * 4];
        let out = bgra_to_i420(&bgra, 4, 4).unwrap();
        assert_eq!(out.len(), 16 + 8);
        assert!(out[..16].iter().all(|&y| y == out[0]));
        assert!(out[16..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_matrix_selection() {
        assert_eq!(ColorMatrix::for_resolution(640, 480), ColorMatrix::Bt601);
        assert_eq!(ColorMatrix::for_resolution(1280, 720), ColorMatrix::Bt709);
    }

    #[test]
    fn test_to_rgba_dispatch() {
        let bgra = CapturedFrame::new(vec![1u8, 2, 3, 4], 1, 1, PixelFormat::Bgra, 0);
        assert_eq!(&to_rgba(&bgra).unwrap()[..], &[3, 2, 1, 4]);

        let rgb = CapturedFrame::new(vec![9u8, 8, 7], 1, 1, PixelFormat::Rgb24, 0);
        assert_eq!(&to_rgba(&rgb).unwrap()[..], &[9, 8, 7, 255]);

        let mjpeg = CapturedFrame::new(vec![0xFFu8, 0xD8], 1, 1, PixelFormat::Mjpeg, 0);
        assert!(matches!(to_rgba(&mjpeg), Err(Error::FormatNotSupported(_))));
        assert!(matches!(to_i420(&mjpeg), Err(Error::FormatNotSupported(_))));
    }
}
