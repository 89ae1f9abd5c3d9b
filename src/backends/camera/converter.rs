// SPDX-License-Identifier: GPL-3.0-only
//! Frame normalization: rotation to upright and pixel format conversion
//!
//! Every raw frame passes through a [`FrameConverter`] before processors see
//! it. The converter is a pure function of its inputs. [`SoftwareConverter`]
//! decodes to RGBA, rotates with `image::imageops` and encodes to the
//! session's output format, using full-range BT.601 coefficients throughout.

use super::types::{NormalizedFrame, OutputImageFormat, PixelFormat, RawFrame, Rotation};
use crate::errors::ConversionError;
use image::RgbaImage;
use image::imageops;
use std::sync::Arc;

/// Turns raw device frames into upright frames in the output format
pub trait FrameConverter: Send + Sync {
    /// Rotate `raw` clockwise by `rotation` and convert it to `target`
    fn normalize(
        &self,
        raw: &RawFrame,
        rotation: Rotation,
        target: OutputImageFormat,
    ) -> Result<NormalizedFrame, ConversionError>;
}

/// CPU implementation of [`FrameConverter`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareConverter;

impl FrameConverter for SoftwareConverter {
    fn normalize(
        &self,
        raw: &RawFrame,
        rotation: Rotation,
        target: OutputImageFormat,
    ) -> Result<NormalizedFrame, ConversionError> {
        validate(raw)?;

        let (width, height, data) = match (raw.format, rotation, target) {
            // Already upright NV12 only needs the row padding removed
            (PixelFormat::Nv12, Rotation::Degrees0, OutputImageFormat::Yuv420) => {
                (raw.width, raw.height, pack_nv12(raw))
            }
            _ => {
                let upright = rotate(decode_rgba(raw)?, rotation);
                let (w, h) = upright.dimensions();
                let data = match target {
                    OutputImageFormat::Rgba8888 => upright.into_raw(),
                    OutputImageFormat::Yuv420 => rgba_to_nv12(upright.as_raw(), w, h),
                };
                (w, h, data)
            }
        };

        Ok(NormalizedFrame {
            width,
            height,
            format: target,
            data: Arc::from(data),
            sequence: raw.sequence,
            captured_at: raw.captured_at,
        })
    }
}

fn validate(raw: &RawFrame) -> Result<(), ConversionError> {
    let invalid = ConversionError::InvalidDimensions {
        width: raw.width,
        height: raw.height,
        stride: raw.stride,
    };
    let row_fits = raw
        .format
        .min_stride(raw.width)
        .is_some_and(|min| raw.stride >= min);
    if raw.width == 0 || raw.height == 0 || !row_fits {
        return Err(invalid);
    }
    if raw.format == PixelFormat::Nv12 && (raw.width % 2 != 0 || raw.height % 2 != 0) {
        return Err(ConversionError::UnsupportedGeometry(format!(
            "NV12 frame with odd dimensions {}x{}",
            raw.width, raw.height
        )));
    }
    let expected = raw
        .format
        .frame_len(raw.stride, raw.height)
        .ok_or(invalid)?;
    if raw.data.len() < expected {
        return Err(ConversionError::BufferTooSmall {
            expected,
            actual: raw.data.len(),
        });
    }
    Ok(())
}

fn rotate(image: RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Degrees0 => image,
        Rotation::Degrees90 => imageops::rotate90(&image),
        Rotation::Degrees180 => imageops::rotate180(&image),
        Rotation::Degrees270 => imageops::rotate270(&image),
    }
}

/// Decode any supported raw format into a tightly packed RGBA image
fn decode_rgba(raw: &RawFrame) -> Result<RgbaImage, ConversionError> {
    let (w, h, stride) = (raw.width as usize, raw.height as usize, raw.stride as usize);
    let mut rgba = Vec::with_capacity(w * h * 4);

    match raw.format {
        PixelFormat::Rgba => {
            for row in raw.data.chunks(stride).take(h) {
                rgba.extend_from_slice(&row[..w * 4]);
            }
        }
        PixelFormat::Rgb24 => {
            for row in raw.data.chunks(stride).take(h) {
                for px in row[..w * 3].chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
            }
        }
        PixelFormat::Gray8 => {
            for row in raw.data.chunks(stride).take(h) {
                for &g in &row[..w] {
                    rgba.extend_from_slice(&[g, g, g, 255]);
                }
            }
        }
        PixelFormat::Yuyv => {
            // YUYV: Y0 U Y1 V - processes 2 pixels at a time
            for row in raw.data.chunks(stride).take(h) {
                let mut remaining = w;
                for chunk in row.chunks_exact(4) {
                    let (u, v) = (chunk[1], chunk[3]);
                    for y in [chunk[0], chunk[2]] {
                        if remaining == 0 {
                            break;
                        }
                        rgba.extend_from_slice(&yuv_to_rgba(y, u, v));
                        remaining -= 1;
                    }
                    if remaining == 0 {
                        break;
                    }
                }
            }
        }
        PixelFormat::Nv12 => {
            let uv_plane = &raw.data[stride * h..];
            for y in 0..h {
                let y_row = &raw.data[y * stride..];
                let uv_row = &uv_plane[(y / 2) * stride..];
                for x in 0..w {
                    let uv = (x / 2) * 2;
                    rgba.extend_from_slice(&yuv_to_rgba(y_row[x], uv_row[uv], uv_row[uv + 1]));
                }
            }
        }
    }

    RgbaImage::from_raw(raw.width, raw.height, rgba).ok_or(ConversionError::BufferTooSmall {
        expected: w * h * 4,
        actual: 0,
    })
}

/// Convert one YUV sample to RGBA (BT.601, full range)
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = (y + 1.402 * v).round().clamp(0.0, 255.0) as u8;
    let g = (y - 0.344 * u - 0.714 * v).round().clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).round().clamp(0.0, 255.0) as u8;
    [r, g, b, 255]
}

/// Encode tightly packed RGBA into NV12
///
/// Chroma is the average of each 2x2 block; odd edges reuse the last pixel.
pub(crate) fn rgba_to_nv12(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut out = Vec::with_capacity(w * h + cw * ch * 2);

    for px in rgba.chunks_exact(4) {
        out.push(super::types::rgb_to_luma(px[0], px[1], px[2]));
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b) = (0f32, 0f32, 0f32);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let x = (cx * 2 + dx).min(w - 1);
                let y = (cy * 2 + dy).min(h - 1);
                let i = (y * w + x) * 4;
                r += rgba[i] as f32;
                g += rgba[i + 1] as f32;
                b += rgba[i + 2] as f32;
            }
            let (u, v) = rgb_to_chroma(r / 4.0, g / 4.0, b / 4.0);
            out.push(u);
            out.push(v);
        }
    }

    out
}

/// Chroma of one RGB sample (BT.601, full range)
pub(crate) fn rgb_to_chroma(r: f32, g: f32, b: f32) -> (u8, u8) {
    let u = -0.1687 * r - 0.3313 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.4187 * g - 0.0813 * b + 128.0;
    (u.round().clamp(0.0, 255.0) as u8, v.round().clamp(0.0, 255.0) as u8)
}

/// Copy an NV12 frame without row padding
fn pack_nv12(raw: &RawFrame) -> Vec<u8> {
    let (w, h, stride) = (raw.width as usize, raw.height as usize, raw.stride as usize);
    let mut out = Vec::with_capacity(w * h * 3 / 2);
    for row in raw.data.chunks(stride).take(h + h / 2) {
        out.extend_from_slice(&row[..w]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba_frame(width: u32, height: u32, pixels: &[[u8; 4]]) -> RawFrame {
        let data: Vec<u8> = pixels.iter().flatten().copied().collect();
        RawFrame::new(width, height, PixelFormat::Rgba, data)
    }

    #[test]
    fn test_rotate_90_moves_top_left_to_top_right() {
        let red = [255, 0, 0, 255];
        let blue = [0, 0, 255, 255];
        // 2x1: red, blue
        let raw = rgba_frame(2, 1, &[red, blue]);
        let out = SoftwareConverter
            .normalize(&raw, Rotation::Degrees90, OutputImageFormat::Rgba8888)
            .unwrap();

        assert_eq!((out.width, out.height), (1, 2));
        assert_eq!(&out.data[0..4], &red);
        assert_eq!(&out.data[4..8], &blue);
    }

    #[test]
    fn test_rotate_180_reverses_pixels() {
        let a = [1, 2, 3, 255];
        let b = [4, 5, 6, 255];
        let raw = rgba_frame(2, 1, &[a, b]);
        let out = SoftwareConverter
            .normalize(&raw, Rotation::Degrees180, OutputImageFormat::Rgba8888)
            .unwrap();
        assert_eq!(&out.data[0..4], &b);
        assert_eq!(&out.data[4..8], &a);
    }

    #[test]
    fn test_gray_round_trips_through_nv12() {
        let raw = RawFrame::new(4, 2, PixelFormat::Gray8, vec![0u8, 64, 128, 255, 10, 20, 30, 40]);
        let out = SoftwareConverter
            .normalize(&raw, Rotation::Degrees0, OutputImageFormat::Yuv420)
            .unwrap();

        assert_eq!(out.data.len(), OutputImageFormat::Yuv420.buffer_len(4, 2));
        assert_eq!(&out.data[..8], &[0, 64, 128, 255, 10, 20, 30, 40]);
        assert!(out.data[8..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_nv12_passthrough_strips_stride() {
        // 2x2 frame, stride 4: Y rows then one UV row
        let data = vec![
            10, 20, 0, 0, // Y row 0
            30, 40, 0, 0, // Y row 1
            100, 150, 0, 0, // UV row
        ];
        let mut raw = RawFrame::new(2, 2, PixelFormat::Nv12, data);
        raw.stride = 4;

        let out = SoftwareConverter
            .normalize(&raw, Rotation::Degrees0, OutputImageFormat::Yuv420)
            .unwrap();
        assert_eq!(&out.data[..], &[10, 20, 30, 40, 100, 150]);
    }

    #[test]
    fn test_yuyv_decodes_both_pixels() {
        // Y0=50 U=128 Y1=200 V=128 - neutral chroma
        let raw = RawFrame::new(2, 1, PixelFormat::Yuyv, vec![50u8, 128, 200, 128]);
        let out = SoftwareConverter
            .normalize(&raw, Rotation::Degrees0, OutputImageFormat::Rgba8888)
            .unwrap();
        assert_eq!(&out.data[..], &[50, 50, 50, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let raw = RawFrame::new(4, 4, PixelFormat::Rgba, vec![0u8; 10]);
        let err = SoftwareConverter
            .normalize(&raw, Rotation::Degrees0, OutputImageFormat::Rgba8888)
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::BufferTooSmall {
                expected: 64,
                actual: 10
            }
        );
    }

    #[test]
    fn test_zero_sized_frame_is_rejected() {
        let raw = RawFrame::new(0, 4, PixelFormat::Gray8, vec![0u8; 4]);
        assert!(matches!(
            SoftwareConverter.normalize(&raw, Rotation::Degrees0, OutputImageFormat::Yuv420),
            Err(ConversionError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_overflowing_row_size_is_rejected() {
        let mut raw = RawFrame::new(4, 1, PixelFormat::Rgba, vec![0u8; 16]);
        raw.width = 0x4000_0001;
        raw.stride = 4;
        let err = SoftwareConverter
            .normalize(&raw, Rotation::Degrees0, OutputImageFormat::Rgba8888)
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::InvalidDimensions {
                width: 0x4000_0001,
                height: 1,
                stride: 4
            }
        );

        let mut raw = RawFrame::new(1, 1, PixelFormat::Gray8, vec![0u8; 4]);
        raw.stride = u32::MAX;
        raw.height = u32::MAX;
        assert!(
            SoftwareConverter
                .normalize(&raw, Rotation::Degrees0, OutputImageFormat::Yuv420)
                .is_err()
        );
    }

    #[test]
    fn test_metadata_is_carried_over() {
        let raw = RawFrame::new(2, 2, PixelFormat::Gray8, vec![0u8; 4]).with_sequence(42);
        let out = SoftwareConverter
            .normalize(&raw, Rotation::Degrees270, OutputImageFormat::Yuv420)
            .unwrap();
        assert_eq!(out.sequence, 42);
        assert_eq!(out.captured_at, raw.captured_at);
    }
}
