// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic test pattern frames

use crate::backends::camera::converter::{rgb_to_chroma, rgba_to_nv12};
use crate::backends::camera::types::{PixelFormat, RawFrame, rgb_to_luma};

/// SMPTE-style colour bars
const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Render frame `tick` of the pattern: colour bars scrolling one column per tick
pub fn render(format: PixelFormat, width: u32, height: u32, tick: u64) -> RawFrame {
    let rgba = render_rgba(width, height, tick);
    let data = match format {
        PixelFormat::Rgba => rgba,
        PixelFormat::Rgb24 => rgba
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelFormat::Gray8 => rgba
            .chunks_exact(4)
            .map(|px| rgb_to_luma(px[0], px[1], px[2]))
            .collect(),
        PixelFormat::Nv12 => rgba_to_nv12(&rgba, width, height),
        PixelFormat::Yuyv => encode_yuyv(&rgba, width, height),
    };
    RawFrame::new(width, height, format, data).with_sequence(tick)
}

fn render_rgba(width: u32, height: u32, tick: u64) -> Vec<u8> {
    let bar_width = (width as u64 / BARS.len() as u64).max(1);
    let mut out = Vec::with_capacity(width as usize * height as usize * 4);
    for _ in 0..height {
        for x in 0..width as u64 {
            let bar = ((x + tick) / bar_width) as usize % BARS.len();
            let [r, g, b] = BARS[bar];
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }
    out
}

fn encode_yuyv(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let stride = w.div_ceil(2) * 4;
    let mut out = Vec::with_capacity(stride * height as usize);
    for row in rgba.chunks_exact(w * 4) {
        for pair in row.chunks(8) {
            let first = &pair[..4];
            let second = pair.get(4..8).unwrap_or(first);
            let r = (first[0] as f32 + second[0] as f32) / 2.0;
            let g = (first[1] as f32 + second[1] as f32) / 2.0;
            let b = (first[2] as f32 + second[2] as f32) / 2.0;
            let (u, v) = rgb_to_chroma(r, g, b);
            out.extend_from_slice(&[
                rgb_to_luma(first[0], first[1], first[2]),
                u,
                rgb_to_luma(second[0], second[1], second[2]),
                v,
            ]);
        }
    }
    out
}
