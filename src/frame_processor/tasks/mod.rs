// SPDX-License-Identifier: GPL-3.0-only

//! Built-in frame processing tasks
//!
//! This module contains the processors shipped with the crate and the small
//! drawing helpers they share for overlays.

pub mod luma_stats;
pub mod qr_detector;

pub use luma_stats::LumaStats;
pub use qr_detector::QrDetector;

use image::{Rgba, RgbaImage};

/// Draw a rectangle outline, clipped to the canvas
pub(crate) fn draw_rect_outline(
    canvas: &mut RgbaImage,
    (x, y, width, height): (u32, u32, u32, u32),
    thickness: u32,
    color: Rgba<u8>,
) {
    let (cw, ch) = canvas.dimensions();
    if width == 0 || height == 0 || x >= cw || y >= ch {
        return;
    }
    let x1 = (x + width).min(cw);
    let y1 = (y + height).min(ch);

    for py in y..y1 {
        for px in x..x1 {
            let on_edge = px < x + thickness
                || px + thickness >= x1
                || py < y + thickness
                || py + thickness >= y1;
            if on_edge {
                canvas.put_pixel(px, py, color);
            }
        }
    }
}

/// Fill a rectangle, clipped to the canvas
pub(crate) fn fill_rect(
    canvas: &mut RgbaImage,
    (x, y, width, height): (u32, u32, u32, u32),
    color: Rgba<u8>,
) {
    let (cw, ch) = canvas.dimensions();
    for py in y..(y + height).min(ch) {
        for px in x..(x + width).min(cw) {
            canvas.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outline_leaves_interior_untouched() {
        let mut canvas = RgbaImage::new(6, 6);
        let red = Rgba([255, 0, 0, 255]);
        draw_rect_outline(&mut canvas, (1, 1, 4, 4), 1, red);

        assert_eq!(*canvas.get_pixel(1, 1), red);
        assert_eq!(*canvas.get_pixel(4, 4), red);
        assert_eq!(canvas.get_pixel(2, 2).0, [0, 0, 0, 0]);
        assert_eq!(canvas.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_shapes_clip_to_canvas() {
        let mut canvas = RgbaImage::new(4, 4);
        let white = Rgba([255; 4]);
        fill_rect(&mut canvas, (2, 2, 10, 10), white);
        draw_rect_outline(&mut canvas, (3, 3, 10, 10), 2, white);
        draw_rect_outline(&mut canvas, (9, 9, 2, 2), 1, white);
        assert_eq!(*canvas.get_pixel(3, 3), white);
        assert_eq!(canvas.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }
}
