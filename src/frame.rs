//! Frame type and in-engine raster annotations.
//!
//! The timestamp overlay is rendered here rather than delegated to the
//! media collaborator: every photo and video frame that leaves the engine
//! carries it. The text is drawn as a dark outline under a light fill in
//! the bottom-left corner so it stays legible on any background.

use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};

/// One sampled camera image at a point in time.
///
/// Width, height and pixel format are fixed for the lifetime of a capture
/// session. The frame is owned by the pipeline stage currently processing
/// it and is not mutated after motion detection has observed it, except
/// for the annotation pass that prepares it for media output.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(timestamp: DateTime<Utc>, image: RgbImage) -> Self {
        Self { timestamp, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Axis-aligned pixel rectangle, used for the most motion-active region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

/// 5x7 bitmap glyphs for the characters a rendered timestamp needs.
/// Each byte is one row, low 5 bits used, MSB-side bit is the left column.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}

fn put_if_inside(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_text(image: &mut RgbImage, text: &str, x0: u32, y0: u32) {
    const OUTLINE: Rgb<u8> = Rgb([0, 0, 0]);
    const FILL: Rgb<u8> = Rgb([255, 255, 255]);

    let mut cx = x0 as i64;
    for c in text.chars() {
        let Some(rows) = glyph(c) else {
            cx += (GLYPH_W + 1) as i64;
            continue;
        };
        for (ry, row) in rows.iter().enumerate() {
            for rx in 0..GLYPH_W {
                if row & (1 << (GLYPH_W - 1 - rx)) == 0 {
                    continue;
                }
                let px = cx + rx as i64;
                let py = y0 as i64 + ry as i64;
                // Outline first, fill on top, same trick as drawing the
                // text twice with decreasing thickness.
                for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
                    put_if_inside(image, px + dx, py + dy, OUTLINE);
                }
                put_if_inside(image, px, py, FILL);
            }
        }
        cx += (GLYPH_W + 1) as i64;
    }
}

/// Stamps the frame timestamp in the bottom-left corner of the image.
/// Frames too small to hold the text are left untouched.
pub fn stamp_timestamp(frame: &mut Frame) {
    let text = frame.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
    let needed_w = text.len() as u32 * (GLYPH_W + 1) + 2;
    let needed_h = GLYPH_H + 4;
    if frame.width() < needed_w || frame.height() < needed_h {
        return;
    }
    let y0 = frame.height() - GLYPH_H - 3;
    draw_text(&mut frame.image, &text, 2, y0);
}

/// Draws a one pixel wide rectangle marking a motion region.
pub fn draw_rect(image: &mut RgbImage, rect: &Rect) {
    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || rect.w == 0 || rect.h == 0 {
        return;
    }
    let x1 = rect.x.min(w - 1);
    let y1 = rect.y.min(h - 1);
    let x2 = (rect.x + rect.w - 1).min(w - 1);
    let y2 = (rect.y + rect.h - 1).min(h - 1);

    for x in x1..=x2 {
        image.put_pixel(x, y1, GREEN);
        image.put_pixel(x, y2, GREEN);
    }
    for y in y1..=y2 {
        image.put_pixel(x1, y, GREEN);
        image.put_pixel(x2, y, GREEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn black_frame(w: u32, h: u32) -> Frame {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        Frame::new(ts, RgbImage::new(w, h))
    }

    #[test]
    fn timestamp_overlay_paints_bottom_left() {
        let mut frame = black_frame(160, 120);
        stamp_timestamp(&mut frame);

        let lit = frame
            .image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 == [255, 255, 255])
            .count();
        assert!(lit > 0, "overlay should paint fill pixels");

        // Everything painted stays in the bottom text band.
        for (_, y, p) in frame.image.enumerate_pixels() {
            if p.0 != [0, 0, 0] {
                assert!(y >= 120 - GLYPH_H - 4);
            }
        }
    }

    #[test]
    fn timestamp_overlay_skips_tiny_frames() {
        let mut frame = black_frame(20, 8);
        stamp_timestamp(&mut frame);
        assert!(frame.image.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn rect_outline_is_drawn_and_clamped() {
        let mut image = RgbImage::new(32, 32);
        draw_rect(
            &mut image,
            &Rect {
                x: 4,
                y: 4,
                w: 10,
                h: 8,
            },
        );
        assert_eq!(image.get_pixel(4, 4).0, [0, 255, 0]);
        assert_eq!(image.get_pixel(13, 11).0, [0, 255, 0]);
        assert_eq!(image.get_pixel(8, 8).0, [0, 0, 0]);

        // Rectangle spilling over the edge must not panic.
        let mut image = RgbImage::new(16, 16);
        draw_rect(
            &mut image,
            &Rect {
                x: 10,
                y: 10,
                w: 20,
                h: 20,
            },
        );
        assert_eq!(image.get_pixel(15, 15).0, [0, 255, 0]);
    }
}
