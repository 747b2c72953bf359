//! Compass-direction overlay for index maps.
//!
//! Labels are drawn with a built-in 5x7 bitmap font covering only the
//! letters `N`, `S`, `E` and `W`; other characters are skipped.

use image::{imageops, Rgb, RgbImage};

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const GAP: u32 = 1;

const LABEL_COLOR: Rgb<u8> = Rgb([220, 0, 0]);

/// 5x7 bitmap rows (most significant bit leftmost) for `N`, `S`, `E`, `W`.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        _ => return None,
    };
    Some(rows)
}

fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    (n * GLYPH_W + (n - 1) * GAP) * scale
}

/// Draw `text` centred on `(cx, cy)`. Pixels outside the canvas are skipped.
fn draw_label(canvas: &mut RgbImage, text: &str, cx: u32, cy: u32, scale: u32) {
    let w = text_width(text, scale);
    let h = GLYPH_H * scale;
    let left = cx.saturating_sub(w / 2);
    let top = cy.saturating_sub(h / 2);

    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else { continue };
        let gx = left + i as u32 * (GLYPH_W + GAP) * scale;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = gx + col * scale + dx;
                        let y = top + row as u32 * scale + dy;
                        if x < canvas.width() && y < canvas.height() {
                            canvas.put_pixel(x, y, LABEL_COLOR);
                        }
                    }
                }
            }
        }
    }
}

/// Pad the index map with a white margin and write the eight compass
/// directions around it, so the model can tell which neighbour sheet is where.
pub fn annotate_directions(image: &RgbImage, margin: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let m = margin;
    let mut canvas = RgbImage::from_pixel(w + 2 * m, h + 2 * m, Rgb([255, 255, 255]));
    imageops::replace(&mut canvas, image, m as i64, m as i64);

    if m == 0 {
        return canvas;
    }

    let scale = ((m * 6 / 10) / GLYPH_H).max(1);
    let (left, centre_x, right) = (m / 2, m + w / 2, m + w + m / 2);
    let (top, centre_y, bottom) = (m / 2, m + h / 2, m + h + m / 2);

    let labels = [
        ("NW", left, top),
        ("N", centre_x, top),
        ("NE", right, top),
        ("W", left, centre_y),
        ("E", right, centre_y),
        ("SW", left, bottom),
        ("S", centre_x, bottom),
        ("SE", right, bottom),
    ];
    for (text, x, y) in labels {
        draw_label(&mut canvas, text, x, y, scale);
    }
    canvas
}
