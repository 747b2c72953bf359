//! Legend colour sampling, naming and area estimation.

use image::RgbImage;

/// Named colours used to describe a sampled legend colour
const PALETTE: [([u8; 3], &str); 25] = [
    ([255, 0, 0], "Red"),
    ([0, 255, 0], "Green"),
    ([0, 0, 255], "Blue"),
    ([255, 255, 0], "Yellow"),
    ([0, 255, 255], "Cyan"),
    ([255, 0, 255], "Magenta"),
    ([255, 255, 255], "White"),
    ([0, 0, 0], "Black"),
    ([128, 128, 128], "Gray"),
    ([128, 0, 0], "Maroon"),
    ([128, 128, 0], "Olive"),
    ([0, 128, 0], "Dark Green"),
    ([128, 0, 128], "Purple"),
    ([0, 128, 128], "Teal"),
    ([0, 0, 128], "Navy"),
    ([255, 192, 203], "Pink"),
    ([255, 165, 0], "Orange"),
    ([0, 255, 127], "Spring Green"),
    ([255, 105, 180], "Hot Pink"),
    ([255, 69, 0], "Red-Orange"),
    ([102, 205, 170], "Medium Aquamarine"),
    ([173, 216, 230], "Light Blue"),
    ([240, 230, 140], "Khaki"),
    ([255, 20, 147], "Deep Pink"),
    ([255, 99, 71], "Tomato"),
];

pub const WHITE: [u8; 3] = [255, 255, 255];

/// Threshold used when there is only one legend colour to compare against.
const SINGLE_COLOR_THRESHOLD: f64 = 10.0;

/// Per-channel median of the pixels that are not near-black.
///
/// Swatch borders and hatching are dark, so pixels whose channels are all
/// below `near_black` are ignored. `None` if nothing is left.
pub fn median_color(image: &RgbImage, near_black: u8) -> Option<[u8; 3]> {
    let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for p in image.pixels() {
        if p.0.iter().all(|&c| c < near_black) {
            continue;
        }
        for (i, c) in p.0.iter().enumerate() {
            channels[i].push(*c);
        }
    }
    if channels[0].is_empty() {
        return None;
    }

    let mut out = [0u8; 3];
    for (i, values) in channels.iter_mut().enumerate() {
        values.sort_unstable();
        let n = values.len();
        out[i] = if n % 2 == 1 {
            values[n / 2]
        } else {
            ((values[n / 2 - 1] as u16 + values[n / 2] as u16) / 2) as u8
        };
    }
    Some(out)
}

/// Closest palette name by squared Euclidean distance in RGB
pub fn nearest_color_name(rgb: [u8; 3]) -> &'static str {
    PALETTE
        .iter()
        .min_by_key(|(c, _)| {
            c.iter()
                .zip(rgb.iter())
                .map(|(a, b)| (*a as i32 - *b as i32).pow(2))
                .sum::<i32>()
        })
        .map(|(_, name)| *name)
        .unwrap_or("Unknown")
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

fn l1(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs())
        .sum()
}

/// Match threshold for each colour: half the L1 distance to its closest
/// *different* legend colour, so neighbouring colours never claim the same pixel.
pub fn color_thresholds(colors: &[[u8; 3]]) -> Vec<f64> {
    colors
        .iter()
        .map(|c| {
            colors
                .iter()
                .filter(|other| *other != c)
                .map(|other| l1(*c, *other))
                .min()
                .map(|d| d as f64 / 2.0)
                .unwrap_or(SINGLE_COLOR_THRESHOLD)
        })
        .collect()
}

/// Nearest-neighbour downsample taking the top-left pixel of each block.
fn downsample_nearest(image: &RgbImage, width: u32, height: u32, factor: u32) -> RgbImage {
    let max_x = image.width().saturating_sub(1);
    let max_y = image.height().saturating_sub(1);
    RgbImage::from_fn(width, height, |x, y| {
        *image.get_pixel((x * factor).min(max_x), (y * factor).min(max_y))
    })
}

/// Fraction of the main map covered by each legend colour.
///
/// The map is downsampled by `downsample` (nearest neighbour) first. White
/// entries are background and get 0. Fractions are rounded to 6 decimals.
pub fn area_fractions(main_map: &RgbImage, colors: &[[u8; 3]], downsample: u32) -> Vec<f64> {
    let downsample = downsample.max(1);
    let width = (main_map.width() / downsample).max(1);
    let height = (main_map.height() / downsample).max(1);
    let small = downsample_nearest(main_map, width, height, downsample);
    let total = (width as f64) * (height as f64);

    let thresholds = color_thresholds(colors);
    colors
        .iter()
        .zip(thresholds)
        .map(|(color, threshold)| {
            if *color == WHITE {
                return 0.0;
            }
            let hits = small
                .pixels()
                .filter(|p| l1(p.0, *color) as f64 <= threshold)
                .count();
            (hits as f64 / total * 1e6).round() / 1e6
        })
        .collect()
}
