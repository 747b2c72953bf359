//! Legend pairing: match colour swatches to their labels.

pub mod extract;

pub use extract::LegendExtractor;

use crate::meta::BBox;
use serde::Deserialize;

/// Sub-boxes detected inside a legend crop, in crop coordinates
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegendBoxes {
    #[serde(default, rename = "color_bndbox")]
    pub color: Vec<BBox>,
    #[serde(default, rename = "text_bndbox")]
    pub text: Vec<BBox>,
}

/// Strategy producing one-to-one (colour, text) box pairs
pub trait PairingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pair colour boxes with text boxes. `legend_width` is the crop width.
    fn pair(&self, boxes: &LegendBoxes, legend_width: u32) -> Vec<(BBox, BBox)>;
}

/// Distance from the right edge of a swatch to the left edge of a label,
/// both taken at their vertical centres.
fn directed_distance(color: &BBox, text: &BBox) -> f64 {
    let dx = color.x1 as f64 - text.x0 as f64;
    let dy = color.center_y() - text.center_y();
    (dx * dx + dy * dy).sqrt()
}

/// Greedy nearest-label pairing over detected text boxes.
///
/// Colour boxes are visited in detection order. Each claims the closest
/// unclaimed text box, provided it lies within the swatch's own height.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestTextPairing;

impl PairingStrategy for NearestTextPairing {
    fn name(&self) -> &'static str {
        "nearest_text"
    }

    fn pair(&self, boxes: &LegendBoxes, _legend_width: u32) -> Vec<(BBox, BBox)> {
        let mut pool: Vec<BBox> = boxes.text.clone();
        let mut pairs = Vec::new();

        for color in &boxes.color {
            let mut best: Option<(usize, f64)> = None;
            for (i, text) in pool.iter().enumerate() {
                let d = directed_distance(color, text);
                if best.map_or(true, |(_, min)| d < min) {
                    best = Some((i, d));
                }
            }

            match best {
                Some((i, d)) if d <= color.height() as f64 => {
                    pairs.push((*color, pool.remove(i)));
                }
                _ => log::debug!("Legend swatch {:?} left unpaired", <[i32; 4]>::from(*color)),
            }
        }
        pairs
    }
}

/// Derives label extents from swatch column geometry alone.
///
/// Swatches are grouped into columns; a label spans from the right edge of
/// its swatch column to the left edge of the next column (or the legend edge).
#[derive(Debug, Default, Clone, Copy)]
pub struct ColumnTabulationPairing;

impl ColumnTabulationPairing {
    /// Box centre strictly inside the column's x-range
    fn overlaps(column: (i32, i32), bbox: &BBox) -> bool {
        let x = (bbox.x0 as f64 + bbox.x1 as f64) / 2.0;
        (column.0 as f64) < x && x < column.1 as f64
    }

    fn columns(colors: &[BBox], legend_width: u32) -> Vec<(i32, i32)> {
        let mut visited = vec![false; colors.len()];
        let mut columns = Vec::new();
        loop {
            let mut anchor: Option<(i32, i32)> = None;
            for (i, bbox) in colors.iter().enumerate() {
                if visited[i] {
                    continue;
                }
                match anchor {
                    None => {
                        anchor = Some((bbox.x0, bbox.x1));
                        visited[i] = true;
                    }
                    Some(col) if Self::overlaps(col, bbox) => visited[i] = true,
                    Some(_) => {}
                }
            }
            match anchor {
                Some(col) => columns.push(col),
                None => break,
            }
        }
        columns.sort_by_key(|c| c.0);
        columns.push((legend_width as i32, legend_width as i32));
        columns
    }
}

impl PairingStrategy for ColumnTabulationPairing {
    fn name(&self) -> &'static str {
        "column_tabulation"
    }

    fn pair(&self, boxes: &LegendBoxes, legend_width: u32) -> Vec<(BBox, BBox)> {
        let columns = Self::columns(&boxes.color, legend_width);
        boxes
            .color
            .iter()
            .filter_map(|color| {
                let idx = columns.iter().position(|c| Self::overlaps(*c, color))?;
                let next = columns.get(idx + 1)?;
                let text = BBox::new(columns[idx].1, color.y0, next.0, color.y1);
                (text.x0 < text.x1 && text.y0 < text.y1).then_some((*color, text))
            })
            .collect()
    }
}
