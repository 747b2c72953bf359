use super::{LegendBoxes, NearestTextPairing, PairingStrategy};
use crate::error::Result;
use crate::inference::{ContentPart, InferenceService, Message};
use crate::meta::{unknown, BBox, LegendEntry};
use crate::vision::{self, color};
use image::RgbImage;
use std::collections::BTreeMap;
use std::sync::Arc;

const OCR_SYSTEM_PROMPT: &str = "You are an OCR expert.";
const OCR_INSTRUCTION: &str = "Only output the OCR result of the given image.";

/// Columns whose darkest pixel is at least this light count as blank.
const BLANK_GRAY: u8 = 224;

/// Builds legend entries from a legend crop: pairs boxes, samples swatch
/// colours and OCRs the labels.
pub struct LegendExtractor {
    inference: Arc<dyn InferenceService>,
    strategy: Box<dyn PairingStrategy>,
    near_black: u8,
}

impl LegendExtractor {
    pub fn new(inference: Arc<dyn InferenceService>, near_black: u8) -> Self {
        Self {
            inference,
            strategy: Box::new(NearestTextPairing),
            near_black,
        }
    }

    /// Replace the pairing strategy
    pub fn with_strategy(mut self, strategy: Box<dyn PairingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Entries keyed by sequence number, boxes in full-image coordinates.
    ///
    /// Lithology and age are left `unknown`; area is left 0.
    pub async fn extract(
        &self,
        legend: &RgbImage,
        legend_bbox: &BBox,
        boxes: &LegendBoxes,
    ) -> Result<BTreeMap<u32, LegendEntry>> {
        let pairs = self.strategy.pair(boxes, legend.width());
        log::info!(
            "Paired {} of {} legend swatches ({})",
            pairs.len(),
            boxes.color.len(),
            self.strategy.name()
        );

        let mut entries = BTreeMap::new();
        for (idx, (color_box, text_box)) in pairs.into_iter().enumerate() {
            let text_box = shrink_text_box(legend, &text_box);
            let rgb = self.sample_color(legend, &color_box)?;
            let text = self.read_label(legend, &text_box).await?;

            entries.insert(
                idx as u32,
                LegendEntry {
                    color_bndbox: color_box.offset(legend_bbox.x0, legend_bbox.y0),
                    text_bndbox: text_box.offset(legend_bbox.x0, legend_bbox.y0),
                    color: rgb,
                    color_name: color::nearest_color_name(rgb).to_string(),
                    color_hex: color::to_hex(rgb),
                    text,
                    lithology: unknown(),
                    stratigraphic_age: unknown(),
                    area: 0.0,
                },
            );
        }
        Ok(entries)
    }

    /// Median swatch colour; boxes outside the crop sample as white.
    fn sample_color(&self, legend: &RgbImage, bbox: &BBox) -> Result<[u8; 3]> {
        if !bbox.is_usable(legend.width(), legend.height()) {
            return Ok(color::WHITE);
        }
        let swatch = vision::crop(legend, bbox)?;
        Ok(color::median_color(&swatch, self.near_black).unwrap_or([0, 0, 0]))
    }

    /// OCR one label through the inference service.
    async fn read_label(&self, legend: &RgbImage, bbox: &BBox) -> Result<String> {
        if !bbox.is_usable(legend.width(), legend.height()) {
            return Ok(unknown());
        }
        let label = vision::crop(legend, bbox)?;
        let url = vision::data_url(&vision::encode_png(&label)?, "image/png");
        let messages = [
            Message::system(OCR_SYSTEM_PROMPT),
            Message::user(vec![ContentPart::image(url), ContentPart::text(OCR_INSTRUCTION)]),
        ];

        Ok(match self.inference.complete(&messages, false).await {
            Some(raw) => clean_ocr_text(&raw),
            None => {
                log::warn!("No OCR answer for legend label, using unknown");
                unknown()
            }
        })
    }
}

/// Keep what follows the last (full- or half-width) colon, without dashes.
pub fn clean_ocr_text(raw: &str) -> String {
    let tail = raw.rsplit(':').next().unwrap_or(raw);
    let tail = tail.rsplit('：').next().unwrap_or(tail);
    tail.trim().trim_matches('-').to_string()
}

fn gray(p: &image::Rgb<u8>) -> u8 {
    let [r, g, b] = p.0;
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round() as u8
}

/// Trim blank columns on both sides of a label box. The result never grows
/// past the original box; a box that is blank throughout is left unchanged.
pub fn shrink_text_box(image: &RgbImage, bbox: &BBox) -> BBox {
    if !bbox.is_usable(image.width(), image.height()) {
        return *bbox;
    }
    let width = bbox.width() as usize;
    let column_min: Vec<u8> = (bbox.x0..bbox.x1)
        .map(|x| {
            (bbox.y0..bbox.y1)
                .map(|y| gray(image.get_pixel(x as u32, y as u32)))
                .min()
                .unwrap_or(255)
        })
        .collect();

    let mut dx0 = width / 100;
    while dx0 < width && column_min[dx0] >= BLANK_GRAY {
        dx0 += 1;
    }
    let mut dx1 = (width * 99 / 100).saturating_sub(1);
    while dx1 > dx0 && column_min[dx1] >= BLANK_GRAY {
        dx1 -= 1;
    }

    let x0 = (bbox.x0 + dx0 as i32 - 1).max(bbox.x0);
    let x1 = (bbox.x0 + dx1 as i32 + 1).min(bbox.x1);
    if x0 >= x1 {
        return *bbox;
    }
    BBox::new(x0, bbox.y0, x1, bbox.y1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedInference;
    use image::Rgb;

    /// 100x30 legend: red swatch + dark label, blue swatch + dark label
    fn legend_image() -> RgbImage {
        RgbImage::from_fn(100, 30, |x, y| {
            if x < 20 && y < 12 {
                Rgb([220, 30, 30])
            } else if x < 20 && y >= 15 && y < 27 {
                Rgb([30, 30, 220])
            } else if (40..70).contains(&x) && (y < 12 || (15..27).contains(&y)) {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn test_clean_ocr_text() {
        assert_eq!(clean_ocr_text("Unit: Granite"), "Granite");
        assert_eq!(clean_ocr_text("图例：花岗岩"), "花岗岩");
        assert_eq!(clean_ocr_text("- Basalt -"), "Basalt");
        assert_eq!(clean_ocr_text("Sandstone"), "Sandstone");
    }

    #[test]
    fn test_shrink_text_box_trims_blank_columns() {
        let img = legend_image();
        let shrunk = shrink_text_box(&img, &BBox::new(22, 0, 100, 12));
        assert_eq!(shrunk, BBox::new(39, 0, 70, 12));
    }

    #[test]
    fn test_shrink_blank_box_unchanged() {
        let img = RgbImage::from_pixel(50, 10, Rgb([255, 255, 255]));
        let b = BBox::new(0, 0, 50, 10);
        assert_eq!(shrink_text_box(&img, &b), b);
    }

    #[tokio::test]
    async fn test_extract_entries() {
        let inference = Arc::new(ScriptedInference::new().on(OCR_INSTRUCTION, "Unit: Granite"));
        let extractor = LegendExtractor::new(inference.clone(), 16);
        let boxes = LegendBoxes {
            color: vec![BBox::new(0, 0, 20, 12), BBox::new(0, 15, 20, 27), BBox::new(0, 0, 20, 99)],
            text: vec![BBox::new(22, 0, 100, 12), BBox::new(22, 15, 100, 27)],
        };
        let entries = extractor
            .extract(&legend_image(), &BBox::new(300, 200, 400, 230), &boxes)
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[&0].color, [220, 30, 30]);
        assert_eq!(entries[&0].color_name, "Red");
        assert_eq!(entries[&1].color_name, "Blue");
        assert_eq!(entries[&0].text, "Granite");
        assert_eq!(entries[&0].color_bndbox, BBox::new(300, 200, 320, 212));
        assert_eq!(entries[&1].text_bndbox, BBox::new(339, 215, 370, 227));
        assert_eq!(inference.calls(), 2);
    }

    #[tokio::test]
    async fn test_out_of_bounds_swatch_samples_white() {
        let inference = Arc::new(ScriptedInference::new());
        let extractor = LegendExtractor::new(inference, 16);
        let img = legend_image();
        assert_eq!(extractor.sample_color(&img, &BBox::new(0, 0, 20, 99)).unwrap(), color::WHITE);
        assert_eq!(
            extractor.read_label(&img, &BBox::new(90, 0, 120, 10)).await.unwrap(),
            "unknown"
        );
    }
}
