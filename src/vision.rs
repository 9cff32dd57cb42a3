//! Image-region detection and page annotation.
//!
//! Detected regions become exercise images named `p<page>c<index>` in
//! detection order, counting from 1. The page sent to the LLM is overlaid
//! with a red box around each region, labelled with that same identifier.

use std::io::Cursor;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use patty_core::extracted::image_identifier;
use serde::{Deserialize, Serialize};

use crate::subprocess::{run_piped, shell};

/// Pixel rectangle on the rasterized page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectedRegion {
    /// The part of the region inside a `width`×`height` image, if any.
    fn clamped(&self, width: u32, height: u32) -> Option<DetectedRegion> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then_some(DetectedRegion {
            x: self.x,
            y: self.y,
            width: w,
            height: h,
        })
    }
}

#[async_trait]
pub trait ImageDetector: Send + Sync {
    async fn detect(&self, page_png: &[u8]) -> Result<Vec<DetectedRegion>>;
}

/// Detects nothing; every page is treated as text-only.
pub struct NoImages;

#[async_trait]
impl ImageDetector for NoImages {
    async fn detect(&self, _page_png: &[u8]) -> Result<Vec<DetectedRegion>> {
        Ok(Vec::new())
    }
}

/// External detector: PNG on stdin, JSON array of regions on stdout.
pub struct CommandDetector {
    command_line: String,
}

impl CommandDetector {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
        }
    }
}

#[async_trait]
impl ImageDetector for CommandDetector {
    async fn detect(&self, page_png: &[u8]) -> Result<Vec<DetectedRegion>> {
        let stdout = run_piped(
            shell(&self.command_line),
            page_png.to_vec(),
            "image detector",
        )
        .await?;
        serde_json::from_slice(&stdout).context("Image detector did not print a JSON region list")
    }
}

/// A cropped region with its stable identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub local_identifier: String,
    pub region: DetectedRegion,
    pub png: Vec<u8>,
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(buffer.into_inner())
}

/// Crop every detected region out of the page. Regions entirely outside
/// the page are dropped before identifiers are assigned.
pub fn crop_regions(
    page_png: &[u8],
    page_number: i64,
    regions: &[DetectedRegion],
) -> Result<Vec<PageImage>> {
    let page = image::load_from_memory(page_png).context("Rasterized page is not an image")?;
    let (width, height) = (page.width(), page.height());

    regions
        .iter()
        .filter_map(|r| r.clamped(width, height))
        .enumerate()
        .map(|(index, region)| {
            let crop = page.crop_imm(region.x, region.y, region.width, region.height);
            Ok(PageImage {
                local_identifier: image_identifier(page_number, index + 1),
                region,
                png: encode_png(&crop)?,
            })
        })
        .collect()
}

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// 3×5 glyphs for the characters of image identifiers.
fn glyph(c: char) -> Option<[u8; 5]> {
    Some(match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'p' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'c' => [0b000, 0b111, 0b100, 0b100, 0b111],
        _ => return None,
    })
}

fn fill(canvas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32) {
    let x_end = x.saturating_add(w).min(canvas.width());
    let y_end = y.saturating_add(h).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, RED);
        }
    }
}

fn draw_label(canvas: &mut RgbaImage, x: u32, y: u32, scale: u32, text: &str) {
    let mut cursor = x;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..3u32 {
                    if bits & (0b100 >> col) != 0 {
                        fill(
                            canvas,
                            cursor + col * scale,
                            y + row as u32 * scale,
                            scale,
                            scale,
                        );
                    }
                }
            }
        }
        cursor += 4 * scale;
    }
}

/// The page with a red outline and identifier label around every image.
pub fn annotate(page_png: &[u8], images: &[PageImage]) -> Result<Vec<u8>> {
    if images.is_empty() {
        return Ok(page_png.to_vec());
    }
    let mut canvas = image::load_from_memory(page_png)
        .context("Rasterized page is not an image")?
        .to_rgba8();

    let thickness = (canvas.width() / 400).max(2);
    let scale = (canvas.width() / 250).max(2);
    for image in images {
        let r = image.region;
        fill(&mut canvas, r.x, r.y, r.width, thickness);
        fill(&mut canvas, r.x, (r.y + r.height).saturating_sub(thickness), r.width, thickness);
        fill(&mut canvas, r.x, r.y, thickness, r.height);
        fill(&mut canvas, (r.x + r.width).saturating_sub(thickness), r.y, thickness, r.height);

        let label_y = r.y.saturating_sub(6 * scale);
        draw_label(&mut canvas, r.x, label_y, scale, &image.local_identifier);
    }

    encode_png(&DynamicImage::ImageRgba8(canvas))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_page(width: u32, height: u32) -> Vec<u8> {
        let page = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        encode_png(&DynamicImage::ImageRgba8(page)).unwrap()
    }

    #[test]
    fn identifiers_follow_detection_order() {
        let page = blank_page(200, 100);
        let regions = [
            DetectedRegion { x: 100, y: 10, width: 50, height: 20 },
            DetectedRegion { x: 500, y: 10, width: 50, height: 20 },
            DetectedRegion { x: 10, y: 10, width: 30, height: 300 },
        ];
        let images = crop_regions(&page, 7, &regions).unwrap();
        let ids: Vec<_> = images.iter().map(|i| i.local_identifier.as_str()).collect();
        assert_eq!(ids, vec!["p7c1", "p7c2"]);
        // Clamped to the page height.
        assert_eq!(images[1].region.height, 90);

        let crop = image::load_from_memory(&images[0].png).unwrap();
        assert_eq!((crop.width(), crop.height()), (50, 20));
    }

    #[test]
    fn annotation_draws_red_outline() {
        let page = blank_page(400, 300);
        let images = crop_regions(
            &page,
            1,
            &[DetectedRegion { x: 100, y: 100, width: 80, height: 60 }],
        )
        .unwrap();
        let annotated = image::load_from_memory(&annotate(&page, &images).unwrap())
            .unwrap()
            .to_rgba8();
        assert_eq!(*annotated.get_pixel(100, 100), RED);
        assert_eq!(*annotated.get_pixel(140, 130), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn no_images_leaves_page_untouched() {
        let page = blank_page(10, 10);
        assert_eq!(annotate(&page, &[]).unwrap(), page);
    }

    #[tokio::test]
    async fn command_detector_parses_regions() {
        let detector =
            CommandDetector::new(r#"cat > /dev/null; echo '[{"x":1,"y":2,"width":3,"height":4}]'"#);
        let regions = detector.detect(b"png").await.unwrap();
        assert_eq!(regions, vec![DetectedRegion { x: 1, y: 2, width: 3, height: 4 }]);
    }
}
