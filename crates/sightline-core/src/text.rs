//! Camera-to-text pipeline: region auto-crop, preprocessing, and
//! confidence-gated recognition.

use crate::ocr::{OcrBackend, OcrError};
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};

/// Fragments below this confidence are discarded from the joined text
/// (they still count toward the mean).
pub const FRAGMENT_CONFIDENCE_MIN: f32 = 0.8;

/// Fallback status when the live scan times out, also spoken aloud.
pub const SCAN_TIMEOUT_MESSAGE: &str =
    "Unable to scan the document. Try taking a photo instead.";

/// Result of one recognition pass. Each new result supersedes the
/// previous one; nothing is accumulated.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTextResult {
    pub text: String,
    /// Mean confidence over all backend fragments, scaled 0–100.
    pub mean_confidence: f32,
}

/// Region of interest within a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Find the printed-text region: mask near-white/gray pixels (the
/// expected page background), take the bounding box of the largest
/// external contour of the mask. With no qualifying contour the full
/// frame is returned unchanged — this step never fails.
pub fn locate_region(rgb: &[u8], width: u32, height: u32) -> Region {
    let full = Region { x: 0, y: 0, width, height };
    if width == 0 || height == 0 || rgb.len() < (width * height * 3) as usize {
        return full;
    }

    let mut mask = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let i = ((y * width + x) * 3) as usize;
            let (s, v) = saturation_value(rgb[i], rgb[i + 1], rgb[i + 2]);
            // near-white/gray: low saturation, high value (OpenCV scale)
            if s <= 50 && v >= 180 {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }
    }

    let contours = find_contours::<i32>(&mask);
    let mut best: Option<(u32, Region)> = None;
    for contour in &contours {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
        for p in &contour.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let region = Region {
            x: min_x.max(0) as u32,
            y: min_y.max(0) as u32,
            width: (max_x - min_x + 1).max(1) as u32,
            height: (max_y - min_y + 1).max(1) as u32,
        };
        let area = region.width * region.height;
        if best.as_ref().map(|(a, _)| area > *a).unwrap_or(true) {
            best = Some((area, region));
        }
    }

    best.map(|(_, r)| r).unwrap_or(full)
}

/// Grayscale conversion followed by contrast-limited adaptive histogram
/// equalization, for robustness to uneven lighting.
pub fn preprocess(rgb: &[u8], width: u32, height: u32) -> GrayImage {
    let frame = RgbImage::from_raw(width, height, rgb.to_vec())
        .unwrap_or_else(|| RgbImage::new(1, 1));
    let mut gray = image::imageops::grayscale(&frame);
    clahe(&mut gray, 8, 3.0);
    gray
}

/// CLAHE in-place: per-tile clipped histograms with bilinearly
/// interpolated CDFs. `clip_factor` is a multiple of the mean bin height.
pub fn clahe(gray: &mut GrayImage, tiles: u32, clip_factor: f32) {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    let t = tiles as usize;
    if t == 0 {
        return;
    }
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;
    let data: &mut [u8] = gray;

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            let y0 = row * tile_h;
            let x0 = col * tile_w;
            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[data[y * w + x] as usize] += 1;
                }
            }

            // clip and redistribute excess uniformly
            let clip = ((clip_factor * tile_pixels as f32) / 256.0).max(1.0) as u32;
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist;
                if i < leftover {
                    *bin += 1;
                }
            }

            let mut cdf = [0f32; 256];
            cdf[0] = hist[0] as f32;
            for i in 1..256 {
                cdf[i] = cdf[i - 1] + hist[i] as f32;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = tile_pixels as f32 - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = data[y * w + x] as usize;
            let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, (t - 1) as f32);
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, (t - 1) as f32);
            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(t - 1);
            let c1 = (c0 + 1).min(t - 1);
            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let tl = cdfs[r0 * t + c0][pixel];
            let tr = cdfs[r0 * t + c1][pixel];
            let bl = cdfs[r1 * t + c0][pixel];
            let br = cdfs[r1 * t + c1][pixel];
            let top = tl * (1.0 - dx) + tr * dx;
            let bot = bl * (1.0 - dx) + br * dx;
            data[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Saturation and value of a pixel on the OpenCV HSV scale (0–255).
fn saturation_value(r: u8, g: u8, b: u8) -> (u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let s = if max == 0 {
        0
    } else {
        ((max as u32 - min as u32) * 255 / max as u32) as u8
    };
    (s, max)
}

pub struct TextExtractor {
    backend: Box<dyn OcrBackend>,
}

impl TextExtractor {
    pub fn new(backend: Box<dyn OcrBackend>) -> Self {
        Self { backend }
    }

    /// Run the backend on a preprocessed image. Fragments under
    /// [`FRAGMENT_CONFIDENCE_MIN`] are left out of the joined text but
    /// still counted in the mean confidence.
    pub fn recognize(&mut self, gray: &GrayImage) -> Result<DetectedTextResult, OcrError> {
        let fragments = self.backend.read_fragments(gray)?;

        let text = fragments
            .iter()
            .filter(|f| f.confidence >= FRAGMENT_CONFIDENCE_MIN)
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mean_confidence = if fragments.is_empty() {
            0.0
        } else {
            fragments.iter().map(|f| f.confidence).sum::<f32>() / fragments.len() as f32 * 100.0
        };

        Ok(DetectedTextResult { text, mean_confidence })
    }

    /// Live-scan pass: auto-crop the text region, preprocess, recognize.
    pub fn scan_frame(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<DetectedTextResult, OcrError> {
        let region = locate_region(rgb, width, height);
        let cropped = crop_rgb(rgb, width, region);
        let gray = preprocess(&cropped, region.width, region.height);
        self.recognize(&gray)
    }

    /// Manual-capture pass: preprocess and recognize the whole frame,
    /// with no region crop and no retry semantics.
    pub fn read_photo(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<DetectedTextResult, OcrError> {
        let gray = preprocess(rgb, width, height);
        self.recognize(&gray)
    }
}

fn crop_rgb(rgb: &[u8], frame_width: u32, region: Region) -> Vec<u8> {
    let mut out = Vec::with_capacity((region.width * region.height * 3) as usize);
    for row in region.y..region.y + region.height {
        let start = ((row * frame_width + region.x) * 3) as usize;
        let end = start + (region.width * 3) as usize;
        out.extend_from_slice(&rgb[start..end]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrFragment;

    /// Backend returning a fixed fragment list.
    struct FixedBackend(Vec<OcrFragment>);

    impl OcrBackend for FixedBackend {
        fn read_fragments(&mut self, _gray: &GrayImage) -> Result<Vec<OcrFragment>, OcrError> {
            Ok(self.0.clone())
        }
    }

    fn frag(text: &str, confidence: f32) -> OcrFragment {
        OcrFragment { text: text.to_string(), confidence }
    }

    fn dark_frame(w: u32, h: u32) -> Vec<u8> {
        vec![10u8; (w * h * 3) as usize]
    }

    #[test]
    fn test_recognize_discards_low_confidence_but_counts_it() {
        let mut extractor = TextExtractor::new(Box::new(FixedBackend(vec![
            frag("Hello", 0.9),
            frag("xq", 0.4),
        ])));
        let result = extractor.recognize(&GrayImage::new(8, 8)).unwrap();
        assert_eq!(result.text, "Hello");
        assert!((result.mean_confidence - 65.0).abs() < 1e-3);
    }

    #[test]
    fn test_recognize_no_fragments() {
        let mut extractor = TextExtractor::new(Box::new(FixedBackend(vec![])));
        let result = extractor.recognize(&GrayImage::new(8, 8)).unwrap();
        assert_eq!(result.text, "");
        assert_eq!(result.mean_confidence, 0.0);
    }

    #[test]
    fn test_recognize_joins_kept_fragments_with_spaces() {
        let mut extractor = TextExtractor::new(Box::new(FixedBackend(vec![
            frag("read", 0.95),
            frag("this", 0.85),
            frag("??", 0.1),
        ])));
        let result = extractor.recognize(&GrayImage::new(8, 8)).unwrap();
        assert_eq!(result.text, "read this");
    }

    #[test]
    fn test_locate_region_fallback_is_full_frame() {
        // no qualifying contour returns the identity crop
        let rgb = dark_frame(40, 30);
        let region = locate_region(&rgb, 40, 30);
        assert_eq!(region, Region { x: 0, y: 0, width: 40, height: 30 });
    }

    #[test]
    fn test_locate_region_finds_white_page() {
        let (w, h) = (60u32, 40u32);
        let mut rgb = dark_frame(w, h);
        // white block at (20..40, 10..30)
        for y in 10..30u32 {
            for x in 20..40u32 {
                let i = ((y * w + x) * 3) as usize;
                rgb[i] = 250;
                rgb[i + 1] = 250;
                rgb[i + 2] = 250;
            }
        }
        let region = locate_region(&rgb, w, h);
        assert!(region.x >= 19 && region.x <= 21, "x = {}", region.x);
        assert!(region.y >= 9 && region.y <= 11, "y = {}", region.y);
        assert!(region.width >= 18 && region.width <= 22);
        assert!(region.height >= 18 && region.height <= 22);
    }

    #[test]
    fn test_locate_region_picks_largest_block() {
        let (w, h) = (80u32, 40u32);
        let mut rgb = dark_frame(w, h);
        let mut paint = |x0: u32, x1: u32, y0: u32, y1: u32| {
            for y in y0..y1 {
                for x in x0..x1 {
                    let i = ((y * w + x) * 3) as usize;
                    rgb[i] = 255;
                    rgb[i + 1] = 255;
                    rgb[i + 2] = 255;
                }
            }
        };
        paint(2, 8, 2, 8); // small
        paint(30, 70, 5, 35); // large
        let region = locate_region(&rgb, w, h);
        assert!(region.x >= 29, "picked small block: {region:?}");
        assert!(region.width >= 35);
    }

    #[test]
    fn test_saturated_pixels_not_masked() {
        // bright but saturated red is not a page background
        let (w, h) = (20u32, 20u32);
        let mut rgb = dark_frame(w, h);
        for px in rgb.chunks_exact_mut(3).take(200) {
            px[0] = 255;
            px[1] = 0;
            px[2] = 0;
        }
        let region = locate_region(&rgb, w, h);
        assert_eq!(region, Region { x: 0, y: 0, width: w, height: h });
    }

    #[test]
    fn test_clahe_increases_contrast() {
        // low-contrast 64x64 image, pixel values within 100..110
        let mut gray = GrayImage::from_fn(64, 64, |x, y| {
            image::Luma([100 + ((x + y) % 11) as u8])
        });
        let before = stddev(gray.as_raw());
        clahe(&mut gray, 8, 3.0);
        let after = stddev(gray.as_raw());
        assert!(after > before, "CLAHE should stretch contrast: {before:.2} -> {after:.2}");
    }

    #[test]
    fn test_clahe_tiny_image_untouched() {
        let mut gray = GrayImage::from_pixel(4, 4, image::Luma([128]));
        let original = gray.clone();
        clahe(&mut gray, 8, 3.0);
        assert_eq!(gray.as_raw(), original.as_raw());
    }

    #[test]
    fn test_preprocess_dimensions() {
        let rgb = dark_frame(32, 24);
        let gray = preprocess(&rgb, 32, 24);
        assert_eq!((gray.width(), gray.height()), (32, 24));
    }

    fn stddev(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        let variance = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }
}
