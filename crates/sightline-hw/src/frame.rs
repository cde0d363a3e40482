//! Frame type and pixel processing — YUYV conversion, area resize, flip, crop.

/// A captured RGB camera frame (width * height * 3 bytes, row-major).
///
/// Frames are transient: each pull from the camera produces a fresh owned
/// buffer and nothing is queued behind it.
#[derive(Clone)]
pub struct RgbFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbFrame {
    /// Average pixel brightness across all channels (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Grayscale copy using integer BT.601 luma weights.
    pub fn to_gray(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| {
                let r = px[0] as u32;
                let g = px[1] as u32;
                let b = px[2] as u32;
                ((77 * r + 150 * g + 29 * b) >> 8) as u8
            })
            .collect()
    }

    /// Bounds-clamped rectangular crop. A region entirely outside the frame
    /// collapses to a 1x1 crop at the nearest edge; an empty frame stays
    /// empty.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> RgbFrame {
        if self.width == 0 || self.height == 0 {
            return self.clone();
        }
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let w = w.clamp(1, self.width - x);
        let h = h.clamp(1, self.height - y);

        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for row in y..y + h {
            let start = ((row * self.width + x) * 3) as usize;
            let end = start + (w * 3) as usize;
            data.extend_from_slice(&self.data[start..end]);
        }
        RgbFrame { data, width: w, height: h }
    }

    /// Vertical flip, applied only on the path to display. The recognition
    /// path always sees raw read order.
    pub fn flip_vertical(&self) -> RgbFrame {
        let row_bytes = (self.width * 3) as usize;
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks_exact(row_bytes).rev() {
            data.extend_from_slice(row);
        }
        RgbFrame { data, width: self.width, height: self.height }
    }

    /// Rescale with box-filter averaging (area interpolation), the
    /// quality-preserving downscale used on every frame handed to callers.
    /// Returns a clone when the dimensions already match.
    pub fn resize_area(&self, dst_w: u32, dst_h: u32) -> RgbFrame {
        if dst_w == self.width && dst_h == self.height {
            return self.clone();
        }
        let sw = self.width as usize;
        let sh = self.height as usize;
        let dw = dst_w.max(1) as usize;
        let dh = dst_h.max(1) as usize;

        let x_ratio = sw as f32 / dw as f32;
        let y_ratio = sh as f32 / dh as f32;

        let mut data = vec![0u8; dw * dh * 3];
        for dy in 0..dh {
            let y0 = (dy as f32 * y_ratio) as usize;
            let y1 = (((dy + 1) as f32 * y_ratio).ceil() as usize).clamp(y0 + 1, sh);
            for dx in 0..dw {
                let x0 = (dx as f32 * x_ratio) as usize;
                let x1 = (((dx + 1) as f32 * x_ratio).ceil() as usize).clamp(x0 + 1, sw);

                let mut acc = [0u32; 3];
                for sy in y0..y1 {
                    for sx in x0..x1 {
                        let src = (sy * sw + sx) * 3;
                        acc[0] += self.data[src] as u32;
                        acc[1] += self.data[src + 1] as u32;
                        acc[2] += self.data[src + 2] as u32;
                    }
                }
                let n = ((y1 - y0) * (x1 - x0)) as u32;
                let dst = (dy * dw + dx) * 3;
                data[dst] = (acc[0] / n) as u8;
                data[dst + 1] = (acc[1] / n) as u8;
                data[dst + 2] = (acc[2] / n) as u8;
            }
        }
        RgbFrame { data, width: dw as u32, height: dh as u32 }
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for &y in &[quad[0], quad[2]] {
            let y = y as f32;
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            rgb.push(r);
            rgb.push(g);
            rgb.push(b);
        }
    }
    Ok(rgb)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
