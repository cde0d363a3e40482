//! Letterbox preprocessing of RGB frames into NCHW inference tensors.

use ndarray::Array4;

/// Metadata for mapping model-space coordinates back to frame space after
/// a letterbox resize.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from letterboxed model space back into frame space.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize an RGB frame into a square letterboxed NCHW tensor.
///
/// Pixels are resized with bilinear interpolation, padded with `pad_value`
/// (raw 0–255 space), and normalized as `(pixel - mean) / std` per channel.
pub fn letterbox_tensor(
    rgb: &[u8],
    width: usize,
    height: usize,
    dst_size: usize,
    mean: f32,
    std: f32,
    pad_value: f32,
) -> (Array4<f32>, Letterbox) {
    let scale_w = dst_size as f32 / width as f32;
    let scale_h = dst_size as f32 / height as f32;
    let scale = scale_w.min(scale_h);

    let new_w = (width as f32 * scale).round() as usize;
    let new_h = (height as f32 * scale).round() as usize;
    let pad_x = (dst_size - new_w) as f32 / 2.0;
    let pad_y = (dst_size - new_h) as f32 / 2.0;
    let x_start = pad_x.floor() as usize;
    let y_start = pad_y.floor() as usize;

    let letterbox = Letterbox { scale, pad_x, pad_y };

    let mut tensor = Array4::<f32>::from_elem(
        (1, 3, dst_size, dst_size),
        (pad_value - mean) / std,
    );

    let inv_scale = 1.0 / scale;
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
        let y0 = (src_y.floor() as i64).clamp(0, height as i64 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
            let x0 = (src_x.floor() as i64).clamp(0, width as i64 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = rgb[(y0 * width + x0) * 3 + c] as f32;
                let tr = rgb[(y0 * width + x1) * 3 + c] as f32;
                let bl = rgb[(y1 * width + x0) * 3 + c] as f32;
                let br = rgb[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                tensor[[0, c, y + y_start, x + x_start]] = (val - mean) / std;
            }
        }
    }

    (tensor, letterbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let rgb = vec![0u8; 320 * 240 * 3];
        let (_, lb) = letterbox_tensor(&rgb, 320, 240, 640, 0.0, 255.0, 0.0);

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let boxed_x = orig_x * lb.scale + lb.pad_x;
        let boxed_y = orig_y * lb.scale + lb.pad_y;
        let (rx, ry) = lb.unmap(boxed_x, boxed_y);

        assert!((rx - orig_x).abs() < 0.1, "x: {rx} vs {orig_x}");
        assert!((ry - orig_y).abs() < 0.1, "y: {ry} vs {orig_y}");
    }

    #[test]
    fn test_letterbox_uniform_input_center() {
        // 100x100 uniform gray, pad 0: center of tensor holds the image
        let rgb = vec![128u8; 100 * 100 * 3];
        let (tensor, _) = letterbox_tensor(&rgb, 100, 100, 64, 0.0, 255.0, 0.0);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        let center = tensor[[0, 0, 32, 32]];
        assert!((center - 128.0 / 255.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_pad_value_normalized() {
        // wide frame: top and bottom rows are padding
        let rgb = vec![200u8; 100 * 20 * 3];
        let (tensor, lb) = letterbox_tensor(&rgb, 100, 20, 64, 127.5, 128.0, 127.5);
        assert!(lb.pad_y > 0.0);
        assert!((tensor[[0, 0, 0, 0]] - 0.0).abs() < 1e-6, "pad must normalize to 0");
    }
}
