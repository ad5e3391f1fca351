use image::{Rgba, RgbaImage};

/// Box-filter resample of an RGBA image to the given size.
///
/// Each destination pixel averages the source area it covers, weighting
/// partially-covered source pixels by their overlap. This is the filter
/// used to shrink a source texture to its placed size before it is copied
/// into an atlas; it also behaves sensibly for the (rare) upscale case,
/// where the window narrows to under one source pixel.
pub fn box_resample(src: &RgbaImage, dst_w: u32, dst_h: u32) -> RgbaImage {
    let (sw, sh) = src.dimensions();
    if sw == dst_w && sh == dst_h {
        return src.clone();
    }
    let mut dst = RgbaImage::new(dst_w, dst_h);
    if sw == 0 || sh == 0 || dst_w == 0 || dst_h == 0 {
        return dst;
    }

    let x_ratio = sw as f64 / dst_w as f64;
    let y_ratio = sh as f64 / dst_h as f64;

    for dy in 0..dst_h {
        let y0 = dy as f64 * y_ratio;
        let y1 = (y0 + y_ratio).min(sh as f64);
        for dx in 0..dst_w {
            let x0 = dx as f64 * x_ratio;
            let x1 = (x0 + x_ratio).min(sw as f64);

            let mut acc = [0.0f64; 4];
            let mut weight = 0.0f64;

            let mut sy = y0.floor() as u32;
            while (sy as f64) < y1 {
                let cover_y = (y1.min((sy + 1) as f64) - y0.max(sy as f64)).max(0.0);
                let mut sx = x0.floor() as u32;
                while (sx as f64) < x1 {
                    let cover_x = (x1.min((sx + 1) as f64) - x0.max(sx as f64)).max(0.0);
                    let w = cover_x * cover_y;
                    if w > 0.0 {
                        let px = src.get_pixel(sx.min(sw - 1), sy.min(sh - 1));
                        for c in 0..4 {
                            acc[c] += px[c] as f64 * w;
                        }
                        weight += w;
                    }
                    sx += 1;
                }
                sy += 1;
            }

            let px = if weight > 0.0 {
                Rgba([
                    (acc[0] / weight + 0.5) as u8,
                    (acc[1] / weight + 0.5) as u8,
                    (acc[2] / weight + 0.5) as u8,
                    (acc[3] / weight + 0.5) as u8,
                ])
            } else {
                Rgba([0, 0, 0, 0])
            };
            dst.put_pixel(dx, dy, px);
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halving_averages_quads() {
        let mut src = RgbaImage::new(2, 2);
        src.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        src.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        src.put_pixel(0, 1, Rgba([0, 0, 0, 255]));
        src.put_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let out = box_resample(&src, 1, 1);
        let px = out.get_pixel(0, 0);
        assert_eq!(px[0], 128);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn same_size_is_a_copy() {
        let mut src = RgbaImage::new(3, 2);
        src.put_pixel(2, 1, Rgba([9, 8, 7, 6]));
        let out = box_resample(&src, 3, 2);
        assert_eq!(out.get_pixel(2, 1), src.get_pixel(2, 1));
    }
}
