use image::RgbImage;

#[inline]
fn get_rgb(src: &RgbImage, x: i32, y: i32) -> [f32; 3] {
    if x < 0 || y < 0 || x >= src.width() as i32 || y >= src.height() as i32 {
        return [0.0; 3];
    }
    let p = src.get_pixel(x as u32, y as u32).0;
    [p[0] as f32, p[1] as f32, p[2] as f32]
}

/// Bilinear sample of a color image; out-of-bounds neighbours read as black.
#[inline]
pub fn sample_bilinear_rgb(src: &RgbImage, x: f32, y: f32) -> [u8; 3] {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_rgb(src, x0, y0);
    let p10 = get_rgb(src, x0 + 1, y0);
    let p01 = get_rgb(src, x0, y0 + 1);
    let p11 = get_rgb(src, x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let a = p00[c] + fx * (p10[c] - p00[c]);
        let b = p01[c] + fx * (p11[c] - p01[c]);
        out[c] = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
    }
    out
}
