/// Limits `x` to `[min, max]`. NaN passes through.
pub fn clip(x: f64, min: f64, max: f64) -> f64 {
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}

/// Reverses the bit order of the low byte of `value`.
pub fn reverse_byte(value: u32) -> u8 {
    (value as u8).reverse_bits()
}

/// Converts hue, saturation and brightness (each 0..1, hue wrapping) into a packed `0xBBGGRR`
/// colour.
pub fn hsb_to_rgb(hue: f64, saturation: f64, brightness: f64) -> u32 {
    let hue = if hue.is_finite() { hue.rem_euclid(1.0) } else { 0.0 };
    let s = clip(saturation, 0.0, 1.0);
    let v = clip(brightness, 0.0, 1.0);
    let h6 = hue * 6.0;
    // rem_euclid can round a tiny negative hue up to exactly 1.0
    let sector = h6.floor().min(5.0);
    let f = h6 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let channel = |c: f64| (c * 255.0).round() as u32;
    channel(r) | (channel(g) << 8) | (channel(b) << 16)
}
