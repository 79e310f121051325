use super::channel::Rgb;

/// Scale a frame down when its summed brightness exceeds the channel
/// budget. Every component is multiplied by `threshold / sum` with
/// round-to-nearest. Returns true when the frame was modified.
pub fn apply_current_limit(pixels: &mut [Rgb], threshold: u32) -> bool {
    let total: u32 = pixels.iter().map(Rgb::brightness_units).sum();
    if total <= threshold {
        return false;
    }
    let scale = threshold as f32 / total as f32;
    for px in pixels.iter_mut() {
        px.r = (px.r as f32 * scale + 0.5) as u8;
        px.g = (px.g as f32 * scale + 0.5) as u8;
        px.b = (px.b as f32 * scale + 0.5) as u8;
    }
    true
}
