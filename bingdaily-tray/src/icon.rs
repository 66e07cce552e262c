//! RGBA pixels for the tray icon.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use std::path::Path;

pub const ICON_SIZE: u32 = 32;

/// Blue square with a white "B", shown until a wallpaper has been applied.
pub fn default_icon_rgba() -> Vec<u8> {
    let mut rgba = Vec::with_capacity((ICON_SIZE * ICON_SIZE * 4) as usize);
    for y in 0..ICON_SIZE {
        for x in 0..ICON_SIZE {
            let letter = (8..=10).contains(&x)
                || ((8..=10).contains(&y) && (8..=20).contains(&x))
                || ((15..=17).contains(&y) && (8..=18).contains(&x))
                || ((22..=24).contains(&y) && (8..=20).contains(&x))
                || ((18..=20).contains(&x)
                    && ((11..=14).contains(&y) || (18..=21).contains(&y)));
            let pixel = if letter { [255, 255, 255, 255] } else { [0, 100, 200, 255] };
            rgba.extend_from_slice(&pixel);
        }
    }
    rgba
}

/// The wallpaper scaled down to icon size.
pub fn thumbnail_rgba(path: &Path) -> Result<Vec<u8>> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(img
        .resize_exact(ICON_SIZE, ICON_SIZE, FilterType::Triangle)
        .into_rgba8()
        .into_raw())
}
