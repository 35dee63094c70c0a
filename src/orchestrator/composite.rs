//! Packing several generated images into one deliverable.

use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::core::image_backend::{ImagePayload, PayloadFormat};
use crate::error::{BridgeError, BridgeResult};

/// Chooses the single payload to deliver for a batch of results.
///
/// A batch with exactly one animated item delivers that item untouched;
/// otherwise still images are tiled into one grid.
pub fn prepare_delivery(images: Vec<ImagePayload>) -> BridgeResult<Option<ImagePayload>> {
    let animated = images.iter().filter(|i| i.format.is_animated()).count();
    if animated == 1 {
        return Ok(images.into_iter().find(|i| i.format.is_animated()));
    }

    let (stills, moving): (Vec<_>, Vec<_>) =
        images.into_iter().partition(|i| !i.format.is_animated());
    if !moving.is_empty() {
        tracing::warn!(
            "[Composite] Dropping {} animated results from a mixed batch",
            moving.len()
        );
    }

    match stills.len() {
        0 => Ok(moving.into_iter().next()),
        1 => Ok(stills.into_iter().next()),
        _ => composite_grid(&stills).map(Some),
    }
}

/// Grid dimensions in pixels; tile sizes come from the backend.
fn canvas_size(
    columns: u32,
    rows: u32,
    tile_width: u32,
    tile_height: u32,
) -> BridgeResult<(u32, u32)> {
    columns
        .checked_mul(tile_width)
        .zip(rows.checked_mul(tile_height))
        .ok_or_else(|| {
            BridgeError::Composite(format!(
                "canvas of {}x{} tiles at {}x{} is too large",
                columns, rows, tile_width, tile_height
            ))
        })
}

/// Tiles images row-major on a uniform grid, `ceil(sqrt(n))` per row,
/// each cell as large as the largest image.
pub fn composite_grid(images: &[ImagePayload]) -> BridgeResult<ImagePayload> {
    let decoded = images
        .iter()
        .map(|payload| {
            image::load_from_memory(&payload.bytes)
                .map_err(|e| BridgeError::Composite(format!("decode failed: {}", e)))
        })
        .collect::<BridgeResult<Vec<DynamicImage>>>()?;

    if decoded.is_empty() {
        return Err(BridgeError::Composite("nothing to composite".to_string()));
    }

    let count = decoded.len() as u32;
    let columns = (count as f64).sqrt().ceil() as u32;
    let rows = count.div_ceil(columns);
    let tile_width = decoded.iter().map(|i| i.width()).max().unwrap_or(0);
    let tile_height = decoded.iter().map(|i| i.height()).max().unwrap_or(0);

    let (width, height) = canvas_size(columns, rows, tile_width, tile_height)?;
    let mut canvas = RgbaImage::new(width, height);
    for (index, image) in decoded.iter().enumerate() {
        let index = index as u32;
        let x = (index % columns) * tile_width;
        let y = (index / columns) * tile_height;
        imageops::overlay(&mut canvas, &image.to_rgba8(), x as i64, y as i64);
    }

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| BridgeError::Composite(format!("encode failed: {}", e)))?;

    Ok(ImagePayload {
        bytes,
        format: PayloadFormat::Png,
    })
}
