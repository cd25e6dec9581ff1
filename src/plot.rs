//! Sample grids.
//!
//! Generated images in `[-1, 1]` are mapped back to bytes, tiled row-major
//! into one picture and written as `epoch_{n}.png`.

use std::io::Cursor;

use candle_core::{DType, Device, Tensor};
use image::{ImageFormat, Rgb, RgbImage};

use crate::architecture::GeneratorArch;
use crate::error::{GanError, Result};
use crate::model::Trainable;
use crate::step::sample_noise;
use crate::storage::{Storage, StoragePath};

/// File name of the grid written after `epoch` completed epochs.
#[must_use]
pub fn grid_file_name(epoch: usize) -> String {
    format!("epoch_{epoch}.png")
}

/// Tile `(N, C, H, W)` images into a `rows × cols` grid.
///
/// `C` must be 1 (replicated to gray) or 3. With `bgr` set, the first and
/// last channel are swapped.
///
/// # Errors
///
/// Returns [`GanError::Plot`] if there are fewer than `rows * cols` images or
/// the channel count is unsupported.
pub fn render_grid(images: &Tensor, rows: usize, cols: usize, bgr: bool) -> Result<RgbImage> {
    let (n, c, h, w) = images.dims4()?;
    if n < rows * cols {
        return Err(GanError::Plot(format!(
            "{n} images cannot fill a {rows}x{cols} grid"
        )));
    }
    if c != 1 && c != 3 {
        return Err(GanError::Plot(format!("cannot plot {c}-channel images")));
    }

    let bytes = images
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .affine(127.5, 127.5)?
        .clamp(0f32, 255f32)?
        .permute((0, 2, 3, 1))?
        .flatten_all()?
        .to_vec1::<f32>()?;

    #[allow(clippy::cast_possible_truncation)]
    let (tile_w, tile_h) = (w as u32, h as u32);
    #[allow(clippy::cast_possible_truncation)]
    let mut grid = RgbImage::new(tile_w * cols as u32, tile_h * rows as u32);

    for index in 0..rows * cols {
        #[allow(clippy::cast_possible_truncation)]
        let (origin_x, origin_y) = (
            (index % cols) as u32 * tile_w,
            (index / cols) as u32 * tile_h,
        );
        let image = &bytes[index * h * w * c..(index + 1) * h * w * c];
        for (pixel_index, pixel) in image.chunks_exact(c).enumerate() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let channel = |i: usize| pixel[i].round() as u8;
            let rgb = match (c, bgr) {
                (1, _) => [channel(0); 3],
                (_, true) => [channel(2), channel(1), channel(0)],
                _ => [channel(0), channel(1), channel(2)],
            };
            #[allow(clippy::cast_possible_truncation)]
            let (x, y) = ((pixel_index % w) as u32, (pixel_index / w) as u32);
            grid.put_pixel(origin_x + x, origin_y + y, Rgb(rgb));
        }
    }
    Ok(grid)
}

/// Encode an image as PNG bytes.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Generate `rows * cols` images from fresh noise and tile them.
///
/// # Errors
///
/// Returns an error if generation or tiling fails.
pub fn sample_grid(
    generator: &Trainable<GeneratorArch>,
    rows: usize,
    cols: usize,
    seed: u64,
    bgr: bool,
) -> Result<RgbImage> {
    let noise = sample_noise(
        rows * cols,
        generator.arch().latent_dims,
        seed,
        generator.device(),
    )?;
    render_grid(&generator.forward(&noise)?, rows, cols, bgr)
}

/// Write `grid` as PNG to `path`.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub fn write_grid(storage: &Storage, path: &StoragePath, grid: &RgbImage) -> Result<()> {
    storage.put(path, &encode_png(grid)?)?;
    tracing::info!("Wrote sample grid to {path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::fixtures::{tiny_discriminator, tiny_generator};

    #[test]
    fn test_grid_layout_and_scaling() -> Result<()> {
        let device = Device::Cpu;
        // Two 1x1 RGB images: black and white, placed side by side.
        let images = Tensor::new(&[-1f32, -1.0, -1.0, 1.0, 1.0, 1.0], &device)?
            .reshape((2, 3, 1, 1))?;
        let grid = render_grid(&images, 1, 2, false)?;
        assert_eq!(grid.dimensions(), (2, 1));
        assert_eq!(grid.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(grid.get_pixel(1, 0), &Rgb([255, 255, 255]));
        Ok(())
    }

    #[test]
    fn test_rows_stack_vertically() -> Result<()> {
        let images = Tensor::new(&[-1f32, 1.0], &Device::Cpu)?.reshape((2, 1, 1, 1))?;
        let grid = render_grid(&images, 2, 1, false)?;
        assert_eq!(grid.dimensions(), (1, 2));
        assert_eq!(grid.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(grid.get_pixel(0, 1), &Rgb([255, 255, 255]));
        Ok(())
    }

    #[test]
    fn test_bgr_swaps_channels() -> Result<()> {
        // Planes: B = 1, G = -1, R = -1 when read as BGR.
        let images = Tensor::new(&[1f32, -1.0, -1.0], &Device::Cpu)?.reshape((1, 3, 1, 1))?;
        assert_eq!(render_grid(&images, 1, 1, false)?.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(render_grid(&images, 1, 1, true)?.get_pixel(0, 0), &Rgb([0, 0, 255]));
        Ok(())
    }

    #[test]
    fn test_too_few_images_is_an_error() -> Result<()> {
        let images = Tensor::zeros((2, 3, 4, 4), DType::F32, &Device::Cpu)?;
        assert!(matches!(render_grid(&images, 1, 5, false), Err(GanError::Plot(_))));
        Ok(())
    }

    #[test]
    fn test_sample_grid_written_as_png() -> Result<()> {
        let device = Device::Cpu;
        let generator = Trainable::new(tiny_generator(&tiny_discriminator()), &device)?;
        let grid = sample_grid(&generator, 1, 5, 3, false)?;
        assert_eq!(grid.dimensions(), (40, 8));

        let storage = Storage::in_memory();
        let path = StoragePath::parse("gs://bucket/plots")?.join(&grid_file_name(2));
        write_grid(&storage, &path, &grid)?;
        let decoded = image::load_from_memory(&storage.get(&path)?)?;
        assert_eq!(decoded.to_rgb8().dimensions(), (40, 8));
        Ok(())
    }
}
