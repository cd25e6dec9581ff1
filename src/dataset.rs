//! Training image loading.
//!
//! Two sources are supported:
//!
//! - a `.safetensors` archive (local or in a bucket) holding a `u8` tensor
//!   named `images` shaped `(N, H, W, C)`;
//! - a local directory of PNG/JPEG files, resized to the configured shape.
//!
//! Pixels are rescaled from `[0, 255]` to `[-1, 1]` and laid out as
//! `(N, C, H, W)`.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::{GanError, Result};
use crate::storage::{Storage, StoragePath};

/// Tensor name inside an image archive.
pub const ARCHIVE_KEY: &str = "images";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Images held on the training device.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    images: Tensor,
}

impl ImageDataset {
    /// Load from an archive or image directory.
    ///
    /// `image_shape` is `[height, width, channels]`.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Dataset`] if the source is unsupported, empty, or
    /// does not match `image_shape`.
    pub fn load(
        storage: &Storage,
        path: &str,
        image_shape: [usize; 3],
        device: &Device,
    ) -> Result<Self> {
        let location = StoragePath::parse(path)?;
        tracing::info!("Loading images from {location}");
        if path.ends_with(".safetensors") {
            return Self::from_archive(&storage.get(&location)?, image_shape, device);
        }
        match &location {
            StoragePath::Local(dir) if dir.is_dir() => Self::from_directory(dir, image_shape, device),
            StoragePath::Local(_) => Err(GanError::Dataset(format!(
                "'{path}' is neither a .safetensors archive nor a directory"
            ))),
            StoragePath::Bucket { .. } => Err(GanError::Dataset(format!(
                "bucket sources must be .safetensors archives, got '{path}'"
            ))),
        }
    }

    /// Decode an archive produced by [`encode_archive`].
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Dataset`] if the `images` tensor is missing, not
    /// `u8`, or has the wrong shape.
    pub fn from_archive(bytes: &[u8], image_shape: [usize; 3], device: &Device) -> Result<Self> {
        let archive = SafeTensors::deserialize(bytes)?;
        let view = archive
            .tensor(ARCHIVE_KEY)
            .map_err(|_| GanError::Dataset(format!("archive has no '{ARCHIVE_KEY}' tensor")))?;
        if view.dtype() != Dtype::U8 {
            return Err(GanError::Dataset(format!(
                "'{ARCHIVE_KEY}' must be u8, found {:?}",
                view.dtype()
            )));
        }
        let shape = view.shape();
        if shape.len() != 4 || shape[1..] != image_shape {
            return Err(GanError::Dataset(format!(
                "'{ARCHIVE_KEY}' has shape {shape:?}, expected (N, {}, {}, {})",
                image_shape[0], image_shape[1], image_shape[2]
            )));
        }
        Self::from_u8_nhwc(view.data().to_vec(), shape[0], image_shape, device)
    }

    /// Load every image file in `dir`, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory holds no images, an image cannot be
    /// decoded, or `image_shape` has neither 1 nor 3 channels.
    pub fn from_directory(dir: &Path, image_shape: [usize; 3], device: &Device) -> Result<Self> {
        let [height, width, channels] = image_shape;
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(GanError::Dataset(format!("no images in {}", dir.display())));
        }

        #[allow(clippy::cast_possible_truncation)]
        let (w, h) = (width as u32, height as u32);
        let mut pixels = Vec::with_capacity(files.len() * height * width * channels);
        for file in &files {
            let decoded = image::open(file)?;
            match channels {
                3 => {
                    let rgb = decoded.to_rgb8();
                    pixels.extend(image::imageops::resize(&rgb, w, h, FilterType::Triangle).into_raw());
                }
                1 => {
                    let luma = decoded.to_luma8();
                    pixels.extend(image::imageops::resize(&luma, w, h, FilterType::Triangle).into_raw());
                }
                other => {
                    return Err(GanError::Dataset(format!(
                        "image directories support 1 or 3 channels, not {other}"
                    )))
                }
            }
        }
        tracing::info!("Decoded {} images from {}", files.len(), dir.display());
        Self::from_u8_nhwc(pixels, files.len(), image_shape, device)
    }

    /// Build from raw `(n, H, W, C)` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `pixels` does not hold `n` images of `image_shape`.
    pub fn from_u8_nhwc(
        pixels: Vec<u8>,
        n: usize,
        image_shape: [usize; 3],
        device: &Device,
    ) -> Result<Self> {
        let [h, w, c] = image_shape;
        if pixels.len() != n * h * w * c {
            return Err(GanError::Dataset(format!(
                "{} bytes do not hold {n} images of {h}x{w}x{c}",
                pixels.len()
            )));
        }
        let images = Tensor::from_vec(pixels, (n, h, w, c), &Device::Cpu)?
            .to_dtype(DType::F32)?
            .affine(1.0 / 127.5, -1.0)?
            .permute((0, 3, 1, 2))?
            .contiguous()?
            .to_device(device)?;
        Ok(Self { images })
    }

    /// Number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.dims().first().copied().unwrap_or(0)
    }

    /// Whether there are no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `(N, C, H, W)` tensor.
    #[must_use]
    pub fn images(&self) -> &Tensor {
        &self.images
    }

    /// Gather the images at `indices`, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if an index is out of range.
    pub fn select(&self, indices: &[usize]) -> Result<Tensor> {
        #[allow(clippy::cast_possible_truncation)]
        let indices: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
        let count = indices.len();
        let index = Tensor::from_vec(indices, count, self.images.device())?;
        Ok(self.images.index_select(&index, 0)?)
    }
}

/// Serialize `(n, H, W, C)` bytes as an image archive.
///
/// # Errors
///
/// Returns an error if the byte count does not match the shape.
pub fn encode_archive(pixels: &[u8], n: usize, image_shape: [usize; 3]) -> Result<Vec<u8>> {
    let [h, w, c] = image_shape;
    let view = TensorView::new(Dtype::U8, vec![n, h, w, c], pixels)?;
    Ok(safetensors::tensor::serialize(
        HashMap::from([(ARCHIVE_KEY.to_string(), view)]),
        &None,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[allow(clippy::cast_possible_truncation)]
    fn gradient_pixels(n: usize, shape: [usize; 3]) -> Vec<u8> {
        let len = n * shape.iter().product::<usize>();
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn test_rescale_and_layout() -> Result<()> {
        // One 1x2 RGB image: pixel 0 = (0, 255, 0), pixel 1 = (255, 0, 255)
        let pixels = vec![0, 255, 0, 255, 0, 255];
        let dataset = ImageDataset::from_u8_nhwc(pixels, 1, [1, 2, 3], &Device::Cpu)?;
        assert_eq!(dataset.images().dims(), &[1, 3, 1, 2]);
        let values = dataset.images().flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values, vec![-1.0, 1.0, 1.0, -1.0, -1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_archive_roundtrip_through_storage() -> Result<()> {
        let shape = [4, 4, 3];
        let pixels = gradient_pixels(5, shape);
        let storage = Storage::in_memory();
        let path = StoragePath::parse("gs://bucket/sunsets.safetensors")?;
        storage.put(&path, &encode_archive(&pixels, 5, shape)?)?;

        let dataset = ImageDataset::load(&storage, "gs://bucket/sunsets.safetensors", shape, &Device::Cpu)?;
        assert_eq!(dataset.len(), 5);
        let direct = ImageDataset::from_u8_nhwc(pixels, 5, shape, &Device::Cpu)?;
        assert_eq!(
            dataset.images().flatten_all()?.to_vec1::<f32>()?,
            direct.images().flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn test_archive_shape_mismatch() -> Result<()> {
        let bytes = encode_archive(&gradient_pixels(2, [4, 4, 3]), 2, [4, 4, 3])?;
        let result = ImageDataset::from_archive(&bytes, [8, 8, 3], &Device::Cpu);
        assert!(matches!(result, Err(GanError::Dataset(_))));
        Ok(())
    }

    #[test]
    fn test_directory_is_resized() -> Result<()> {
        let dir = TempDir::new().unwrap();
        for i in 0..3u8 {
            let img = image::RgbImage::from_pixel(10, 6, image::Rgb([i * 50, 0, 255]));
            img.save(dir.path().join(format!("sunset_{i}.png")))?;
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let dataset = ImageDataset::from_directory(dir.path(), [4, 4, 3], &Device::Cpu)?;
        assert_eq!(dataset.images().dims(), &[3, 3, 4, 4]);
        Ok(())
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = ImageDataset::from_directory(dir.path(), [4, 4, 3], &Device::Cpu);
        assert!(matches!(result, Err(GanError::Dataset(_))));
    }

    #[test]
    fn test_select_gathers_in_order() -> Result<()> {
        let pixels: Vec<u8> = vec![0, 127, 255];
        let dataset = ImageDataset::from_u8_nhwc(pixels, 3, [1, 1, 1], &Device::Cpu)?;
        let picked = dataset.select(&[2, 0])?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(picked, vec![1.0, -1.0]);
        Ok(())
    }
}
