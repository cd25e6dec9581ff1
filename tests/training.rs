//! End-to-end training on tiny CPU models.

use std::path::Path;

use candle_core::Device;
use tempfile::TempDir;

use sunset_gan::config::DataConfig;
use sunset_gan::model::Trainable;
use sunset_gan::architecture::{DiscriminatorArch, GeneratorArch};
use sunset_gan::storage::{Storage, StoragePath};
use sunset_gan::{GanConfig, Trainer};

fn write_sunsets(dir: &Path, n: u8) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..n {
        let image = image::RgbImage::from_fn(12, 12, |x, y| {
            image::Rgb([255 - (y * 20) as u8, (x * 10) as u8 + i, 40 + i * 10])
        });
        image.save(dir.join(format!("sunset_{i:02}.png"))).unwrap();
    }
}

fn tiny_config(data: &Path) -> GanConfig {
    let mut config = GanConfig {
        data: DataConfig {
            path: data.to_string_lossy().into_owned(),
        },
        ..GanConfig::default()
    };
    config.model.image_shape = [8, 8, 3];
    config.model.latent_dims = 6;
    config.model.discriminator_filters = vec![4, 8];
    config.model.generator_head_filters = vec![];
    config.model.generator_se_filters = vec![4];
    config.model.generator_tail_filters = vec![4];
    config.training.epochs = 2;
    config.training.batch_size = 3;
    config.training.max_q_size = 3;
    config.training.q_update_inc = 2;
    config.training.num_replicas = 2;
    config
}

#[test]
fn test_trains_from_image_directory_with_replicas() {
    let temp_dir = TempDir::new().unwrap();
    let data = temp_dir.path().join("images");
    write_sunsets(&data, 7);

    let mut config = tiny_config(&data);
    config.model.print_summaries = true;
    config.plotting.plot_dir = temp_dir.path().join("plots").to_string_lossy().into_owned();
    config.plotting.plot_dims = [2, 2];
    config.plotting.plot_tstep = 2;
    config.checkpoint.save_dir = Some(temp_dir.path().join("models").to_string_lossy().into_owned());
    config.checkpoint.save_tstep = Some(1);

    let mut trainer = Trainer::with_storage(
        config,
        Storage::from_config(&Default::default()).unwrap(),
        Device::Cpu,
    )
    .unwrap();
    let summaries = trainer.train().unwrap();

    // 7 images in batches of 3: steps of 3, 3 and 1.
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.steps == 3));
    assert!(summaries.iter().all(|s| s.d_loss.is_finite() && s.g_loss.is_finite()));
    assert_eq!(trainer.timestep(), 7);

    // Insertions at t = 2, 4, 6: initial snapshot plus three, capped at 3.
    assert_eq!(trainer.generator_queue().len(), 3);
    assert_eq!(trainer.discriminator_queue().len(), 3);
    assert_eq!(trainer.targets().len(), 3);

    let plots = temp_dir.path().join("plots");
    assert!(!plots.join("epoch_1.png").exists());
    let grid = image::open(plots.join("epoch_2.png")).unwrap().to_rgb8();
    assert_eq!(grid.dimensions(), (16, 16));

    let models = temp_dir.path().join("models");
    assert!(models.join("discriminator.safetensors").exists());
    assert!(models.join("generator.safetensors").exists());
}

#[test]
fn test_saved_models_restore_and_keep_training() {
    let temp_dir = TempDir::new().unwrap();
    let data = temp_dir.path().join("images");
    write_sunsets(&data, 4);
    let models = temp_dir.path().join("models");
    let storage = Storage::from_config(&Default::default()).unwrap();

    let mut config = tiny_config(&data);
    config.training.epochs = 1;
    let mut trainer = Trainer::with_storage(config.clone(), storage.clone(), Device::Cpu).unwrap();
    trainer.train().unwrap();
    trainer.save_models(models.to_str().unwrap()).unwrap();

    let generator_path = StoragePath::parse(models.join("generator.safetensors").to_str().unwrap()).unwrap();
    let generator = Trainable::<GeneratorArch>::load(&storage, &generator_path, &Device::Cpu).unwrap();
    assert_eq!(generator.arch(), trainer.generator().arch());
    assert_eq!(generator.param_count(), trainer.generator().param_count());

    let discriminator_path =
        StoragePath::parse(models.join("discriminator.safetensors").to_str().unwrap()).unwrap();
    assert!(Trainable::<DiscriminatorArch>::load(&storage, &discriminator_path, &Device::Cpu).is_ok());

    config.model.generator_path = Some(models.join("generator.safetensors").to_string_lossy().into_owned());
    config.model.discriminator_path =
        Some(models.join("discriminator.safetensors").to_string_lossy().into_owned());
    let mut resumed = Trainer::with_storage(config, storage, Device::Cpu).unwrap();
    let summaries = resumed.train().unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].g_loss.is_finite());
}

#[test]
fn test_missing_dataset_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = tiny_config(&temp_dir.path().join("nowhere"));
    let mut trainer =
        Trainer::with_storage(config, Storage::from_config(&Default::default()).unwrap(), Device::Cpu)
            .unwrap();
    assert!(trainer.train().is_err());
}
