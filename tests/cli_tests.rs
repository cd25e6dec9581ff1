//! Integration tests for the sunset-gan CLI.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use sunset_gan::dataset::encode_archive;

/// Write `content` as `config.yaml` under `dir`.
fn create_test_config(dir: &Path, content: &str) -> String {
    let config_path = dir.join("config.yaml");
    fs::write(&config_path, content).expect("Failed to write test config");
    config_path.to_string_lossy().into_owned()
}

fn run_cli(args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("sunset-gan").expect("Failed to find sunset-gan binary");
    cmd.args(args).env("SUNSET_GAN_FORCE_CPU", "1");
    cmd
}

/// Tiny 8x8 RGB networks over a 6-image archive in `dir`.
fn tiny_config_yaml(dir: &Path) -> String {
    let pixels: Vec<u8> = (0..6 * 8 * 8 * 3).map(|i| (i * 13 % 256) as u8).collect();
    let archive = dir.join("sunsets.safetensors");
    fs::write(&archive, encode_archive(&pixels, 6, [8, 8, 3]).unwrap()).unwrap();

    format!(
        r#"
model:
  image_shape: [8, 8, 3]
  latent_dims: 6
  discriminator_filters: [4, 8]
  generator_head_filters: []
  generator_se_filters: [4]
  generator_tail_filters: [4]
training:
  epochs: 1
  batch_size: 4
  max_q_size: 2
  q_update_inc: 1
data:
  path: "{}"
plotting:
  plot_dims: [1, 2]
  plot_dir: "{}"
"#,
        archive.display(),
        dir.join("plots").display()
    )
}

#[test]
fn test_validate_command_valid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(temp_dir.path(), &tiny_config_yaml(temp_dir.path()));

    run_cli(&["validate", &config_path])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("[8, 8, 3]"));
}

#[test]
fn test_validate_command_rejects_mismatched_generator() {
    let temp_dir = TempDir::new().unwrap();
    let yaml = tiny_config_yaml(temp_dir.path())
        .replace("generator_tail_filters: [4]", "generator_tail_filters: [4, 4]");
    let config_path = create_test_config(temp_dir.path(), &yaml);

    run_cli(&["validate", &config_path]).assert().failure();
}

#[test]
fn test_validate_command_missing_file() {
    run_cli(&["validate", "/nonexistent/config.yaml"]).assert().failure();
}

#[test]
fn test_init_writes_valid_config() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("sunsets.yaml");
    let output = output.to_str().unwrap();

    run_cli(&["init", output])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written"));

    let content = fs::read_to_string(output).unwrap();
    assert!(content.contains("max_q_size: 25"));
    run_cli(&["validate", output]).assert().success();
}

#[test]
fn test_train_rejects_unknown_optimizer() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(temp_dir.path(), &tiny_config_yaml(temp_dir.path()));

    run_cli(&["train", &config_path, "--d-opt", "rmsprop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown optimizer"));
}

#[test]
fn test_train_then_sample() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(temp_dir.path(), &tiny_config_yaml(temp_dir.path()));
    let models = temp_dir.path().join("models");

    run_cli(&[
        "train",
        &config_path,
        "--d-opt",
        "adamw",
        "--d-opt-params",
        "weight_decay",
        "0.001",
        "amsgrad",
        "True",
        "--g-opt-params",
        "beta1",
        "0.5",
        "--save-dir",
        models.to_str().unwrap(),
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Epoch 1"));

    let generator = models.join("generator.safetensors");
    assert!(generator.exists());
    assert!(models.join("discriminator.safetensors").exists());
    assert!(temp_dir.path().join("plots").join("epoch_1.png").exists());

    let grid = temp_dir.path().join("grid.png");
    run_cli(&[
        "sample",
        "--generator",
        generator.to_str().unwrap(),
        "--output",
        grid.to_str().unwrap(),
        "--rows",
        "2",
        "--cols",
        "3",
    ])
    .assert()
    .success();

    let image = image::open(&grid).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (24, 16));
}
