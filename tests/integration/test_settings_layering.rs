//! Configuration template, file and environment layering.

use semdex::Settings;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_init_template_round_trips() {
    let temp_dir = TempDir::new().unwrap();
    let path = Settings::init_config_file_in(temp_dir.path(), false).unwrap();
    assert!(path.ends_with(".semdex/settings.toml"));

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.index.nlist, 128);
    assert_eq!(settings.index.nprobe, 10);
    assert_eq!(settings.index.distance_metric, "l2");
    assert!(settings.validate().is_ok());

    // Refuses to overwrite without force
    assert!(Settings::init_config_file_in(temp_dir.path(), false).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.toml");
    fs::write(&path, "[index]\nnprobe = 4\nnlist = 32\n").unwrap();

    unsafe {
        std::env::set_var("SEMDEX_INDEX__NPROBE", "16");
        std::env::set_var("SEMDEX_INGEST__REBUILD_EVERY", "0");
    }
    let loaded = Settings::load_from(&path);
    unsafe {
        std::env::remove_var("SEMDEX_INDEX__NPROBE");
        std::env::remove_var("SEMDEX_INGEST__REBUILD_EVERY");
    }

    let settings = loaded.unwrap();
    assert_eq!(settings.index.nprobe, 16);
    assert_eq!(settings.index.nlist, 32);
    assert_eq!(settings.ingest.rebuild_every, 0);
}
