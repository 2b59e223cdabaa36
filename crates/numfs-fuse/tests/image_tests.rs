//! Mounting a storage image file.
//!
//! Run: `cargo test -p numfs-fuse --test image_tests`

mod common;

use common::*;
use numfs_core::{ImageConnector, MemoryDevice, ROOT_INODE};
use numfs_fuse::MountConfig;
use serde_json::{Value, json};
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_image(path: &Path, image: &Value) {
    fs::write(path, serde_json::to_vec_pretty(image).unwrap()).unwrap();
}

fn read_image(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

/// Mounts an image. The memory device is unused and only fills the harness slot.
fn mount_image(connector: ImageConnector) -> TestMount {
    TestMount::with_connector(
        MemoryDevice::default(),
        Box::new(connector),
        MountConfig::default(),
    )
}

fn sample_image() -> Value {
    json!({
        "capacity": 1000,
        "records": [
            { "name": "main", "type": "py", "autoImport": true, "code": "print('hi')\n" },
            { "name": "notes", "type": "txt", "code": "todo" }
        ]
    })
}

#[test]
fn test_image_records_are_listed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("storage.json");
    write_image(&path, &sample_image());

    let mount = mount_image(ImageConnector::new(&path));
    assert_eq!(mount.root_names(), vec!["main.py", "notes.txt"]);
    assert_eq!(mount.read_all(mount.ino("/main.py")), b"print('hi')\n");

    let usage = mount.fs.statfs().unwrap();
    assert_eq!(usage.capacity, 1000);
    assert_eq!(usage.used, 16);
}

#[test]
fn test_image_write_is_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("storage.json");
    write_image(&path, &sample_image());
    let mount = mount_image(ImageConnector::new(&path));

    let (_, fh) = mount
        .fs
        .create(ROOT_INODE, OsStr::new("game.py"), libc::O_WRONLY | libc::O_CREAT)
        .unwrap();
    mount.fs.write(fh, 0, b"from kandinsky import *").unwrap();
    mount.fs.release(fh).unwrap();

    let image = read_image(&path);
    let records = image["records"].as_array().unwrap();
    let game = records
        .iter()
        .find(|r| r["name"] == "game")
        .expect("game record missing");
    assert_eq!(game["type"], "py");
    assert_eq!(game["code"], "from kandinsky import *");
    assert_eq!(image["capacity"], 1000);
}

#[test]
fn test_image_rename_and_unlink() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("storage.json");
    write_image(&path, &sample_image());
    let mount = mount_image(ImageConnector::new(&path));

    mount
        .fs
        .rename(ROOT_INODE, OsStr::new("main.py"), ROOT_INODE, OsStr::new("start.py"), 0)
        .unwrap();
    mount.fs.unlink(ROOT_INODE, OsStr::new("notes.txt")).unwrap();

    let image = read_image(&path);
    let names: Vec<&str> = image["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["start"]);
    assert_eq!(mount.root_names(), vec!["start.py"]);
}

#[test]
fn test_missing_image_fails_mount() {
    let dir = TempDir::new().unwrap();
    let connector = ImageConnector::new(dir.path().join("absent.json"));
    let session = numfs_core::Session::new(
        Box::new(connector),
        Box::new(|_: &str| {}),
        TEST_IO_TIMEOUT,
    );
    assert!(session.ensure_connected().is_err());
    assert_eq!(session.state(), numfs_core::SessionState::Failed);
}

#[test]
fn test_create_if_missing_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("new.json");
    let mount = mount_image(ImageConnector::new(&path).create_if_missing());

    assert!(mount.root_names().is_empty());
    mount.write_new("hello.py", b"print(1)");
    assert_eq!(read_image(&path)["records"][0]["code"], "print(1)");
}
