use serde::Deserialize;

use std::{env, fs};

use super::*;

#[test]
fn test_file_helpers() {
    let dir = {
        let mut dir = env::temp_dir();
        dir.push("helix-test-file-helpers");
        dir
    };
    fs::remove_dir_all(&dir).ok();

    let loc = {
        let mut loc = dir.clone();
        loc.push("scratch.dat");
        loc.into_os_string()
    };

    let mut fd = create_file_a(&loc).unwrap();
    sync_write(&mut fd, b"hello world").unwrap();

    {
        let mut fd = open_file_a(&loc).unwrap();
        sync_write(&mut fd, b" again").unwrap();
    }

    let data = fs::read(&loc).unwrap();
    assert_eq!(&data, b"hello world again");

    open_file_r(&loc).unwrap();

    // create_file_a purges the older file.
    let mut fd = create_file_a(&loc).unwrap();
    sync_write(&mut fd, b"fresh").unwrap();
    let data = fs::read(&loc).unwrap();
    assert_eq!(&data, b"fresh");

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_load_toml() {
    #[derive(Deserialize)]
    struct T {
        name: String,
        count: usize,
    }

    let loc = {
        let mut loc = env::temp_dir();
        loc.push("helix-test-load-toml.toml");
        loc
    };
    fs::write(&loc, "name = 'helix'\ncount = 42\n").unwrap();

    let t: T = load_toml(&loc).unwrap();
    assert_eq!(t.name, "helix");
    assert_eq!(t.count, 42);

    fs::remove_file(&loc).ok();
}
