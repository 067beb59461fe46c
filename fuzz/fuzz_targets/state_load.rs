#![no_main]

use std::fs;

use docbuild::state::{FileStateStore, StateLifecycle, state_path};
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    if fs::write(state_path(td.path()), data).is_ok() {
        let store = FileStateStore::new(td.path());
        let _ = store.load();
    }
});
