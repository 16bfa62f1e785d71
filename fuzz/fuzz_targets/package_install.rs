#![no_main]
use hyperdrive::module::registry::ModuleInstaller;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Arbitrary archives must be rejected or installed inside the temp root
    let Ok(temp) = tempfile::TempDir::new() else {
        return;
    };
    let modules = temp.path().join("modules");
    let installer = ModuleInstaller::new(&modules, temp.path().join("global-adapter"));
    if installer.install_from(Cursor::new(data), "fuzz.zip").is_ok() {
        for entry in std::fs::read_dir(&modules).into_iter().flatten().flatten() {
            assert!(entry.path().starts_with(&modules));
        }
    }
});
