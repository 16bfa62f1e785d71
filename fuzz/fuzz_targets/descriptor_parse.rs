#![no_main]
use hyperdrive::module::registry::ModuleDescriptor;
use hyperdrive::settings::ConfigMetadata;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Descriptors are read from disk; adapters return metadata as JSON
    if let Ok(descriptor) = ModuleDescriptor::from_slice(data, "fuzz/descriptor.json") {
        let _ = descriptor.fqmn();
        let _ = descriptor.dependency_specs();
    }

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = ConfigMetadata::from_json(value);
    }
});
