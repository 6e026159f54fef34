#![no_main]

use libfuzzer_sys::fuzz_target;
use pixpress::storage::{sanitize_extension, ArtifactId};

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        if let Some(id) = ArtifactId::parse(raw) {
            assert_eq!(id.as_str().len(), 32);
            assert!(!id.as_str().contains(['/', '\\', '.']));
        }
        let ext = sanitize_extension(raw);
        assert!(ext.bytes().all(|b| b.is_ascii_alphanumeric()));
    }
});
