#![no_main]

use libfuzzer_sys::fuzz_target;
use plugin_catalog::Catalog;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(catalog) = Catalog::decode(text) {
        // Anything that decodes must survive a re-encode
        let encoded = catalog.encode().expect("decoded catalog must encode");
        let again = Catalog::decode(&encoded).expect("encoded catalog must decode");
        assert_eq!(again.index_by_path.len(), catalog.index_by_path.len());
        assert_eq!(again.server_plugins.len(), catalog.server_plugins.len());
    }
});
