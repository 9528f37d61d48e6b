#![no_main]

use libfuzzer_sys::fuzz_target;
use plugin_catalog::plugin_docs::parse_help;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    if let Ok(summary) = parse_help(&text) {
        assert!(!summary.subcommands.iter().any(|s| s == "help"));
        assert!(summary.aliases.iter().all(|a| !a.trim().is_empty()));
    }
});
