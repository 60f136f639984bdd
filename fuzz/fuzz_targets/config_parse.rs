//! Fuzz test for configuration file parsing
//!
//! Arbitrary TOML must be accepted or rejected as a client configuration
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_core::ClientConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = ClientConfig::from_toml_str(s) {
            let _ = config.transport_config();
        }
    }
});
