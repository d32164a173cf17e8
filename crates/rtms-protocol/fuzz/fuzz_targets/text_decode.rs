#![no_main]

use libfuzzer_sys::fuzz_target;
use rtms_protocol::decode_text;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_text(text);
    }
});
