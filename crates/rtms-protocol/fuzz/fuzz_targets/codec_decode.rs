#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rtms_protocol::codec::decode_frame;

fuzz_target!(|data: &[u8]| {
    // Must return Err on bad input, never panic
    let mut buf = Bytes::copy_from_slice(data);
    let _ = decode_frame(&mut buf);
});
