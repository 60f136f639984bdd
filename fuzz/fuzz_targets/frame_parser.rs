//! Fuzz target for frame parsing
//!
//! Arbitrary datagrams must decode or be rejected, never panic, and a
//! decoded frame must re-encode to a datagram that decodes the same way.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_core::Frame;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::from_received(data.to_vec()) else {
        return;
    };

    let again = Frame::from_received(frame.to_wire()).expect("re-encoded frame decodes");
    assert_eq!(again.packet_type(), frame.packet_type());
    assert_eq!(again.source_id(), frame.source_id());
    assert_eq!(again.payload().as_slice(), frame.payload().as_slice());
});
