//! Fuzz target for domain message decoding
//!
//! Feeds the same bytes to every domain message decoder. Each must return
//! `Ok` or `Err` without panicking or over-reading.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_core::Payload;
use tessera_core::domain::messages::{
    AddedNode, ConnectRequest, ConnectionDenied, DomainList, ListRequest, PathQuery,
    PathResponse, Ping, PingReply, decode_uuid,
};

fuzz_target!(|data: &[u8]| {
    let payload = || Payload::from_bytes(data.to_vec());

    let _ = DomainList::decode(&mut payload());
    let _ = AddedNode::decode(&mut payload());
    let _ = ConnectRequest::decode(&mut payload());
    let _ = ListRequest::decode(&mut payload());
    let _ = ConnectionDenied::decode(&mut payload());
    let _ = PathQuery::decode(&mut payload());
    let _ = PathResponse::decode(&mut payload());
    let _ = Ping::decode(&mut payload());
    let _ = PingReply::decode(&mut payload());
    let _ = decode_uuid(&mut payload());
});
