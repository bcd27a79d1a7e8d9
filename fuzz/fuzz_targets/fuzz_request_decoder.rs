//! Fuzz target: `decode_request`
//!
//! Arbitrary frames must decode or fail cleanly, and whatever decodes
//! must render a response line without panicking.
//!
//! cargo fuzz run fuzz_request_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use wellkeeper::rpc::messages::{Response, decode_request};

fuzz_target!(|data: &[u8]| {
    match decode_request(data) {
        Ok(req) => {
            let _ = req.name();
            let _ = req.well();
        }
        Err(e) => {
            let line = Response::from_error(None, None, &e).to_json();
            assert!(!line.contains('\n'));
        }
    }
});
