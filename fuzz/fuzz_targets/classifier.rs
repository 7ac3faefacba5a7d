#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stigpost_ingest::classify_bytes;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    name: &'a str,
    head: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    let _ = classify_bytes(input.name, input.head);
});
