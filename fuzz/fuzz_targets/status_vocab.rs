#![no_main]

use libfuzzer_sys::fuzz_target;
use stigpost_core::types::{Category, FindingStatus};
use stigpost_ingest::parser::{ckl, echecklist, mbsa, xccdf};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ckl::ckl_status(s);
        let _ = echecklist::cell_status(s);
        let _ = mbsa::grade_status(s);
        let _ = xccdf::result_status(s);
        let _ = xccdf::short_id(s);
        let _ = FindingStatus::from_str_loose(s);
        let _ = Category::from_str_loose(s);
    }
});
