use std::collections::HashMap;

use scsi_target_rs::{
    mode_pages::{
        ALL_PAGES, PageMap,
        codec::assemble_mode_sense_data,
    },
    models::sense::FAULT_INVALID_FIELD_IN_CDB,
};

fn no_overrides() -> HashMap<u8, Vec<u8>> {
    HashMap::new()
}

/// Pages {1, 2} the way a small device would synthesize them.
fn two_pages() -> PageMap {
    let mut pages = PageMap::new();
    pages.insert(0x01, vec![0x01, 0x00, 0xaa, 0xbb]);
    pages.insert(0x02, vec![0x02, 0x00, 0xcc, 0xdd, 0xee]);
    pages
}

#[test]
fn test_headers_patched_at_insertion() {
    let out = assemble_mode_sense_data(ALL_PAGES, two_pages(), &no_overrides(), 4096)
        .expect("two pages must assemble");

    // Page 1: header byte = code, length byte = len - 2.
    assert_eq!(&out[..4], &[0x01, 0x02, 0xaa, 0xbb]);
    // Page 2 follows in ascending order.
    assert_eq!(&out[4..], &[0x02, 0x03, 0xcc, 0xdd, 0xee]);
}

#[test]
fn test_ps_bit_survives_header_patching() {
    let mut pages = PageMap::new();
    // Builder left PS plus stale low bits in the header byte.
    pages.insert(0x08, vec![0xc8, 0x00, 0x04]);

    let out = assemble_mode_sense_data(0x08, pages, &no_overrides(), 4096)
        .expect("single page must assemble");
    assert_eq!(out[0], 0x88, "header must be code | PS");
    assert_eq!(out[1], 1);
}

#[test]
fn test_page_zero_emitted_last() {
    let mut pages = two_pages();
    pages.insert(0x00, vec![0x00, 0x00, 0x11]);

    let out = assemble_mode_sense_data(ALL_PAGES, pages, &no_overrides(), 4096)
        .expect("pages must assemble");

    // Regardless of map insertion order page 0 trails everything, with only
    // its length byte patched.
    assert_eq!(&out[out.len() - 3..], &[0x00, 0x01, 0x11]);
    assert_eq!(out[0], 0x01, "non-zero pages still lead in ascending order");
}

#[test]
fn test_unsupported_page_faults() {
    let err = assemble_mode_sense_data(0x15, PageMap::new(), &no_overrides(), 4096)
        .expect_err("empty page set must fault");
    assert_eq!(err, FAULT_INVALID_FIELD_IN_CDB);

    let err = assemble_mode_sense_data(ALL_PAGES, PageMap::new(), &no_overrides(), 4096)
        .expect_err("no supported pages at all must fault");
    assert_eq!(err, FAULT_INVALID_FIELD_IN_CDB);
}

#[test]
fn test_empty_override_suppresses_page() {
    let mut overrides = HashMap::new();
    overrides.insert(0x01, Vec::new());

    let out = assemble_mode_sense_data(ALL_PAGES, two_pages(), &overrides, 4096)
        .expect("page 2 survives");
    assert_eq!(&out, &[0x02, 0x03, 0xcc, 0xdd, 0xee]);

    // Suppressing the only requested page leaves nothing.
    let mut single = PageMap::new();
    single.insert(0x01, vec![0x01, 0x00, 0xaa, 0xbb]);
    let err = assemble_mode_sense_data(0x01, single, &overrides, 4096)
        .expect_err("suppressed single page must fault");
    assert_eq!(err, FAULT_INVALID_FIELD_IN_CDB);
}

#[test]
fn test_override_replaces_page_bytes() {
    let mut overrides = HashMap::new();
    overrides.insert(0x02, vec![0x02, 0x00, 0x99]);

    let out = assemble_mode_sense_data(ALL_PAGES, two_pages(), &overrides, 4096)
        .expect("pages must assemble");
    assert_eq!(&out[4..], &[0x02, 0x01, 0x99]);
}

#[test]
fn test_override_ignored_for_other_single_page() {
    let mut overrides = HashMap::new();
    overrides.insert(0x02, vec![0x02, 0x00, 0x99]);

    let mut single = PageMap::new();
    single.insert(0x01, vec![0x01, 0x00, 0xaa, 0xbb]);
    let out = assemble_mode_sense_data(0x01, single, &overrides, 4096)
        .expect("page 1 must assemble untouched");
    assert_eq!(&out, &[0x01, 0x02, 0xaa, 0xbb]);
}

#[test]
fn test_capacity_violation_is_hard_failure() {
    let err = assemble_mode_sense_data(ALL_PAGES, two_pages(), &no_overrides(), 3)
        .expect_err("9 bytes cannot fit 3");
    assert_eq!(err, FAULT_INVALID_FIELD_IN_CDB);

    // The degenerate zero capacity (the old signed "negative max size") is a
    // fault too, never an empty success.
    let err = assemble_mode_sense_data(ALL_PAGES, two_pages(), &no_overrides(), 0)
        .expect_err("zero capacity must fault");
    assert_eq!(err, FAULT_INVALID_FIELD_IN_CDB);
}

#[test]
fn test_allocation_truncation_is_callers_min() {
    let out = assemble_mode_sense_data(ALL_PAGES, two_pages(), &no_overrides(), 4096)
        .expect("pages must assemble");
    assert_eq!(out.len(), 9);

    // Device layer truncates to the allocation length: 0 stays 0 bytes, 3
    // returns the head of the first page only.
    let n = out.len().min(0);
    assert_eq!(n, 0);
    let n = out.len().min(3);
    assert_eq!(&out[..n], &[0x01, 0x02, 0xaa]);
}
