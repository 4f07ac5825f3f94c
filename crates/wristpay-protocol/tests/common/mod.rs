//! Shared helpers for protocol integration tests.

#![allow(dead_code)]

use wristpay_core::{ChipFamily, constants::READ_RESPONSE_LEN};

pub const FAMILIES: [ChipFamily; 2] = [ChipFamily::Ultralight, ChipFamily::UltralightAes];

/// Deterministic memory image: every byte encodes its own address.
pub fn memory_image(page_count: u8) -> Vec<u8> {
    (0..page_count as usize * 4)
        .map(|addr| (addr as u8).wrapping_mul(31) ^ 0x5C)
        .collect()
}

/// What a tag answers to READ(page): four pages, wrapping at the page count.
pub fn synthetic_read_response(memory: &[u8], page: u8) -> Vec<u8> {
    (0..READ_RESPONSE_LEN)
        .map(|i| memory[(page as usize * 4 + i) % memory.len()])
        .collect()
}
