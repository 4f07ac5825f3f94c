//! Property tests for frame validation and READ decoding.

mod common;

use proptest::prelude::*;
use wristpay_core::{BitVector, ChipFamily};
use wristpay_protocol::{CommandCodec, ProtocolError};

fn family() -> impl Strategy<Value = ChipFamily> {
    prop_oneof![Just(ChipFamily::Ultralight), Just(ChipFamily::UltralightAes)]
}

proptest! {
    /// Every page at or past the page count is rejected before a frame exists.
    #[test]
    fn prop_out_of_range_page_is_precondition(family in family(), offset in 0u8..=195) {
        let codec = CommandCodec::new(family);
        let page = codec.page_count().saturating_add(offset);

        let read = codec.encode_read(page).unwrap_err();
        prop_assert!(read.is_precondition());

        let write = codec.encode_write(page, &[0; 4]).unwrap_err();
        prop_assert_eq!(write, ProtocolError::InvalidPage { page, page_count: codec.page_count() });
    }

    #[test]
    fn prop_payload_length_must_be_one_page(
        family in family(),
        data in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let codec = CommandCodec::new(family);
        let result = codec.encode_write(4, &data);
        prop_assert_eq!(result.is_ok(), data.len() == 4);
    }

    /// Encoding READ(page) and decoding the tag's answer yields the page itself.
    #[test]
    fn prop_read_recovers_requested_page(family in family(), page_seed in any::<u8>()) {
        let codec = CommandCodec::new(family);
        let page = page_seed % codec.page_count();
        let memory = common::memory_image(codec.page_count());

        let frame = codec.encode_read(page).unwrap().to_bytes().unwrap();
        prop_assert_eq!(frame.clone(), vec![0x30, page]);

        let response = common::synthetic_read_response(&memory, frame[1]);
        let block = codec.decode_read(&response).unwrap();
        let bytes = codec.requested_page(&block).unwrap();

        let start = page as usize * 4;
        prop_assert_eq!(&bytes[..], &memory[start..start + 4]);
    }

    #[test]
    fn prop_authenticate2_needs_exactly_32_bytes(len in 0usize..64) {
        for family in common::FAMILIES {
            let codec = CommandCodec::new(family);
            let result = codec.encode_authenticate2(&BitVector::zeros(len * 8));
            prop_assert_eq!(result.is_ok(), len == 32);
        }
    }
}
