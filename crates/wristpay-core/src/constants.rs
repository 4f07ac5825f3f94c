//! Memory layout and protocol constants for the MIFARE Ultralight family.
//!
//! Tag memory is addressed in pages of four bytes. Both supported families
//! share the header and user-memory layout; they differ in where the
//! configuration and key pages live:
//!
//! ```text
//! page  Ultralight / Ultralight-C        Ultralight-AES
//! 0x00  UID0 UID1 UID2 BCC0              same
//! 0x01  UID3 UID4 UID5 UID6              same
//! 0x02  BCC1 INT  LOCK LOCK              same
//! 0x03  OTP                              same
//! 0x04  user memory (144 bytes)          same
//!  ..
//! 0x27
//! 0x28  LOCK2/3                          LOCK2/3
//! 0x29  counter                          CFG0 [flags, -, -, AUTH0]
//! 0x2A  AUTH0 [auth0, -, -, -]           CFG1 [access, -, -, -]
//! 0x2B  AUTH1                            -
//! 0x2C  3DES key (16 bytes)              -
//!  ..
//! 0x30                                   data protection key (16 bytes)
//! 0x34                                   UID retrieval key (16 bytes)
//! 0x38                                   originality key (16 bytes)
//! ```
//!
//! # Usage
//!
//! ```
//! use wristpay_core::constants::*;
//!
//! let user_pages = USER_MEMORY_END - USER_MEMORY_START;
//! assert_eq!(user_pages as usize * PAGE_SIZE, USER_MEMORY_SIZE);
//! ```

// ============================================================================
// Page geometry
// ============================================================================

/// Bytes per page.
pub const PAGE_SIZE: usize = 4;

/// Pages returned by a single READ command.
pub const READ_PAGES: usize = 4;

/// Bytes returned by a single READ command.
pub const READ_RESPONSE_LEN: usize = PAGE_SIZE * READ_PAGES;

/// Number of addressable pages on an Ultralight / Ultralight-C tag.
pub const PAGE_COUNT: u8 = 48;

/// Number of addressable pages on an Ultralight-AES tag.
pub const PAGE_COUNT_AES: u8 = 60;

/// First page of user memory.
pub const USER_MEMORY_START: u8 = 0x04;

/// One past the last page of user memory.
pub const USER_MEMORY_END: u8 = 0x28;

/// User memory size in bytes.
pub const USER_MEMORY_SIZE: usize = (USER_MEMORY_END - USER_MEMORY_START) as usize * PAGE_SIZE;

// ============================================================================
// UID
// ============================================================================

/// Length of the UID stored in pages 0 and 1.
pub const UID_LEN: usize = 7;

/// Cascade tag mixed into the first UID check byte.
pub const CASCADE_TAG: u8 = 0x88;

// ============================================================================
// Configuration pages
// ============================================================================

/// Ultralight-C page holding AUTH0 in byte 0.
pub const ULC_AUTH0_PAGE: u8 = 0x2A;

/// Ultralight-C page holding AUTH1 in byte 0.
pub const ULC_AUTH1_PAGE: u8 = 0x2B;

/// First of the four Ultralight-C 3DES key pages.
pub const ULC_KEY_PAGE: u8 = 0x2C;

/// Ultralight-AES configuration page 0 (flags in byte 0, AUTH0 in byte 3).
pub const AES_CFG0_PAGE: u8 = 0x29;

/// Ultralight-AES configuration page 1.
pub const AES_CFG1_PAGE: u8 = 0x2A;

/// Byte index of AUTH0 within [`AES_CFG0_PAGE`].
pub const AES_AUTH0_BYTE: usize = 3;

/// Bit in CFG0 byte 0 that makes the tag require CMAC-protected frames.
pub const AES_CMAC_FLAG: u8 = 0x02;

/// First of the four data protection key pages.
pub const AES_DATA_PROT_KEY_PAGE: u8 = 0x30;

/// First of the four UID retrieval key pages.
pub const AES_UID_RETR_KEY_PAGE: u8 = 0x34;

/// First of the four originality key pages.
pub const AES_ORIGINALITY_KEY_PAGE: u8 = 0x38;

/// AUTH0 value that protects everything from the middle of user memory on.
pub const AUTH0_PROTECT_USER_MEMORY: u8 = 0x10;

// ============================================================================
// Keys
// ============================================================================

/// Length of the 3DES secret supplied by the terminal configuration.
pub const TDES_SECRET_LEN: usize = 6;

/// Length of the 2-key 3DES key stored on an Ultralight-C tag.
pub const TDES_KEY_LEN: usize = 16;

/// Length of an AES-128 key.
pub const AES_KEY_LEN: usize = 16;

// ============================================================================
// Acknowledgement
// ============================================================================

/// 4-bit ACK returned by WRITE.
pub const ACK: u8 = 0x0A;

/// Upper bound (inclusive) of NAK codes; every value except [`ACK`] below it is a NAK.
pub const NAK_MAX: u8 = 0x0F;
