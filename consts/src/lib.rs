// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

/// Size in bytes of the user memory bank available on the tags we issue.
/// The first two bytes hold the big-endian length of the stored content.
pub const TAG_CAPACITY: usize = 1024;

/// Size of the big-endian length word in front of the tag content.
pub const TAG_LEN_PREFIX: usize = 2;

/// Largest record that fits on a tag next to its length word.
pub const MAX_RECORD_SIZE: usize = TAG_CAPACITY - TAG_LEN_PREFIX;

/// Reader identifiers are four bytes, big-endian on the wire.
pub const READER_ID_SIZE: usize = 4;

/// Tag identifiers embedded in issued plaintexts, big-endian.
pub const TAG_ID_SIZE: usize = 4;

/// Reader id accepted by every reader in the Baseline scheme.
pub const ANY_READER: u32 = 0xFFFF_FFFF;

/// AES-256 key shared between the issuer and a reader.
pub const SHARED_KEY_SIZE: usize = 32;

/// AES-GCM nonce stored in front of every payload.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag appended to every payload.
pub const AEAD_TAG_SIZE: usize = 16;

/// Raw `r || s` ECDSA P-256 signature.
pub const ECDSA_SIGNATURE_SIZE: usize = 64;

/// HMAC-SHA256 output used as the Baseline record tag.
pub const HMAC_SIZE: usize = 32;

/// SEC1 compressed P-256 point.
pub const POINT_SIZE: usize = 33;

/// P-256 scalars and field elements.
pub const SCALAR_SIZE: usize = 32;

/// A Tracker tag holds three El-Gamal ciphertexts of two points each.
pub const TRACKER_RECORD_SIZE: usize = 6 * POINT_SIZE;

/// Length of the EPC reported by the reader during inventory.
pub const EPC_SIZE: usize = 12;

/// OLED display width, in pixels.
pub const SCREEN_WIDTH: usize = 128;
/// OLED display height, in pixels.
pub const SCREEN_HEIGHT: usize = 128;
pub const CHAR_WIDTH: usize = 6;
pub const CHAR_HEIGHT: usize = 8;
/// Number of text columns on the display.
pub const SCREEN_WIDTH_CHAR: usize = SCREEN_WIDTH / CHAR_WIDTH;
/// Number of text rows on the display.
pub const SCREEN_HEIGHT_CHAR: usize = SCREEN_HEIGHT / CHAR_HEIGHT;

/// Number of telemetry frames buffered between the scan loop and the publisher.
pub const TELEMETRY_QUEUE_LEN: usize = 8;

/// Size of one encoded telemetry frame.
pub const TELEMETRY_FRAME_SIZE: usize = 64;

/// Maximum number of report sinks attached to a reporter.
pub const MAX_SINKS: usize = 4;

pub const MQTT_PORT: u16 = 1883;
pub const PUBLISH_TOPIC: &str = "RFID";

pub const STEPAUTH_SCREEN_BANNER: &str = "StepAuth";
pub const BASELINE_SCREEN_BANNER: &str = "Baseline";
pub const TRACKER_SCREEN_BANNER: &str = "Tracker Update";
