// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reader side of the RFID tag update protocols.
//!
//! A reader runs one scan cycle at a time: it finds a tag, reads its content,
//! checks it according to the provisioned [`Scheme`] and writes the updated
//! content back. Three schemes are supported:
//!
//! * StepAuth: the issuer signs a nested ("onion") record, every layer is
//!   encrypted for exactly one reader. The reader peels its own layer off.
//! * Baseline: all readers share one key and append their id to an encrypted
//!   log of visited readers.
//! * Tracker: the tag carries El-Gamal ciphertexts which the reader updates
//!   homomorphically, without being able to decrypt them.
//!
//! Hardware, display and network are behind the [`TagDriver`] and [`Sink`]
//! traits so the state machine runs unchanged on the device and on a host.

#![no_std]

#[cfg(feature = "issuer")]
extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod cipher;
pub mod cycle;
pub mod driver;
mod error;
pub mod homomorphic;
#[cfg(feature = "issuer")]
pub mod issuer;
pub mod queue;
pub mod record;
pub mod report;
pub mod scheme;
pub mod signature;


pub use {
    cipher::SharedKey,
    cycle::{Context, CycleState, TagUpdater},
    driver::{MemoryTag, TagDriver, TagPresent},
    error::Error,
    homomorphic::{Ciphertext, HomomorphicEngine, TrackerRecord},
    queue::BytesQueue,
    record::{SignatureScheme, TagRecord},
    report::{CycleOutcome, CycleReport, Reporter, Sink},
    scheme::{ReaderIdentity, Scheme, SchemeKind, TrackerUpdate},
    signature::VerificationResult,
};

/// Re-exported so that users of the crate do not need a direct `p256` dependency.
pub use p256;
