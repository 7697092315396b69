// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tag record codec.
//!
//! Tag memory holds `[len: u16 BE][content][don't care]`. For StepAuth and
//! Baseline the content is a [`TagRecord`]:
//!
//! ```text
//! [reader_id: 4][next_reader_id: 4][signature: 64 | 32][payload: nonce || ciphertext || tag]
//! ```

use {
    crate::{cipher::MIN_PAYLOAD_SIZE, Error},
    consts::{
        ECDSA_SIGNATURE_SIZE, HMAC_SIZE, MAX_RECORD_SIZE, READER_ID_SIZE, TAG_CAPACITY,
        TAG_LEN_PREFIX,
    },
    heapless::Vec,
};

/// Encoded record content.
pub type RecordBuf = Vec<u8, MAX_RECORD_SIZE>;

/// Content together with its length word, as written to the tag.
pub type FrameBuf = Vec<u8, TAG_CAPACITY>;

/// Size of `reader_id || next_reader_id`.
pub const HEADER_SIZE: usize = 2 * READER_ID_SIZE;

/// How a record is authenticated; fixes the length of the signature field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignatureScheme {
    /// ECDSA P-256 over SHA-256 by the issuer (StepAuth).
    EcdsaP256,
    /// HMAC-SHA256 under the shared key (Baseline).
    HmacSha256,
}

impl SignatureScheme {
    pub const fn len(self) -> usize {
        match self {
            Self::EcdsaP256 => ECDSA_SIGNATURE_SIZE,
            Self::HmacSha256 => HMAC_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    reader_id: [u8; READER_ID_SIZE],
    next_reader_id: [u8; READER_ID_SIZE],
    signature: Vec<u8, ECDSA_SIGNATURE_SIZE>,
    payload: RecordBuf,
}

impl TagRecord {
    /// Assemble a record. The signature must have the scheme's length so
    /// that [`TagRecord::decode`] reads back the same fields.
    pub fn new(
        reader_id: u32,
        next_reader_id: u32,
        scheme: SignatureScheme,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<Self, Error> {
        if signature.len() != scheme.len() || payload.len() < MIN_PAYLOAD_SIZE {
            return Err(Error::MalformedRecord);
        }
        if HEADER_SIZE + signature.len() + payload.len() > MAX_RECORD_SIZE {
            return Err(Error::CapacityExceeded);
        }
        Ok(Self {
            reader_id: reader_id.to_be_bytes(),
            next_reader_id: next_reader_id.to_be_bytes(),
            signature: Vec::from_slice(signature).map_err(|_| Error::MalformedRecord)?,
            payload: Vec::from_slice(payload).map_err(|_| Error::CapacityExceeded)?,
        })
    }

    /// Parse record content. The signature length is fixed by the scheme.
    pub fn decode(bytes: &[u8], scheme: SignatureScheme) -> Result<Self, Error> {
        let signature_len = scheme.len();
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(Error::MalformedRecord);
        }
        if bytes.len() < HEADER_SIZE + signature_len + MIN_PAYLOAD_SIZE {
            return Err(Error::MalformedRecord);
        }

        let (reader_id, rest) = bytes.split_at(READER_ID_SIZE);
        let (next_reader_id, rest) = rest.split_at(READER_ID_SIZE);
        let (signature, payload) = rest.split_at(signature_len);

        Ok(Self {
            reader_id: reader_id.try_into().map_err(|_| Error::MalformedRecord)?,
            next_reader_id: next_reader_id.try_into().map_err(|_| Error::MalformedRecord)?,
            signature: Vec::from_slice(signature).map_err(|_| Error::MalformedRecord)?,
            payload: Vec::from_slice(payload).map_err(|_| Error::MalformedRecord)?,
        })
    }

    pub fn encode(&self) -> Result<RecordBuf, Error> {
        let mut buf = RecordBuf::new();
        buf.extend_from_slice(&self.header())
            .and_then(|()| buf.extend_from_slice(&self.signature))
            .and_then(|()| buf.extend_from_slice(&self.payload))
            .map_err(|()| Error::CapacityExceeded)?;
        Ok(buf)
    }

    pub fn reader_id(&self) -> u32 {
        u32::from_be_bytes(self.reader_id)
    }

    pub fn next_reader_id(&self) -> u32 {
        u32::from_be_bytes(self.next_reader_id)
    }

    /// `reader_id || next_reader_id`, also used as AEAD associated data.
    pub fn header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0; HEADER_SIZE];
        header[..READER_ID_SIZE].copy_from_slice(&self.reader_id);
        header[READER_ID_SIZE..].copy_from_slice(&self.next_reader_id);
        header
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The bytes covered by the signature: `header || payload`.
    pub fn signed_message(&self) -> Result<RecordBuf, Error> {
        signed_message(&self.header(), &self.payload)
    }
}

/// Build `header || payload` for signing before the record itself exists.
pub fn signed_message(header: &[u8; HEADER_SIZE], payload: &[u8]) -> Result<RecordBuf, Error> {
    let mut message = RecordBuf::new();
    message
        .extend_from_slice(header)
        .and_then(|()| message.extend_from_slice(payload))
        .map_err(|()| Error::CapacityExceeded)?;
    Ok(message)
}

/// Prefix content with its big-endian length word.
pub fn frame(content: &[u8]) -> Result<FrameBuf, Error> {
    if content.is_empty() {
        return Err(Error::MalformedRecord);
    }
    let len = u16::try_from(content.len()).map_err(|_| Error::CapacityExceeded)?;
    let mut framed = FrameBuf::new();
    framed
        .extend_from_slice(&len.to_be_bytes())
        .and_then(|()| framed.extend_from_slice(content))
        .map_err(|()| Error::CapacityExceeded)?;
    Ok(framed)
}

/// Decode the length word read from the start of tag memory.
pub fn content_len(prefix: [u8; TAG_LEN_PREFIX]) -> Result<usize, Error> {
    let len = usize::from(u16::from_be_bytes(prefix));
    if len == 0 || len > MAX_RECORD_SIZE {
        return Err(Error::MalformedRecord);
    }
    Ok(len)
}

/// Split framed tag memory into its content.
pub fn unframe(memory: &[u8]) -> Result<&[u8], Error> {
    if memory.len() < TAG_LEN_PREFIX {
        return Err(Error::MalformedRecord);
    }
    let len = content_len([memory[0], memory[1]])?;
    memory
        .get(TAG_LEN_PREFIX..TAG_LEN_PREFIX + len)
        .ok_or(Error::MalformedRecord)
}
