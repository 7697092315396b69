// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! El-Gamal over P-256, updated without decrypting.
//!
//! With the authority key `Y = x·G`, a point `M` is encrypted as
//! `(r·G, M + r·Y)`. Values are carried as `v·G`, so adding ciphertext
//! components adds the underlying values. Readers only ever hold `Y`.

use {
    crate::Error,
    consts::{POINT_SIZE, SCALAR_SIZE, TRACKER_RECORD_SIZE},
    p256::{
        elliptic_curve::{
            ops::Reduce,
            rand_core::{CryptoRng, RngCore},
            sec1::{FromEncodedPoint, ToEncodedPoint},
        },
        AffinePoint, EncodedPoint, FieldBytes, NonZeroScalar, ProjectivePoint, PublicKey, Scalar,
    },
};

/// Size of one encoded ciphertext.
pub const CIPHERTEXT_SIZE: usize = 2 * POINT_SIZE;

/// An El-Gamal ciphertext. Both components are valid, non-identity curve
/// points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciphertext {
    c1: AffinePoint,
    c2: AffinePoint,
}

impl Ciphertext {
    fn from_points(c1: ProjectivePoint, c2: ProjectivePoint) -> Result<Self, Error> {
        let (c1, c2) = (c1.to_affine(), c2.to_affine());
        if c1 == AffinePoint::IDENTITY || c2 == AffinePoint::IDENTITY {
            return Err(Error::InvalidCiphertext);
        }
        Ok(Self { c1, c2 })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != CIPHERTEXT_SIZE {
            return Err(Error::MalformedRecord);
        }
        let (c1, c2) = bytes.split_at(POINT_SIZE);
        Ok(Self {
            c1: decode_point(c1)?,
            c2: decode_point(c2)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; CIPHERTEXT_SIZE] {
        let mut bytes = [0; CIPHERTEXT_SIZE];
        bytes[..POINT_SIZE].copy_from_slice(&encode_point(&self.c1));
        bytes[POINT_SIZE..].copy_from_slice(&encode_point(&self.c2));
        bytes
    }

    pub fn c1(&self) -> ProjectivePoint {
        self.c1.into()
    }

    pub fn c2(&self) -> ProjectivePoint {
        self.c2.into()
    }

    /// Recover the plaintext point `c2 - x·c1`. Only the authority holds `x`.
    pub fn decrypt(&self, secret: &NonZeroScalar) -> ProjectivePoint {
        self.c2() - self.c1() * secret.as_ref()
    }
}

/// Homomorphic operations under one authority public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomomorphicEngine {
    public_key: ProjectivePoint,
}

impl HomomorphicEngine {
    pub fn new(public_key: &PublicKey) -> Self {
        Self {
            public_key: public_key.to_projective(),
        }
    }

    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let public_key = PublicKey::from_sec1_bytes(bytes).map_err(|_| Error::InvalidKey)?;
        Ok(Self::new(&public_key))
    }

    pub fn public_key(&self) -> ProjectivePoint {
        self.public_key
    }

    /// Encrypt the point `m` with randomness `r`.
    pub fn encrypt_point(&self, m: ProjectivePoint, r: &Scalar) -> Result<Ciphertext, Error> {
        Ciphertext::from_points(ProjectivePoint::GENERATOR * r, m + self.public_key * r)
    }

    /// Encrypt the value `v` as `v·G`.
    pub fn encrypt_value(&self, v: &Scalar, r: &Scalar) -> Result<Ciphertext, Error> {
        self.encrypt_point(ProjectivePoint::GENERATOR * v, r)
    }

    /// Ciphertext of `(v + delta)·G` from a ciphertext of `v·G`, re-randomized
    /// by `r`.
    pub fn add(&self, ct: &Ciphertext, delta: &Scalar, r: &Scalar) -> Result<Ciphertext, Error> {
        Ciphertext::from_points(
            ct.c1() + ProjectivePoint::GENERATOR * r,
            ct.c2() + ProjectivePoint::GENERATOR * delta + self.public_key * r,
        )
    }

    /// One path step: ciphertext of `x0·poly + a·hash`.
    ///
    /// The result shares randomness with its inputs; re-randomize it before it
    /// leaves the reader.
    pub fn step(
        &self,
        poly: &Ciphertext,
        hash: &Ciphertext,
        x0: &Scalar,
        a: &Scalar,
    ) -> Result<Ciphertext, Error> {
        Ciphertext::from_points(
            poly.c1() * x0 + hash.c1() * a,
            poly.c2() * x0 + hash.c2() * a,
        )
    }

    /// Same plaintext, fresh randomness.
    pub fn rerandomize(&self, ct: &Ciphertext, r: &Scalar) -> Result<Ciphertext, Error> {
        self.add(ct, &Scalar::ZERO, r)
    }
}

/// Tag content of the Tracker scheme: encrypted tag id, id hash and path
/// polynomial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerRecord {
    pub id: Ciphertext,
    pub hash: Ciphertext,
    pub poly: Ciphertext,
}

impl TrackerRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != TRACKER_RECORD_SIZE {
            return Err(Error::MalformedRecord);
        }
        let (id, rest) = bytes.split_at(CIPHERTEXT_SIZE);
        let (hash, poly) = rest.split_at(CIPHERTEXT_SIZE);
        Ok(Self {
            id: Ciphertext::from_bytes(id)?,
            hash: Ciphertext::from_bytes(hash)?,
            poly: Ciphertext::from_bytes(poly)?,
        })
    }

    pub fn encode(&self) -> [u8; TRACKER_RECORD_SIZE] {
        let mut bytes = [0; TRACKER_RECORD_SIZE];
        bytes[..CIPHERTEXT_SIZE].copy_from_slice(&self.id.to_bytes());
        bytes[CIPHERTEXT_SIZE..2 * CIPHERTEXT_SIZE].copy_from_slice(&self.hash.to_bytes());
        bytes[2 * CIPHERTEXT_SIZE..].copy_from_slice(&self.poly.to_bytes());
        bytes
    }
}

/// Interpret 32 big-endian bytes as a scalar, reduced modulo the group order.
pub fn scalar_from_bytes(bytes: &[u8; SCALAR_SIZE]) -> Scalar {
    <Scalar as Reduce<p256::U256>>::reduce_bytes(FieldBytes::from_slice(bytes))
}

pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; SCALAR_SIZE] {
    scalar.to_bytes().into()
}

/// Draw fresh El-Gamal randomness.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    *NonZeroScalar::random(rng).as_ref()
}

/// SEC1 compressed encoding of a non-identity point.
pub fn encode_point(point: &AffinePoint) -> [u8; POINT_SIZE] {
    let encoded = point.to_encoded_point(true);
    let mut bytes = [0; POINT_SIZE];
    // The identity encodes to a single byte and is never stored.
    if let Some(src) = encoded.as_bytes().get(..POINT_SIZE) {
        bytes.copy_from_slice(src);
    }
    bytes
}

/// Parse a SEC1 compressed point, rejecting the identity and anything off
/// the curve.
pub fn decode_point(bytes: &[u8]) -> Result<AffinePoint, Error> {
    if bytes.len() != POINT_SIZE {
        return Err(Error::MalformedRecord);
    }
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| Error::InvalidCiphertext)?;
    let point: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    match point {
        Some(point) if point != AffinePoint::IDENTITY => Ok(point),
        _ => Err(Error::InvalidCiphertext),
    }
}
