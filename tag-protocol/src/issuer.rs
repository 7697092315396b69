// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Issuer and manager side: writing fresh tags and checking where they went.
//!
//! This runs on the provisioning host, never on a reader, and is the only
//! place holding signing keys and El-Gamal secrets.

use {
    crate::{
        cipher,
        cycle::seal_baseline,
        homomorphic::{random_scalar, scalar_from_bytes, HomomorphicEngine, TrackerRecord},
        record::{self, RecordBuf, SignatureScheme, TagRecord, HEADER_SIZE},
        signature::{self, IssuerKey},
        Error, SharedKey,
    },
    alloc::{collections::BTreeMap, vec::Vec},
    consts::{
        ANY_READER, NONCE_SIZE, READER_ID_SIZE, SCALAR_SIZE, SHARED_KEY_SIZE, TAG_ID_SIZE,
    },
    hmac::{Hmac, Mac},
    p256::{
        ecdsa::{signature::Signer, Signature, SigningKey},
        elliptic_curve::sec1::ToEncodedPoint,
        NonZeroScalar, ProjectivePoint, PublicKey, Scalar,
    },
    rand_core::{CryptoRng, RngCore},
    sha2::Sha256,
};

/// Fresh random shared key for a reader.
pub fn generate_shared_key<R: RngCore + CryptoRng>(rng: &mut R) -> SharedKey {
    let mut bytes = [0; SHARED_KEY_SIZE];
    rng.fill_bytes(&mut bytes);
    SharedKey::new(bytes)
}

/// Builds StepAuth onion records.
pub struct StepAuthIssuer {
    signing_key: SigningKey,
    readers: BTreeMap<u32, SharedKey>,
}

impl StepAuthIssuer {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            readers: BTreeMap::new(),
        }
    }

    pub fn add_reader(&mut self, id: u32, key: SharedKey) {
        self.readers.insert(id, key);
    }

    pub fn issuer_key(&self) -> IssuerKey {
        IssuerKey::from(self.signing_key.verifying_key().clone())
    }

    /// Tag content that leads through `path` in order.
    ///
    /// Layers are built from the last hop backwards. The last layer is
    /// addressed from the last reader to itself and wraps the tag id.
    pub fn issue<R: RngCore + CryptoRng>(
        &self,
        tag_id: u32,
        path: &[u32],
        rng: &mut R,
    ) -> Result<RecordBuf, Error> {
        let Some(&last) = path.last() else {
            return Err(Error::InvalidPath);
        };

        let mut inner =
            RecordBuf::from_slice(&tag_id.to_be_bytes()).map_err(|()| Error::CapacityExceeded)?;
        let mut next = last;
        for &reader in path.iter().rev() {
            let key = self.readers.get(&reader).ok_or(Error::InvalidPath)?;
            let mut header = [0; HEADER_SIZE];
            header[..READER_ID_SIZE].copy_from_slice(&reader.to_be_bytes());
            header[READER_ID_SIZE..].copy_from_slice(&next.to_be_bytes());

            let mut plaintext = RecordBuf::new();
            plaintext
                .extend_from_slice(&header)
                .and_then(|()| plaintext.extend_from_slice(&inner))
                .map_err(|()| Error::CapacityExceeded)?;

            let mut nonce = [0; NONCE_SIZE];
            rng.fill_bytes(&mut nonce);
            let payload = cipher::encrypt(key, &nonce, &header, &plaintext)?;
            let message = record::signed_message(&header, &payload)?;
            let signature: Signature = self
                .signing_key
                .try_sign(&message)
                .map_err(|_| Error::InvalidKey)?;

            inner = TagRecord::new(
                reader,
                next,
                SignatureScheme::EcdsaP256,
                &signature.to_bytes(),
                &payload,
            )?
            .encode()?;
            next = reader;
        }
        Ok(inner)
    }

    /// Peel every remaining layer with the readers' keys.
    pub fn remaining_path(&self, content: &[u8]) -> Result<StepAuthReadout, Error> {
        let issuer_key = self.issuer_key();
        let mut remaining = Vec::new();
        let mut layer = RecordBuf::from_slice(content).map_err(|()| Error::MalformedRecord)?;
        while layer.len() != TAG_ID_SIZE {
            let record = TagRecord::decode(&layer, SignatureScheme::EcdsaP256)?;
            if !issuer_key
                .verify(&record.signed_message()?, record.signature())
                .is_valid()
            {
                return Err(Error::SignatureInvalid);
            }
            let key = self
                .readers
                .get(&record.reader_id())
                .ok_or(Error::InvalidPath)?;
            let plaintext = cipher::decrypt(key, &record.header(), record.payload())?;
            if plaintext.len() <= HEADER_SIZE {
                return Err(Error::MalformedRecord);
            }
            remaining.push(record.reader_id());
            layer = RecordBuf::from_slice(&plaintext[HEADER_SIZE..])
                .map_err(|()| Error::MalformedRecord)?;
        }
        Ok(StepAuthReadout {
            tag_id: u32::from_be_bytes([layer[0], layer[1], layer[2], layer[3]]),
            remaining,
        })
    }
}

/// Readout of a StepAuth tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepAuthReadout {
    pub tag_id: u32,
    /// Readers still to visit, in order. Empty once the path is complete.
    pub remaining: Vec<u32>,
}

/// Readout of a Baseline tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselinePath {
    pub tag_id: u32,
    /// Readers in the order they updated the tag.
    pub visited: Vec<u32>,
}

pub struct BaselineIssuer {
    shared_key: SharedKey,
}

impl BaselineIssuer {
    pub fn new(shared_key: SharedKey) -> Self {
        Self { shared_key }
    }

    /// Fresh tag with an empty log. `first_reader` restricts the first
    /// update to one reader; without it any reader may start.
    pub fn issue<R: RngCore + CryptoRng>(
        &self,
        tag_id: u32,
        first_reader: Option<u32>,
        rng: &mut R,
    ) -> Result<RecordBuf, Error> {
        let reader = first_reader.unwrap_or(ANY_READER);
        let mut plaintext = [0; HEADER_SIZE + TAG_ID_SIZE];
        plaintext[..READER_ID_SIZE].copy_from_slice(&reader.to_be_bytes());
        plaintext[READER_ID_SIZE..HEADER_SIZE].copy_from_slice(&ANY_READER.to_be_bytes());
        plaintext[HEADER_SIZE..].copy_from_slice(&tag_id.to_be_bytes());

        let mut nonce = [0; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);
        seal_baseline(&self.shared_key, &nonce, &plaintext)
    }

    /// Authenticate a tag and list the readers that updated it.
    pub fn read_path(&self, content: &[u8]) -> Result<BaselinePath, Error> {
        let record = TagRecord::decode(content, SignatureScheme::HmacSha256)?;
        let message = record.signed_message()?;
        if !signature::verify_mac(&self.shared_key, &message, record.signature()).is_valid() {
            return Err(Error::SignatureInvalid);
        }
        let plaintext = cipher::decrypt(&self.shared_key, &record.header(), record.payload())?;

        let log_start = HEADER_SIZE + TAG_ID_SIZE;
        if plaintext.len() < log_start || (plaintext.len() - log_start) % READER_ID_SIZE != 0 {
            return Err(Error::MalformedRecord);
        }
        let mut tag_id = [0; TAG_ID_SIZE];
        tag_id.copy_from_slice(&plaintext[HEADER_SIZE..log_start]);
        let visited = plaintext[log_start..]
            .chunks_exact(READER_ID_SIZE)
            .map(|id| u32::from_be_bytes([id[0], id[1], id[2], id[3]]))
            .collect();
        Ok(BaselinePath {
            tag_id: u32::from_be_bytes(tag_id),
            visited,
        })
    }
}

/// Outcome of checking a Tracker tag at the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerVerdict {
    /// The tag went through this registered path.
    ValidPath(Vec<u32>),
    /// The tag is genuine but its path is not registered.
    UnknownPath,
    /// The id hash does not match the id: the tag was not issued by us.
    Forged,
}

/// Decrypted Tracker tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerReadout {
    pub id: ProjectivePoint,
    pub hash: ProjectivePoint,
    pub poly: ProjectivePoint,
}

/// Holder of the El-Gamal secret: issues Tracker tags and checks their
/// paths.
pub struct TrackerAuthority {
    secret: NonZeroScalar,
    engine: HomomorphicEngine,
    hash_key: SharedKey,
    x0: Scalar,
    a0: Scalar,
    coefficients: BTreeMap<u32, Scalar>,
    valid_paths: Vec<(Vec<u32>, Scalar)>,
}

impl TrackerAuthority {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = NonZeroScalar::random(&mut *rng);
        let hash_key = generate_shared_key(rng);
        let x0 = random_scalar(rng);
        let a0 = random_scalar(rng);
        Self::with_secret(secret, hash_key, x0, a0)
    }

    pub fn from_parts(
        secret: &[u8; SCALAR_SIZE],
        hash_key: SharedKey,
        x0: &[u8; SCALAR_SIZE],
        a0: &[u8; SCALAR_SIZE],
    ) -> Result<Self, Error> {
        let secret = NonZeroScalar::try_from(secret.as_slice()).map_err(|_| Error::InvalidKey)?;
        Ok(Self::with_secret(
            secret,
            hash_key,
            scalar_from_bytes(x0),
            scalar_from_bytes(a0),
        ))
    }

    fn with_secret(secret: NonZeroScalar, hash_key: SharedKey, x0: Scalar, a0: Scalar) -> Self {
        let public_key = PublicKey::from_secret_scalar(&secret);
        Self {
            secret,
            engine: HomomorphicEngine::new(&public_key),
            hash_key,
            x0,
            a0,
            coefficients: BTreeMap::new(),
            valid_paths: Vec::new(),
        }
    }

    pub fn engine(&self) -> &HomomorphicEngine {
        &self.engine
    }

    pub fn secret_bytes(&self) -> [u8; SCALAR_SIZE] {
        self.secret.to_bytes().into()
    }

    pub fn hash_key(&self) -> &SharedKey {
        &self.hash_key
    }

    pub fn x0(&self) -> Scalar {
        self.x0
    }

    pub fn a0(&self) -> Scalar {
        self.a0
    }

    pub fn set_coefficient(&mut self, reader: u32, coefficient: Scalar) {
        self.coefficients.insert(reader, coefficient);
    }

    pub fn coefficient(&self, reader: u32) -> Option<Scalar> {
        self.coefficients.get(&reader).copied()
    }

    /// The value of the path polynomial after `path`, relative to the id
    /// hash: `a0·x0^n + Σ a_i·x0^(n-1-i)`.
    pub fn evaluate(&self, path: &[u32]) -> Result<Scalar, Error> {
        path.iter().try_fold(self.a0, |acc, reader| {
            let coefficient = self.coefficient(*reader).ok_or(Error::InvalidPath)?;
            Ok(acc * self.x0 + coefficient)
        })
    }

    /// Register a path the manager accepts. Returns its evaluation.
    pub fn add_valid_path(&mut self, path: &[u32]) -> Result<Scalar, Error> {
        if path.is_empty() {
            return Err(Error::InvalidPath);
        }
        let evaluation = self.evaluate(path)?;
        self.valid_paths.push((path.to_vec(), evaluation));
        Ok(evaluation)
    }

    pub fn valid_paths(&self) -> impl Iterator<Item = &[u32]> {
        self.valid_paths.iter().map(|(path, _)| path.as_slice())
    }

    /// Plaintext point of a tag id.
    pub fn id_point(tag_id: u32) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * Scalar::from(u64::from(tag_id))
    }

    /// `HMAC(k, id)` over the uncompressed id point, as a scalar.
    pub fn id_digest(&self, id: &ProjectivePoint) -> Scalar {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.hash_key.as_bytes())
            .expect("any key length");
        mac.update(id.to_affine().to_encoded_point(false).as_bytes());
        scalar_from_bytes(&mac.finalize().into_bytes().into())
    }

    /// Fresh tag for path tracking: `(E(ID), E(h·G), E(h·a0·G))`.
    pub fn issue<R: RngCore + CryptoRng>(
        &self,
        tag_id: u32,
        rng: &mut R,
    ) -> Result<TrackerRecord, Error> {
        let digest = self.id_digest(&Self::id_point(tag_id));
        self.seal(tag_id, &(digest * self.a0), rng)
    }

    /// Fresh tag whose polynomial slot counts updates, starting at `value`.
    pub fn issue_counter<R: RngCore + CryptoRng>(
        &self,
        tag_id: u32,
        value: u64,
        rng: &mut R,
    ) -> Result<TrackerRecord, Error> {
        self.seal(tag_id, &Scalar::from(value), rng)
    }

    fn seal<R: RngCore + CryptoRng>(
        &self,
        tag_id: u32,
        poly: &Scalar,
        rng: &mut R,
    ) -> Result<TrackerRecord, Error> {
        let id = Self::id_point(tag_id);
        let digest = self.id_digest(&id);
        Ok(TrackerRecord {
            id: self.engine.encrypt_point(id, &random_scalar(rng))?,
            hash: self.engine.encrypt_value(&digest, &random_scalar(rng))?,
            poly: self.engine.encrypt_value(poly, &random_scalar(rng))?,
        })
    }

    pub fn decrypt(&self, record: &TrackerRecord) -> TrackerReadout {
        TrackerReadout {
            id: record.id.decrypt(&self.secret),
            hash: record.hash.decrypt(&self.secret),
            poly: record.poly.decrypt(&self.secret),
        }
    }

    /// Small discrete log of the polynomial slot, for counter tags. `None`
    /// when the value exceeds `bound`.
    pub fn decrypt_counter(&self, record: &TrackerRecord, bound: u64) -> Option<u64> {
        let target = record.poly.decrypt(&self.secret);
        let mut point = ProjectivePoint::IDENTITY;
        for value in 0..=bound {
            if point == target {
                return Some(value);
            }
            point += ProjectivePoint::GENERATOR;
        }
        None
    }

    /// Recover the tag id by search, up to `bound`.
    pub fn find_tag_id(&self, record: &TrackerRecord, bound: u32) -> Option<u32> {
        let target = record.id.decrypt(&self.secret);
        let mut point = ProjectivePoint::IDENTITY;
        for tag_id in 0..=bound {
            if point == target {
                return Some(tag_id);
            }
            point += ProjectivePoint::GENERATOR;
        }
        None
    }

    /// Check the id hash, then match the polynomial against every
    /// registered path.
    pub fn verify(&self, record: &TrackerRecord) -> TrackerVerdict {
        let readout = self.decrypt(record);
        let digest = self.id_digest(&readout.id);
        if readout.hash != ProjectivePoint::GENERATOR * digest {
            return TrackerVerdict::Forged;
        }
        self.valid_paths
            .iter()
            .find(|(_, evaluation)| {
                ProjectivePoint::GENERATOR * (*evaluation * digest) == readout.poly
            })
            .map_or(TrackerVerdict::UnknownPath, |(path, _)| {
                TrackerVerdict::ValidPath(path.clone())
            })
    }
}
