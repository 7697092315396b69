// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! One scan cycle, from inventory to write-back.
//!
//! ```text
//! Idle -> TagDetected -> Read -> Verifying -> Authorizing -> Rewriting -> Written
//!                             \-> HomTransform ------------/            \-> Rejected
//! ```
//!
//! Every failure ends the cycle as `Rejected` with the matching
//! [`CycleOutcome`]. Nothing is retried within a cycle and nothing is written
//! unless every check passed.

use {
    crate::{
        cipher,
        driver::TagDriver,
        homomorphic::{random_scalar, HomomorphicEngine, TrackerRecord},
        record::{self, FrameBuf, RecordBuf, SignatureScheme, TagRecord, HEADER_SIZE},
        report::{CycleOutcome, CycleReport, Reporter},
        scheme::{ReaderIdentity, Scheme, TrackerUpdate},
        signature::{self, IssuerKey},
        Error, SharedKey,
    },
    consts::{ANY_READER, NONCE_SIZE, READER_ID_SIZE, TAG_ID_SIZE, TAG_LEN_PREFIX},
    heapless::Vec,
    rand_core::{CryptoRng, RngCore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleState {
    Idle,
    TagDetected,
    Read,
    Verifying,
    HomTransform,
    Authorizing,
    Rewriting,
    Written,
    Rejected,
}

/// Longest possible path through the states of one cycle.
pub const MAX_TRACE: usize = 8;

/// States visited during a cycle, in order.
pub type Trace = Vec<CycleState, MAX_TRACE>;

/// What a reader owns besides its provisioning: the reader hardware, a
/// random source and the report sinks.
pub struct Context<'a, D, R> {
    driver: D,
    rng: R,
    reporter: Reporter<'a>,
}

impl<'a, D: TagDriver, R: RngCore + CryptoRng> Context<'a, D, R> {
    /// Bring up the reader hardware. This is the only fatal failure.
    pub fn new(mut driver: D, rng: R, reporter: Reporter<'a>) -> Result<Self, Error> {
        if driver.begin().is_err() {
            error!("reader hardware failed to initialize");
            return Err(Error::HardwareInitFailure);
        }
        Ok(Self {
            driver,
            rng,
            reporter,
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_parts(self) -> (D, R, Reporter<'a>) {
        (self.driver, self.rng, self.reporter)
    }
}

/// The reader's scheme state machine.
#[derive(Debug)]
pub struct TagUpdater {
    identity: ReaderIdentity,
    scheme: Scheme,
    cycles: u32,
    trace: Trace,
}

/// Content to write back, produced by a scheme step.
struct Rewrite {
    content: RecordBuf,
    path_complete: bool,
}

impl TagUpdater {
    pub fn new(identity: ReaderIdentity, scheme: Scheme) -> Self {
        Self {
            identity,
            scheme,
            cycles: 0,
            trace: Trace::new(),
        }
    }

    pub fn identity(&self) -> &ReaderIdentity {
        &self.identity
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// States visited by the last cycle.
    pub fn trace(&self) -> &[CycleState] {
        &self.trace
    }

    /// Run one cycle and hand its report to every sink.
    pub fn scan<D, R>(&mut self, ctx: &mut Context<'_, D, R>) -> CycleReport
    where
        D: TagDriver,
        R: RngCore + CryptoRng,
    {
        self.cycles = self.cycles.wrapping_add(1);
        self.trace.clear();
        enter(&mut self.trace, CycleState::Idle);

        let mut report = CycleReport {
            cycle: self.cycles,
            reader_id: self.identity.id(),
            scheme: self.scheme.kind(),
            outcome: CycleOutcome::NoTag,
            epc: None,
            rssi: None,
            written_len: 0,
            path_complete: false,
        };

        match run(&self.identity, &self.scheme, &mut self.trace, ctx, &mut report) {
            Ok(()) => {
                report.outcome = CycleOutcome::UpdateWritten;
                enter(&mut self.trace, CycleState::Written);
                info!(
                    "cycle {}: {}, {} bytes written",
                    report.cycle,
                    report.outcome,
                    report.written_len
                );
            }
            Err(CycleOutcome::NoTag) => debug!("cycle {}: no tag", report.cycle),
            Err(outcome) => {
                report.outcome = outcome;
                enter(&mut self.trace, CycleState::Rejected);
                warn!("cycle {}: {}", report.cycle, outcome);
            }
        }

        ctx.reporter.emit(&report);
        report
    }
}

fn enter(trace: &mut Trace, state: CycleState) {
    // The trace is sized for the longest path.
    let _ = trace.push(state);
}

fn run<D, R>(
    identity: &ReaderIdentity,
    scheme: &Scheme,
    trace: &mut Trace,
    ctx: &mut Context<'_, D, R>,
    report: &mut CycleReport,
) -> Result<(), CycleOutcome>
where
    D: TagDriver,
    R: RngCore + CryptoRng,
{
    let tag = match ctx.driver.inventory() {
        Ok(Some(tag)) => tag,
        Ok(None) => return Err(CycleOutcome::NoTag),
        Err(_) => return Err(CycleOutcome::ReadError),
    };
    report.epc = Some(tag.epc);
    report.rssi = Some(tag.rssi);
    enter(trace, CycleState::TagDetected);

    let content = read_content(&mut ctx.driver)?;
    enter(trace, CycleState::Read);

    let rewrite = match scheme {
        Scheme::StepAuth {
            issuer_key,
            shared_key,
        } => {
            enter(trace, CycleState::Verifying);
            step_auth(identity, issuer_key, shared_key, &content, trace)?
        }
        Scheme::Baseline { shared_key } => {
            enter(trace, CycleState::Verifying);
            baseline(identity, shared_key, &content, trace, &mut ctx.rng)?
        }
        Scheme::Tracker { engine, update } => {
            enter(trace, CycleState::HomTransform);
            let rewrite = tracker(engine, update, &content, &mut ctx.rng)?;
            enter(trace, CycleState::Rewriting);
            rewrite
        }
    };

    write_content(&mut ctx.driver, &rewrite.content)?;
    report.written_len = rewrite.content.len() as u16;
    report.path_complete = rewrite.path_complete;
    Ok(())
}

/// Peel this reader's layer off a StepAuth onion record.
fn step_auth(
    identity: &ReaderIdentity,
    issuer_key: &IssuerKey,
    shared_key: &SharedKey,
    content: &[u8],
    trace: &mut Trace,
) -> Result<Rewrite, Error> {
    let record = TagRecord::decode(content, SignatureScheme::EcdsaP256)?;
    let message = record.signed_message()?;
    if !issuer_key.verify(&message, record.signature()).is_valid() {
        return Err(Error::SignatureInvalid);
    }
    if record.reader_id() != identity.id() {
        return Err(Error::IdentityMismatch);
    }

    let plaintext = cipher::decrypt(shared_key, &record.header(), record.payload())?;
    enter(trace, CycleState::Authorizing);
    if plaintext.len() <= HEADER_SIZE {
        return Err(Error::MalformedRecord);
    }
    let (reader_id, next_reader_id) = header_ids(&plaintext);
    if reader_id != identity.id() {
        return Err(Error::IdentityMismatch);
    }

    let content =
        RecordBuf::from_slice(&plaintext[HEADER_SIZE..]).map_err(|()| Error::MalformedRecord)?;
    enter(trace, CycleState::Rewriting);
    Ok(Rewrite {
        content,
        path_complete: reader_id == next_reader_id,
    })
}

/// Append this reader to the Baseline visited log.
fn baseline<R: RngCore + CryptoRng>(
    identity: &ReaderIdentity,
    shared_key: &SharedKey,
    content: &[u8],
    trace: &mut Trace,
    rng: &mut R,
) -> Result<Rewrite, Error> {
    let record = TagRecord::decode(content, SignatureScheme::HmacSha256)?;
    let message = record.signed_message()?;
    if !signature::verify_mac(shared_key, &message, record.signature()).is_valid() {
        return Err(Error::SignatureInvalid);
    }
    let addressed_to = record.reader_id();
    if addressed_to != ANY_READER && addressed_to != identity.id() {
        return Err(Error::IdentityMismatch);
    }

    let plaintext = cipher::decrypt(shared_key, &record.header(), record.payload())?;
    enter(trace, CycleState::Authorizing);
    let log_start = HEADER_SIZE + TAG_ID_SIZE;
    if plaintext.len() < log_start || (plaintext.len() - log_start) % READER_ID_SIZE != 0 {
        return Err(Error::MalformedRecord);
    }
    let (reader_id, _) = header_ids(&plaintext);
    if reader_id != addressed_to {
        return Err(Error::IdentityMismatch);
    }
    let last_visited = plaintext[log_start..]
        .rchunks_exact(READER_ID_SIZE)
        .next()
        .map(|id| u32::from_be_bytes([id[0], id[1], id[2], id[3]]));
    if last_visited == Some(identity.id()) {
        return Err(Error::IdentityMismatch);
    }

    enter(trace, CycleState::Rewriting);
    let new_reader_id = record.next_reader_id();
    let mut updated = RecordBuf::new();
    updated
        .extend_from_slice(&new_reader_id.to_be_bytes())
        .and_then(|()| updated.extend_from_slice(&ANY_READER.to_be_bytes()))
        .and_then(|()| updated.extend_from_slice(&plaintext[HEADER_SIZE..]))
        .and_then(|()| updated.extend_from_slice(&identity.id_bytes()))
        .map_err(|()| Error::CapacityExceeded)?;

    let mut nonce = [0; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    Ok(Rewrite {
        content: seal_baseline(shared_key, &nonce, &updated)?,
        path_complete: false,
    })
}

/// Transform the Tracker ciphertexts in place.
fn tracker<R: RngCore + CryptoRng>(
    engine: &HomomorphicEngine,
    update: &TrackerUpdate,
    content: &[u8],
    rng: &mut R,
) -> Result<Rewrite, Error> {
    let record = TrackerRecord::decode(content)?;
    let updated = match update {
        TrackerUpdate::Path { x0, coefficient } => {
            let poly = engine.step(&record.poly, &record.hash, x0, coefficient)?;
            TrackerRecord {
                id: engine.rerandomize(&record.id, &random_scalar(rng))?,
                hash: engine.rerandomize(&record.hash, &random_scalar(rng))?,
                poly: engine.rerandomize(&poly, &random_scalar(rng))?,
            }
        }
        TrackerUpdate::Counter { delta } => TrackerRecord {
            poly: engine.add(&record.poly, delta, &random_scalar(rng))?,
            ..record
        },
    };

    Ok(Rewrite {
        content: RecordBuf::from_slice(&updated.encode()).map_err(|()| Error::CapacityExceeded)?,
        path_complete: false,
    })
}

/// Encrypt and MAC a Baseline plaintext. The record header repeats the
/// plaintext's two leading ids.
pub fn seal_baseline(
    shared_key: &SharedKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<RecordBuf, Error> {
    if plaintext.len() < HEADER_SIZE {
        return Err(Error::MalformedRecord);
    }
    let mut header = [0; HEADER_SIZE];
    header.copy_from_slice(&plaintext[..HEADER_SIZE]);
    let (reader_id, next_reader_id) = header_ids(&header);

    let payload = cipher::encrypt(shared_key, nonce, &header, plaintext)?;
    let mac = signature::mac(shared_key, &record::signed_message(&header, &payload)?);
    TagRecord::new(
        reader_id,
        next_reader_id,
        SignatureScheme::HmacSha256,
        &mac,
        &payload,
    )?
    .encode()
}

fn header_ids(plaintext: &[u8]) -> (u32, u32) {
    let mut reader_id = [0; READER_ID_SIZE];
    let mut next_reader_id = [0; READER_ID_SIZE];
    reader_id.copy_from_slice(&plaintext[..READER_ID_SIZE]);
    next_reader_id.copy_from_slice(&plaintext[READER_ID_SIZE..HEADER_SIZE]);
    (
        u32::from_be_bytes(reader_id),
        u32::from_be_bytes(next_reader_id),
    )
}

fn read_content<D: TagDriver>(driver: &mut D) -> Result<RecordBuf, Error> {
    let mut prefix = [0; TAG_LEN_PREFIX];
    driver
        .read_block(0, &mut prefix)
        .map_err(|_| Error::ReadError)?;
    let len = record::content_len(prefix)?;

    let mut content = RecordBuf::new();
    content
        .resize(len, 0)
        .map_err(|()| Error::MalformedRecord)?;
    driver
        .read_block(TAG_LEN_PREFIX, &mut content)
        .map_err(|_| Error::ReadError)?;
    Ok(content)
}

/// Write the framed content and read it back; the write only counts when
/// the tag holds exactly what was sent.
fn write_content<D: TagDriver>(driver: &mut D, content: &[u8]) -> Result<(), Error> {
    let framed = record::frame(content).map_err(|_| Error::WriteError)?;
    driver
        .write_block(0, &framed)
        .map_err(|_| Error::WriteError)?;

    let mut readback = FrameBuf::new();
    readback
        .resize(framed.len(), 0)
        .map_err(|()| Error::WriteError)?;
    driver
        .read_block(0, &mut readback)
        .map_err(|_| Error::WriteError)?;
    if readback != framed {
        return Err(Error::WriteError);
    }
    Ok(())
}
