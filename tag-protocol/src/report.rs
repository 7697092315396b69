// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cycle results and where they go.
//!
//! Every scan cycle ends in exactly one [`CycleReport`], handed to every sink
//! attached to the [`Reporter`]. A failing sink never affects the others.

use {
    crate::{queue::BytesQueue, scheme::SchemeKind, Error},
    consts::{EPC_SIZE, MAX_SINKS, SCREEN_HEIGHT_CHAR, SCREEN_WIDTH_CHAR},
    core::fmt::Write,
    heapless::{Deque, String, Vec},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    NoTag,
    ReadError,
    MalformedRecord,
    SignatureInvalid,
    DecryptFailed,
    InvalidCiphertext,
    IdentityMismatch,
    UpdateWritten,
    WriteError,
}

impl CycleOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::NoTag => "no tag",
            Self::ReadError => "read error",
            Self::MalformedRecord => "malformed record",
            Self::SignatureInvalid => "signature invalid",
            Self::DecryptFailed => "decrypt failed",
            Self::InvalidCiphertext => "invalid ciphertext",
            Self::IdentityMismatch => "identity mismatch",
            Self::UpdateWritten => "update written",
            Self::WriteError => "write error",
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::UpdateWritten
    }
}

impl From<Error> for CycleOutcome {
    fn from(error: Error) -> Self {
        match error {
            Error::MalformedRecord | Error::InvalidPath => Self::MalformedRecord,
            Error::SignatureInvalid => Self::SignatureInvalid,
            Error::DecryptFailed | Error::InvalidKey => Self::DecryptFailed,
            Error::InvalidCiphertext => Self::InvalidCiphertext,
            Error::IdentityMismatch => Self::IdentityMismatch,
            Error::ReadError | Error::HardwareInitFailure => Self::ReadError,
            Error::WriteError | Error::CapacityExceeded => Self::WriteError,
        }
    }
}

impl core::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    /// Running cycle number, starting at 1.
    pub cycle: u32,
    pub reader_id: u32,
    pub scheme: SchemeKind,
    pub outcome: CycleOutcome,
    /// EPC of the tag, once one was detected.
    pub epc: Option<[u8; EPC_SIZE]>,
    /// Signal strength of the detected tag, in dBm.
    pub rssi: Option<i16>,
    /// Content bytes written, zero unless the update was written.
    pub written_len: u16,
    /// StepAuth: the last reader of the issued path consumed the tag.
    pub path_complete: bool,
}

impl core::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "#{} reader {} {}: {}",
            self.cycle, self.reader_id, self.scheme, self.outcome
        )?;
        if let Some(epc) = self.epc {
            f.write_str(" epc ")?;
            for byte in epc {
                write!(f, "{byte:02x}")?;
            }
        }
        if let Some(rssi) = self.rssi {
            write!(f, " rssi {rssi}")?;
        }
        if self.outcome.is_success() {
            write!(f, " ({} bytes)", self.written_len)?;
        }
        if self.path_complete {
            f.write_str(" path complete")?;
        }
        Ok(())
    }
}

/// Destination for cycle reports.
pub trait Sink {
    fn emit(&mut self, report: &CycleReport);
}

/// Fans one report out to every attached sink.
#[derive(Default)]
pub struct Reporter<'a> {
    sinks: Vec<&'a mut dyn Sink, MAX_SINKS>,
}

impl<'a> Reporter<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn attach(&mut self, sink: &'a mut dyn Sink) -> Result<(), Error> {
        self.sinks.push(sink).map_err(|_| Error::CapacityExceeded)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn emit(&mut self, report: &CycleReport) {
        for sink in self.sinks.iter_mut() {
            sink.emit(report);
        }
    }
}

/// One text line per report on a serial console.
pub struct SerialSink<W: Write> {
    out: W,
    errors: u32,
}

impl<W: Write> SerialSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, errors: 0 }
    }

    /// Reports that could not be written out completely.
    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Sink for SerialSink<W> {
    fn emit(&mut self, report: &CycleReport) {
        if writeln!(self.out, "{report}").is_err() {
            self.errors += 1;
        }
    }
}

/// One row of the display.
pub type ScreenLine = String<SCREEN_WIDTH_CHAR>;

/// Text grid mirroring the OLED display. New lines scroll the oldest ones
/// out; the banner row stays on top.
pub struct ScreenSink {
    banner: ScreenLine,
    lines: Deque<ScreenLine, { SCREEN_HEIGHT_CHAR - 1 }>,
}

impl ScreenSink {
    pub fn new(scheme: SchemeKind) -> Self {
        let mut banner = ScreenLine::new();
        for c in scheme.screen_banner().chars().take(SCREEN_WIDTH_CHAR) {
            // Cannot fail, the banner is cut to the row width.
            let _ = banner.push(c);
        }
        Self {
            banner,
            lines: Deque::new(),
        }
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Rows below the banner, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|line| line.as_str())
    }

    fn push_line(&mut self, line: ScreenLine) {
        if self.lines.is_full() {
            self.lines.pop_front();
        }
        let _ = self.lines.push_back(line);
    }

    /// Print `text`, wrapped at the display width.
    pub fn print(&mut self, text: &str) {
        let mut line = ScreenLine::new();
        for c in text.chars() {
            if line.len() + c.len_utf8() > SCREEN_WIDTH_CHAR {
                self.push_line(core::mem::take(&mut line));
            }
            let _ = line.push(c);
        }
        if !line.is_empty() {
            self.push_line(line);
        }
    }
}

impl Sink for ScreenSink {
    fn emit(&mut self, report: &CycleReport) {
        let mut text = String::<160>::new();
        // A report longer than the buffer is shown truncated.
        let _ = write!(text, "{report}");
        self.print(&text);
    }
}

/// Encodes reports as COBS framed postcard messages into the telemetry
/// queue, drained by the publisher.
pub struct TelemetrySink<'q, const N: usize, const M: usize> {
    queue: &'q BytesQueue<N, M>,
}

impl<'q, const N: usize, const M: usize> TelemetrySink<'q, N, M> {
    pub fn new(queue: &'q BytesQueue<N, M>) -> Self {
        Self { queue }
    }
}

impl<const N: usize, const M: usize> Sink for TelemetrySink<'_, N, M> {
    fn emit(&mut self, report: &CycleReport) {
        let mut buf = [0; M];
        match postcard::to_slice_cobs(report, &mut buf) {
            Ok(frame) => {
                if !self.queue.push(frame) {
                    warn!("telemetry queue full, {} frames dropped", self.queue.dropped());
                }
            }
            Err(_) => {
                self.queue.count_drop();
                error!("telemetry frame does not fit in {} bytes", M);
            }
        }
    }
}
