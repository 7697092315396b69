// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    crate::{cipher::SharedKey, homomorphic::HomomorphicEngine, signature::IssuerKey, Error},
    consts::{
        BASELINE_SCREEN_BANNER, READER_ID_SIZE, STEPAUTH_SCREEN_BANNER, TRACKER_SCREEN_BANNER,
    },
    heapless::String,
    p256::Scalar,
    serde::{Deserialize, Serialize},
};

/// Longest label a reader can be provisioned with.
pub const LABEL_LEN: usize = 32;

/// Who this reader is. Fixed at provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderIdentity {
    id: u32,
    label: String<LABEL_LEN>,
}

impl ReaderIdentity {
    pub fn new(id: u32, label: &str) -> Result<Self, Error> {
        let mut owned = String::new();
        owned.push_str(label).map_err(|()| Error::CapacityExceeded)?;
        Ok(Self { id, label: owned })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The id as it appears on the wire.
    pub fn id_bytes(&self) -> [u8; READER_ID_SIZE] {
        self.id.to_be_bytes()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Scheme selector, as provisioned and as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum SchemeKind {
    StepAuth,
    Baseline,
    Tracker,
}

impl SchemeKind {
    pub fn screen_banner(self) -> &'static str {
        match self {
            Self::StepAuth => STEPAUTH_SCREEN_BANNER,
            Self::Baseline => BASELINE_SCREEN_BANNER,
            Self::Tracker => TRACKER_SCREEN_BANNER,
        }
    }
}

impl core::fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::StepAuth => write!(f, "stepauth"),
            Self::Baseline => write!(f, "baseline"),
            Self::Tracker => write!(f, "tracker"),
        }
    }
}

/// How a Tracker reader transforms the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerUpdate {
    /// Advance the path polynomial: `poly' = x0·poly + coefficient·hash`.
    Path { x0: Scalar, coefficient: Scalar },
    /// Add `delta` to the encrypted value in the polynomial slot.
    Counter { delta: Scalar },
}

/// Provisioned scheme together with its key material.
#[derive(Debug, Clone)]
pub enum Scheme {
    StepAuth {
        issuer_key: IssuerKey,
        shared_key: SharedKey,
    },
    Baseline {
        shared_key: SharedKey,
    },
    Tracker {
        engine: HomomorphicEngine,
        update: TrackerUpdate,
    },
}

impl Scheme {
    pub fn kind(&self) -> SchemeKind {
        match self {
            Self::StepAuth { .. } => SchemeKind::StepAuth,
            Self::Baseline { .. } => SchemeKind::Baseline,
            Self::Tracker { .. } => SchemeKind::Tracker,
        }
    }
}
