//! Per-entry integrity codes and password-derived keys.
//!
//! Passwords never reach the metadata store. At creation the client stores a
//! *master key* derived from the password and digest type; at open it derives
//! the key again from the caller's password and compares the two in constant
//! time. Entries are protected by a [`DigestManager`] computing one of:
//!
//! | Digest type | Code | Size |
//! |-------------|------|------|
//! | `DUMMY` | none | 0 bytes |
//! | `CRC32` | IEEE CRC-32 | 4 bytes |
//! | `CRC32C` | Castagnoli CRC-32C | 4 bytes |
//! | `MAC` | HMAC-SHA256 keyed by the password | 32 bytes |
//!
//! Every code covers the frame header (ledger id, entry id, last-add-confirmed,
//! length) followed by the payload, so a frame replayed under another id
//! fails verification.

use bytes::Bytes;
use crc::{CRC_32_ISCSI, Crc};
use hmac::{Hmac, Mac};
use ledgerkit_meta::{DigestType, EntryId, LedgerId};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{
    entry::{EntryFrame, header_bytes},
    error::{ClientError, ClientResult},
};

type HmacSha256 = Hmac<Sha256>;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASTER_KEY_DOMAIN: &[u8] = b"ledger";
const MAC_KEY_DOMAIN: &[u8] = b"mac";

/// Derives the master key stored in metadata and presented to bookies.
///
/// `SHA-256("ledger" ‖ digest-type name ‖ password)`. An empty password is
/// valid and yields a well-defined key.
#[must_use]
pub fn master_key(digest_type: DigestType, password: &[u8]) -> Bytes {
    let mut hasher = Sha256::new();
    hasher.update(MASTER_KEY_DOMAIN);
    hasher.update(digest_type.as_str().as_bytes());
    hasher.update(password);
    Bytes::copy_from_slice(&hasher.finalize())
}

/// Checks a caller's credentials against a stored master key in constant time.
#[must_use]
pub fn verify_master_key(stored: &[u8], digest_type: DigestType, password: &[u8]) -> bool {
    let derived = master_key(digest_type, password);
    bool::from(derived.as_ref().ct_eq(stored))
}

fn mac_key(password: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(MAC_KEY_DOMAIN);
    hasher.update(password);
    Zeroizing::new(hasher.finalize().into())
}

enum Algorithm {
    Dummy,
    Crc32,
    Crc32c,
    Mac(HmacSha256),
}

/// Computes and verifies entry digests for one ledger.
pub struct DigestManager {
    ledger_id: LedgerId,
    digest_type: DigestType,
    algorithm: Algorithm,
}

impl DigestManager {
    /// Creates the digest manager of `ledger_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unexpected`] if the MAC cannot be keyed.
    pub fn new(
        ledger_id: LedgerId,
        digest_type: DigestType,
        password: &[u8],
    ) -> ClientResult<Self> {
        let algorithm = match digest_type {
            DigestType::Dummy => Algorithm::Dummy,
            DigestType::Crc32 => Algorithm::Crc32,
            DigestType::Crc32c => Algorithm::Crc32c,
            DigestType::Mac => {
                let key = mac_key(password);
                let mac = <HmacSha256 as Mac>::new_from_slice(key.as_ref())
                    .map_err(|e| ClientError::unexpected_with_source("failed to key MAC", e))?;
                Algorithm::Mac(mac)
            },
        };
        Ok(Self { ledger_id, digest_type, algorithm })
    }

    /// The digest algorithm in use.
    #[must_use]
    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    /// Builds a signed frame for `payload`.
    #[must_use]
    pub fn frame(
        &self,
        entry_id: EntryId,
        last_add_confirmed: EntryId,
        length: u64,
        payload: Bytes,
    ) -> EntryFrame {
        let header = header_bytes(self.ledger_id, entry_id, last_add_confirmed, length);
        let digest = self.compute(&header, &payload);
        EntryFrame {
            ledger_id: self.ledger_id,
            entry_id,
            last_add_confirmed,
            length,
            digest,
            payload,
        }
    }

    /// Verifies that `frame` is entry `expected_entry` of this ledger and
    /// that its digest matches.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DigestMismatch`] on any discrepancy.
    pub fn verify(&self, expected_entry: EntryId, frame: &EntryFrame) -> ClientResult<()> {
        let mismatch =
            ClientError::DigestMismatch { ledger_id: self.ledger_id, entry_id: expected_entry };
        if frame.ledger_id != self.ledger_id || frame.entry_id != expected_entry {
            return Err(mismatch);
        }
        let header =
            header_bytes(frame.ledger_id, frame.entry_id, frame.last_add_confirmed, frame.length);
        let matches = match &self.algorithm {
            Algorithm::Mac(mac) => mac
                .clone()
                .chain_update(header)
                .chain_update(&frame.payload)
                .verify_slice(&frame.digest)
                .is_ok(),
            _ => bool::from(self.compute(&header, &frame.payload).as_ref().ct_eq(&frame.digest)),
        };
        if matches { Ok(()) } else { Err(mismatch) }
    }

    fn compute(&self, header: &[u8], payload: &[u8]) -> Bytes {
        match &self.algorithm {
            Algorithm::Dummy => Bytes::new(),
            Algorithm::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(header);
                hasher.update(payload);
                Bytes::copy_from_slice(&hasher.finalize().to_be_bytes())
            },
            Algorithm::Crc32c => {
                let mut digest = CASTAGNOLI.digest();
                digest.update(header);
                digest.update(payload);
                Bytes::copy_from_slice(&digest.finalize().to_be_bytes())
            },
            Algorithm::Mac(mac) => {
                let code = mac.clone().chain_update(header).chain_update(payload).finalize();
                Bytes::copy_from_slice(&code.into_bytes())
            },
        }
    }
}

impl std::fmt::Debug for DigestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestManager")
            .field("ledger_id", &self.ledger_id)
            .field("digest_type", &self.digest_type)
            .finish_non_exhaustive()
    }
}
