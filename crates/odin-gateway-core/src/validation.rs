//! Receipt and chain validation: identity recomputation, link checks and
//! signature verification.

use crate::error::ValidationError;
use crate::keys::KeyResolver;
use crate::receipt::{ChainAnchor, Receipt, Tombstone};

/// A chain entry as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredReceipt {
    Decoded(Receipt),
    /// A persisted record that no longer decodes as a receipt.
    Malformed { seq: Option<u64>, reason: String },
}

impl StoredReceipt {
    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            Self::Decoded(receipt) => Some(receipt),
            Self::Malformed { .. } => None,
        }
    }
}

impl From<Receipt> for StoredReceipt {
    fn from(receipt: Receipt) -> Self {
        Self::Decoded(receipt)
    }
}

/// Outcome of walking a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Valid { length: usize },
    /// `index` is the position in the supplied slice of the first bad receipt.
    Invalid { index: usize, fault: ValidationError },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Validate a single receipt in isolation.
///
/// This performs:
/// - Identity recomputation
/// - Signature verification against the key registered for its kid
pub fn verify_receipt(receipt: &Receipt, keys: &impl KeyResolver) -> Result<(), ValidationError> {
    let recomputed = receipt.compute_cid()?;
    if recomputed != receipt.receipt_cid {
        return Err(ValidationError::ReceiptCidMismatch {
            stored: receipt.receipt_cid,
            recomputed,
        });
    }

    if !receipt.verify_signature(keys)? {
        return Err(ValidationError::SignatureFailed);
    }

    Ok(())
}

/// Validate a chain of receipts for `trace_id`, in stored order.
///
/// The first receipt must attach to the tombstone anchor when a prefix has
/// been pruned, otherwise to the null sentinel at position 0. Every later
/// receipt must link to its predecessor's identity at the next position.
pub fn verify_receipts(
    trace_id: &str,
    receipts: &[Receipt],
    tombstone: Option<&Tombstone>,
    keys: &impl KeyResolver,
) -> ChainVerification {
    walk(trace_id, receipts.iter().map(Ok), tombstone, keys)
}

/// Validate a chain read back from storage.
///
/// Same checks as [`verify_receipts`]; a record that no longer decodes is
/// reported as [`ValidationError::MalformedRecord`] at its position.
pub fn verify_stored(
    trace_id: &str,
    entries: &[StoredReceipt],
    tombstone: Option<&Tombstone>,
    keys: &impl KeyResolver,
) -> ChainVerification {
    let decoded = entries.iter().map(|entry| match entry {
        StoredReceipt::Decoded(receipt) => Ok(receipt),
        StoredReceipt::Malformed { seq, reason } => Err(ValidationError::MalformedRecord {
            seq: *seq,
            reason: reason.clone(),
        }),
    });
    walk(trace_id, decoded, tombstone, keys)
}

fn walk<'a>(
    trace_id: &str,
    receipts: impl Iterator<Item = Result<&'a Receipt, ValidationError>>,
    tombstone: Option<&Tombstone>,
    keys: &impl KeyResolver,
) -> ChainVerification {
    let mut expected = tombstone.map_or(ChainAnchor::GENESIS, Tombstone::anchor);
    let mut length = 0;

    for (index, receipt) in receipts.enumerate() {
        let checked = receipt.and_then(|receipt| {
            check_link(trace_id, receipt, &expected)?;
            verify_receipt(receipt, keys)?;
            Ok(receipt)
        });
        match checked {
            Ok(receipt) => expected = receipt.next_anchor(),
            Err(fault) => return ChainVerification::Invalid { index, fault },
        }
        length += 1;
    }

    ChainVerification::Valid { length }
}

fn check_link(
    trace_id: &str,
    receipt: &Receipt,
    expected: &ChainAnchor,
) -> Result<(), ValidationError> {
    if receipt.trace_id != trace_id {
        return Err(ValidationError::TraceMismatch {
            expected: trace_id.to_owned(),
            got: receipt.trace_id.clone(),
        });
    }
    if receipt.seq != expected.next_seq {
        return Err(ValidationError::InvalidSequence {
            expected: expected.next_seq,
            got: receipt.seq,
        });
    }
    if receipt.prev_cid != expected.prev_cid {
        return Err(ValidationError::InvalidPrevCid {
            expected: expected.prev_cid,
            got: receipt.prev_cid,
        });
    }
    Ok(())
}
