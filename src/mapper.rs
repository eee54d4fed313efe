// Copyright (c) 2025 Refvec Contributors
// Licensed under the Refvec License. See LICENSE file for details.

//! Bidirectional mapping between caller references and internal ids.
//!
//! Similarity engines only understand integer ids, while callers address
//! documents with arbitrary strings. [`ReferenceIdMapper`] assigns every
//! reference a stable, non-zero 63-bit [`InternalId`] and remembers the
//! pairing in both directions.
//!
//! # Id derivation
//!
//! A candidate id is the reference's UTF-8 bytes read as an unsigned
//! little-endian integer, masked to 63 bits. Only the first eight bytes can
//! contribute, so references sharing an eight-byte prefix collide. Collisions
//! are resolved by probing upward (mod 2^63, skipping zero) until a slot
//! that is free or already owned by the same reference is found.
//!
//! ```rust
//! use refvec::mapper::ReferenceIdMapper;
//!
//! let mut mapper = ReferenceIdMapper::new();
//! let a = mapper.id_for("announcement-1");
//! let b = mapper.id_for("announcement-2");
//!
//! // Same 8-byte prefix, still distinct ids
//! assert_ne!(a, b);
//! assert_eq!(mapper.ref_for(a), Some("announcement-1"));
//! assert_eq!(mapper.ref_for(b), Some("announcement-2"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RefvecError, Result};

/// Mask keeping the low 63 bits. Bit 63 stays clear so ids survive signed
/// 64-bit serializers unchanged.
pub const ID_MASK: u64 = (1 << 63) - 1;

/// Engine-side identifier of a stored vector.
///
/// Always in `1..=ID_MASK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalId(u64);

impl InternalId {
    /// Wraps a raw id, rejecting zero and values with bit 63 set.
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 || raw > ID_MASK {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Returns the raw integer value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Next probe slot, wrapping inside the 63-bit space and skipping zero.
    fn next(self) -> Self {
        match (self.0 + 1) & ID_MASK {
            0 => Self(1),
            v => Self(v),
        }
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Forward and reverse reference/id tables.
#[derive(Debug, Default, Clone)]
pub struct ReferenceIdMapper {
    ref_to_id: HashMap<String, InternalId>,
    id_to_ref: HashMap<InternalId, String>,
}

impl ReferenceIdMapper {
    /// Creates an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the candidate id for `reference` without consulting the table.
    pub fn derive_id(reference: &str) -> InternalId {
        let bytes = reference.as_bytes();
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);

        let raw = u64::from_le_bytes(buf) & ID_MASK;
        InternalId(if raw == 0 { 1 } else { raw })
    }

    /// Returns the id assigned to `reference`, assigning one if needed.
    ///
    /// Never fails: the probe loop ends as soon as a free slot is found, and
    /// the 2^63 id space is never exhausted in practice.
    pub fn id_for(&mut self, reference: &str) -> InternalId {
        if let Some(&id) = self.ref_to_id.get(reference) {
            return id;
        }

        let mut candidate = Self::derive_id(reference);
        while let Some(owner) = self.id_to_ref.get(&candidate) {
            if owner == reference {
                break;
            }
            candidate = candidate.next();
        }

        self.ref_to_id.insert(reference.to_string(), candidate);
        self.id_to_ref.insert(candidate, reference.to_string());
        candidate
    }

    /// Looks up the id of a known reference.
    pub fn get(&self, reference: &str) -> Option<InternalId> {
        self.ref_to_id.get(reference).copied()
    }

    /// Looks up the reference owning `id`.
    pub fn ref_for(&self, id: InternalId) -> Option<&str> {
        self.id_to_ref.get(&id).map(String::as_str)
    }

    /// Returns `true` if `reference` currently has an id.
    pub fn contains(&self, reference: &str) -> bool {
        self.ref_to_id.contains_key(reference)
    }

    /// Drops the pairing for `reference`, returning the id it held.
    pub fn forget(&mut self, reference: &str) -> Option<InternalId> {
        let id = self.ref_to_id.remove(reference)?;
        self.id_to_ref.remove(&id);
        Some(id)
    }

    /// Drops the pairing for `id`, returning the reference it held.
    pub fn forget_id(&mut self, id: InternalId) -> Option<String> {
        let reference = self.id_to_ref.remove(&id)?;
        self.ref_to_id.remove(&reference);
        Some(reference)
    }

    /// Number of mapped references.
    pub fn len(&self) -> usize {
        self.ref_to_id.len()
    }

    /// Returns `true` if no reference is mapped.
    pub fn is_empty(&self) -> bool {
        self.ref_to_id.is_empty()
    }

    /// Removes every pairing.
    pub fn clear(&mut self) {
        self.ref_to_id.clear();
        self.id_to_ref.clear();
    }

    /// Iterates over `(reference, id)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, InternalId)> {
        self.ref_to_id.iter().map(|(r, &id)| (r.as_str(), id))
    }

    /// Attempts to invert [`derive_id`](Self::derive_id).
    ///
    /// Succeeds only for references of at most seven bytes, where the
    /// derivation is injective. That covers the numeric announcement ids the
    /// ingestion pipeline produces. An eight-byte id could belong to any
    /// reference sharing that prefix, so those are never recovered.
    pub fn recover_reference(id: InternalId) -> Option<String> {
        let bytes = id.get().to_le_bytes();
        let len = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        if len == 0 || len == bytes.len() {
            return None;
        }

        let candidate = std::str::from_utf8(&bytes[..len]).ok()?;
        if candidate.chars().any(char::is_control) || Self::derive_id(candidate) != id {
            return None;
        }
        Some(candidate.to_string())
    }

    /// Adopts a pairing read from storage or recovered from an id.
    ///
    /// Fails if either side is already bound to something else.
    pub(crate) fn insert_pair(&mut self, reference: String, id: InternalId) -> Result<()> {
        if let Some(existing) = self.ref_to_id.get(&reference) {
            if *existing != id {
                return Err(RefvecError::CorruptedMapping(format!(
                    "reference {:?} mapped to both {} and {}",
                    reference, existing, id
                )));
            }
            return Ok(());
        }
        if let Some(owner) = self.id_to_ref.get(&id) {
            return Err(RefvecError::CorruptedMapping(format!(
                "id {} mapped to both {:?} and {:?}",
                id, owner, reference
            )));
        }

        self.id_to_ref.insert(id, reference.clone());
        self.ref_to_id.insert(reference, id);
        Ok(())
    }

    /// Encodes the table as a flat JSON object, keys sorted.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let sorted: BTreeMap<&str, u64> = self
            .ref_to_id
            .iter()
            .map(|(r, id)| (r.as_str(), id.get()))
            .collect();
        Ok(serde_json::to_vec(&sorted)?)
    }

    /// Decodes a table written by [`to_json`](Self::to_json).
    ///
    /// Values may be JSON integers or strings holding an integer.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(bytes)
            .map_err(|e| RefvecError::CorruptedMapping(format!("invalid mapping JSON: {}", e)))?;

        let mut mapper = Self::new();
        for (reference, value) in raw {
            let parsed = match &value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            };
            let id = parsed.and_then(InternalId::new).ok_or_else(|| {
                RefvecError::CorruptedMapping(format!(
                    "invalid id {} for reference {:?}",
                    value, reference
                ))
            })?;
            mapper.insert_pair(reference, id)?;
        }
        Ok(mapper)
    }
}
