//! Deterministic hash-based bucketing.
//!
//! The algorithm is pinned so any implementation can reproduce assignments:
//!
//! 1. `hash64(s)` is the first 8 bytes, big-endian, of SHA-256 over the UTF-8
//!    bytes of `s`.
//! 2. The allocation hash is `hash64("{experiment_id}:{identity}")`, where the
//!    experiment id is the lowercase hyphenated UUID.
//! 3. The variant hash is `hash64("{experiment_id}:{identity}:variant")`.
//! 4. `unit(h) = (h >> 11) / 2^53`, which lies in `[0, 1)`.
//! 5. An identity is included when `unit(allocation) < traffic_allocation`,
//!    and then takes the first variant whose cumulative normalised weight is
//!    strictly greater than `unit(variant)`.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
  Error, Result,
  assignment::Allocation,
  experiment::{Experiment, Variant, normalize_weights},
};

const VARIANT_SALT: &str = "variant";

/// SHA-256 truncated to its leading 64 bits.
pub fn hash64(input: &str) -> u64 {
  let digest = Sha256::digest(input.as_bytes());
  let mut head = [0u8; 8];
  head.copy_from_slice(&digest[..8]);
  u64::from_be_bytes(head)
}

pub fn allocation_hash(experiment_id: Uuid, identity: &str) -> u64 {
  hash64(&format!("{}:{identity}", experiment_id.hyphenated()))
}

pub fn variant_hash(experiment_id: Uuid, identity: &str) -> u64 {
  hash64(&format!("{}:{identity}:{VARIANT_SALT}", experiment_id.hyphenated()))
}

/// Map a hash onto `[0, 1)` using its top 53 bits, which an `f64` represents
/// exactly.
pub fn unit_interval(hash: u64) -> f64 { (hash >> 11) as f64 / (1u64 << 53) as f64 }

/// Pick the variant whose cumulative weight range contains `u`.
///
/// Returns `None` only for an empty list. Rounding at the top of the range
/// falls to the last variant.
pub fn pick_variant(variants: &[Variant], u: f64) -> Option<&Variant> {
  let weights = normalize_weights(variants);
  let mut upper = 0.0;
  for (variant, weight) in variants.iter().zip(weights) {
    upper += weight;
    if u < upper {
      return Some(variant);
    }
  }
  variants.last()
}

/// The computed (not yet persisted) bucketing decision for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
  pub identity_hash: u64,
  pub allocation:    Allocation,
}

/// Bucket `identity` into `experiment`. Pure and deterministic.
pub fn bucket(experiment: &Experiment, identity: &str) -> Result<Bucket> {
  let identity_hash = allocation_hash(experiment.id, identity);
  if unit_interval(identity_hash) >= experiment.traffic_allocation {
    return Ok(Bucket { identity_hash, allocation: Allocation::Excluded });
  }

  let u = unit_interval(variant_hash(experiment.id, identity));
  let variant = pick_variant(&experiment.variants, u).ok_or_else(|| {
    Error::validation(format!("experiment {} has no variants", experiment.id))
  })?;

  Ok(Bucket {
    identity_hash,
    allocation: Allocation::Variant(variant.name.clone()),
  })
}

/// Fixed-width lowercase hex form of a hash, as stored and serialised.
pub fn format_hash(hash: u64) -> String { hex::encode(hash.to_be_bytes()) }

pub fn parse_hash(s: &str) -> Result<u64, hex::FromHexError> {
  let mut bytes = [0u8; 8];
  hex::decode_to_slice(s, &mut bytes)?;
  Ok(u64::from_be_bytes(bytes))
}

/// Serde adapter for hashes: JSON numbers lose precision above 2^53.
pub mod hash_hex {
  use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

  pub fn serialize<S: Serializer>(hash: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&super::format_hash(*hash))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(d)?;
    super::parse_hash(&raw).map_err(D::Error::custom)
  }
}
