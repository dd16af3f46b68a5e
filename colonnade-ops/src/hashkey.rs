//! Shared key-tuple hash combiner for groupby's bucket partitioning and
//! join's build-side hash table. Both need "a hash of the key tuple" and
//! neither needs it to agree with `Value::hash64` bit-for-bit, only to be
//! deterministic and collision-aware (callers always re-check full key
//! equality on a hash match).

use colonnade_core::Value;

pub(crate) fn combined_hash<'a>(values: impl IntoIterator<Item = &'a Value>) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for v in values {
        h ^= v.hash64();
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}
