//! The fixed-width 16-byte identity hashes used for job and model
//! deduplication (`jobHash`, `engParamsHash`, `engParticleHash`).
//!
//! Shorter inputs are right-padded with NUL up to the full width; inputs
//! longer than the width are a programming error, matching
//! `ClientJobsDAO._normalizeHash` in the system this store coordinates for.

use errors::*;
use model::HASH_MAX_LEN;

use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Binary;
use rand::RngCore;

use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
#[sql_type = "Binary"]
pub struct Hash16(pub [u8; HASH_MAX_LEN]);

impl Hash16 {
    /// Builds a hash from arbitrary bytes, NUL-padding on the right up to
    /// `HASH_MAX_LEN`. Returns `InvalidHashLength` if `bytes` is already
    /// longer than that.
    pub fn normalize(bytes: &[u8]) -> Result<Hash16> {
        if bytes.len() > HASH_MAX_LEN {
            return Err(ErrorKind::InvalidHashLength(bytes.len()).into());
        }

        let mut buf = [0u8; HASH_MAX_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Hash16(buf))
    }

    /// Generates a fresh random hash. Used by `Store::job_insert`, where
    /// collision probability is negligible and the hash only exists to
    /// satisfy the `(client, jobHash)` uniqueness constraint.
    pub fn random() -> Hash16 {
        let mut buf = [0u8; HASH_MAX_LEN];
        rand::thread_rng().fill_bytes(&mut buf);
        Hash16(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl<DB> ToSql<Binary, DB> for Hash16
where
    DB: Backend,
    [u8]: ToSql<Binary, DB>,
{
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, DB>) -> serialize::Result {
        self.0[..].to_sql(out)
    }
}

impl<DB> FromSql<Binary, DB> for Hash16
where
    DB: Backend,
    Vec<u8>: FromSql<Binary, DB>,
{
    fn from_sql(bytes: DB::RawValue<'_>) -> deserialize::Result<Self> {
        let raw = Vec::<u8>::from_sql(bytes)?;
        Hash16::normalize(&raw).map_err(|e| format!("{}", e).into())
    }
}

#[cfg(test)]
mod tests {
    use hash::*;

    #[test]
    fn test_hash16_normalize_pads_short() {
        let h = Hash16::normalize(b"abc").unwrap();
        assert_eq!(&h.0[..3], b"abc");
        assert!(h.0[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_hash16_normalize_exact() {
        let input = [7u8; HASH_MAX_LEN];
        let h = Hash16::normalize(&input).unwrap();
        assert_eq!(h.0, input);
    }

    #[test]
    fn test_hash16_normalize_rejects_overlong() {
        let input = [1u8; HASH_MAX_LEN + 1];
        assert!(Hash16::normalize(&input).is_err());
    }

    #[test]
    fn test_hash16_random_full_width() {
        let h1 = Hash16::random();
        let h2 = Hash16::random();
        assert_ne!(h1.0, h2.0);
    }
}
