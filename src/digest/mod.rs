use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;

/// Size in bytes of every digest the driver produces.
pub const DIGEST_LEN: usize = 32;

/// 256-bit content digest.
///
/// Digests identify module contents and module closures; equality is
/// byte-wise and the all-zero digest is reserved as "not computed".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// The reserved "not computed" digest.
    pub const ZERO: Digest = Digest([0u8; DIGEST_LEN]);

    /// Hash a byte slice.
    pub fn of_bytes(bytes: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Digest(hasher.finalize().into())
    }

    /// Hash a string's UTF-8 bytes.
    pub fn of_str(text: &str) -> Digest {
        Self::of_bytes(text.as_bytes())
    }

    /// Combine a content digest with dependency digests.
    ///
    /// Argument order is significant: `content` is fed first, then each
    /// dependency in the order given. Callers are expected to pass
    /// dependencies in a stable sorted order.
    pub fn combine(content: Digest, deps: &[Digest]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(content.0);
        for dep in deps {
            hasher.update(dep.0);
        }
        Digest(hasher.finalize().into())
    }

    /// Fold per-file digests into a module content hash.
    ///
    /// A single file hashes to itself; more files are left-folded with
    /// `combine(acc, next)`. The caller must pass hashes in path-sorted
    /// order.
    pub fn fold(hashes: &[Digest]) -> Digest {
        match hashes.split_first() {
            None => Digest::ZERO,
            Some((first, rest)) => {
                let mut acc = *first;
                for next in rest {
                    acc = Digest::combine(acc, &[*next]);
                }
                acc
            }
        }
    }

    /// Whether this digest has been computed (is not all-zero).
    pub fn is_nonzero(&self) -> bool {
        self.0.iter().any(|b| *b != 0)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Digest {
        Digest(bytes)
    }

    /// Lower-case hex rendering, used for disk-cache file names.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(DIGEST_LEN * 2);
        for b in &self.0 {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
