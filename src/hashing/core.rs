use std::fmt;

use digest::Digest;
use sha2::Sha256;

/// Width of every digest in the ledger, in bytes.
pub const HASH_WIDTH: usize = 32;

/// A 32-byte immutable digest value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_WIDTH]);

/// The distinguished sentinel hash: 32 zero bytes. Stands in for the hash
/// of the abstract row 0 and for the input hash of a cell-less row.
pub const SENTINEL: Hash = Hash([0u8; HASH_WIDTH]);

impl Hash {
    pub const fn from_bytes(bytes: [u8; HASH_WIDTH]) -> Self {
        Hash(bytes)
    }

    /// Copies a hash out of a 32-byte slice. `None` if the length is off.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != HASH_WIDTH {
            return None;
        }
        let mut bytes = [0u8; HASH_WIDTH];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_WIDTH] {
        &self.0
    }

    pub fn is_sentinel(&self) -> bool {
        *self == SENTINEL
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex chars are plenty for diagnostics.
        write!(f, "Hash({}..)", &self.to_hex()[..8])
    }
}

/// Single-shot SHA-256 of one byte slice.
pub fn sha256(data: &[u8]) -> Hash {
    finish(Sha256::new().chain_update(data))
}

/// SHA-256 over the concatenation of the given parts, without materializing
/// the concatenation.
pub fn sha256_concat<'a, I>(parts: I) -> Hash
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    finish(hasher)
}

/// Converts a finalized sha2 state into a [`Hash`].
pub(crate) fn finish(hasher: Sha256) -> Hash {
    let digest = hasher.finalize();
    let mut bytes = [0u8; HASH_WIDTH];
    bytes.copy_from_slice(&digest);
    Hash(bytes)
}

/// Compile-time generated 2-byte hex pair lookup table.
/// Each byte maps directly to its 2-char hex representation.
const fn generate_hex_table() -> [[u8; 2]; 256] {
    let hex = b"0123456789abcdef";
    let mut table = [[0u8; 2]; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = [hex[i >> 4], hex[i & 0xf]];
        i += 1;
    }
    table
}

const HEX_TABLE: [[u8; 2]; 256] = generate_hex_table();

/// Hex encoding via the pair lookup table, one lookup per input byte.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut hex = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        hex.extend_from_slice(&HEX_TABLE[b as usize]);
    }
    // The table only emits ASCII hex digits.
    String::from_utf8(hex).expect("hex table emits ASCII")
}
