use rand::{rngs::OsRng, RngCore};

/// Length in bytes of tenant and timeline identifiers.
pub const NEON_ID_BYTES: usize = 16;

/// Generates a tenant or timeline identifier: 16 bytes from the OS CSPRNG, hex encoded
/// into a 32 character lowercase string.
pub fn generate_neon_id() -> String {
    let mut bytes = [0u8; NEON_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns true when `id` has the shape produced by [`generate_neon_id`].
#[cfg(test)]
pub(crate) fn is_valid_neon_id(id: &str) -> bool {
    id.len() == NEON_ID_BYTES * 2 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
