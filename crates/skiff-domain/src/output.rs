use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identity of an output file.
///
/// Derived from the owning execution, the file's relative name and its byte
/// size only; file contents are never read. Two different files with the same
/// name and size in one execution collide.
pub fn output_id(execution_id: &str, name: &str, size: u64) -> Uuid {
    let digest = Sha256::digest(format!("{execution_id}+{name}+{size}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}
