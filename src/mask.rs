//! Reversible whole-file masking.
//!
//! Obfuscation, not cryptography: a repeating-key XOR that stops standard
//! viewers from opening the artifact without the shared key. Applying the
//! transform twice restores the original bytes.

use std::path::Path;

use anyhow::Context;

use crate::error::{ReelforgeError, ReelforgeResult};

/// Key used when the caller does not supply one. Shared with every consumer
/// of masked files; changing it orphans existing archives.
pub const DEFAULT_MASK_KEY: &[u8] = b"ShellAgentSecretKey2024!";

/// XORs `data` in place against a repeating `key`.
pub fn mask_bytes(data: &mut [u8], key: &[u8]) -> ReelforgeResult<()> {
    if key.is_empty() {
        return Err(ReelforgeError::validation("mask key must not be empty"));
    }
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
    Ok(())
}

/// Masks a file in place.
pub fn mask_file(path: &Path, key: &[u8]) -> ReelforgeResult<()> {
    let mut data =
        std::fs::read(path).with_context(|| format!("reading {} for masking", path.display()))?;
    mask_bytes(&mut data, key)?;
    std::fs::write(path, &data)
        .with_context(|| format!("writing masked bytes to {}", path.display()))?;
    Ok(())
}

/// Removes the mask. The transform is its own inverse.
pub fn unmask_file(path: &Path, key: &[u8]) -> ReelforgeResult<()> {
    mask_file(path, key)
}
