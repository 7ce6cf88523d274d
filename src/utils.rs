//! Utility functions

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Read buffer size for file fingerprinting
const FINGERPRINT_BUF_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 fingerprint of a file as a lowercase hex string
///
/// The file is read in chunks, so arbitrarily large inputs hash in constant
/// memory. Used to detect whether a checkpoint store belongs to the input
/// file a run is about to process.
///
/// # Arguments
///
/// * `path` - The file to hash
///
/// # Returns
///
/// The 64-character lowercase hex digest, or an IO error if the file cannot
/// be read.
///
/// # Examples
///
/// ```
/// use harvester::utils::fingerprint_file;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempfile::tempdir()?;
/// let path = dir.path().join("input.jsonl");
/// std::fs::write(&path, "hello world")?;
///
/// let digest = fingerprint_file(&path).await?;
/// assert_eq!(digest.len(), 64);
/// # Ok(())
/// # }
/// ```
pub async fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FINGERPRINT_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
