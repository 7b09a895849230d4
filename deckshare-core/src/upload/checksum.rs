use std::{
    ffi::OsStr,
    path::{Component, Path},
};

use sha2::{Digest, Sha256};
use tokio::{fs::File, io::AsyncReadExt};

use crate::error::{UploadError, UploadResult};

const READ_BUF: usize = 64 * 1024;

/// Accept a 64-character hex SHA-256 digest in either case and return its
/// lowercase form, which is also the temp file name.
pub fn parse_checksum(raw: &str) -> UploadResult<String> {
    let valid = raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid {
        return Err(UploadError::InvalidChecksum(raw.to_string()));
    }
    Ok(raw.to_ascii_lowercase())
}

/// A final file name must be exactly one normal path component.
pub fn validate_file_name(name: &str) -> UploadResult<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None)
            if part == OsStr::new(name) && !name.contains('\0') =>
        {
            Ok(name)
        }
        _ => Err(UploadError::InvalidFileName(name.to_string())),
    }
}

/// Lowercase hex SHA-256 of the file at `path`, read in fixed-size chunks.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
