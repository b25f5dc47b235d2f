//! The shared secret both processes use to authenticate the loopback
//! ingestion API. Not named by spec.md directly, but required for the
//! "unauthenticated externally, API-key gated internally" contract in §6.3
//! to hold across two independent processes sharing a pod.

use rand::RngCore;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Reads the API key from `path`, generating and persisting a fresh 32-byte
/// key (hex-encoded) if the file doesn't exist yet.
pub fn load_or_create(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(existing) => {
            let key = existing.trim().to_string();
            if key.is_empty() {
                return generate_and_write(path);
            }
            Ok(key)
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => generate_and_write(path),
        Err(error) => Err(error),
    }
}

fn generate_and_write(path: &Path) -> io::Result<String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = hex::encode(bytes);

    fs::write(path, &key)?;
    restrict_permissions(path)?;

    info!(path = %path.display(), "generated ingestion API key");
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
