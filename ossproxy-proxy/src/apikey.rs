//! Reads (or, racing the Watcher's own startup, generates) the shared
//! ingestion API key. Identical in shape to `ossproxy-watcher`'s module of
//! the same name — each binary owns its own copy rather than depending on
//! the other, matching the teacher's one-binary-per-crate layout.

use rand::RngCore;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

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
