//! Host probes: disk capacity for the recordings volume, board temperature
//! and the streaming file hash used at finalization.

use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use sysinfo::{Components, Disks};

/// Free/total bytes of the filesystem holding `path`, resolved by the
/// longest matching mount point. `(0, 0)` when no disk matches.
pub fn storage_stats(path: &Path) -> (u64, u64) {
    let target = path
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(path));
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let depth = mount.components().count();
            if best.map(|(d, _, _)| depth > d).unwrap_or(true) {
                best = Some((depth, disk.available_space(), disk.total_space()));
            }
        }
    }
    match best {
        Some((_, free, total)) => (free, total),
        None => (0, 0),
    }
}

/// Hottest thermal component, 0.0 when the host exposes none (containers,
/// CI runners).
pub fn temperature_c() -> f32 {
    let components = Components::new_with_refreshed_list();
    components
        .list()
        .iter()
        .map(|c| c.temperature())
        .fold(0.0_f32, f32::max)
}

pub fn host_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}

/// SHA-256 over the whole file, computed off the async runtime.
pub async fn sha256_file(path: &Path) -> anyhow::Result<(String, u64)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 1024 * 1024];
        let mut size: u64 = 0;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok((format!("{:x}", hasher.finalize()), size))
    })
    .await?
}

pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let (hash, size) = sha256_file(&path).await.unwrap();
        assert_eq!(size, 11);
        assert_eq!(hash, sha256_bytes(b"hello world"));
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
