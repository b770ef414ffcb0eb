//! Enumeration of finalized artifacts under the recordings root. Layout:
//! `{recordings_root}/{session_id}/{node_id}/{recording_id}.{ext}` with a
//! sibling `.json` manifest.

use std::path::Path;

use api::response::{OffloadState, RecordingEntry};

pub async fn list_recordings(root: &Path) -> anyhow::Result<Vec<RecordingEntry>> {
    let mut out = vec![];
    let mut sessions = match tokio::fs::read_dir(root).await {
        Ok(rd) => rd,
        Err(_) => return Ok(out),
    };
    while let Some(session) = sessions.next_entry().await? {
        if !session.file_type().await?.is_dir() {
            continue;
        }
        let session_id = session.file_name().to_string_lossy().to_string();
        let mut nodes = tokio::fs::read_dir(session.path()).await?;
        while let Some(node) = nodes.next_entry().await? {
            if !node.file_type().await?.is_dir() {
                continue;
            }
            let node_id = node.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(node.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    continue;
                }
                let meta = file.metadata().await?;
                if !meta.is_file() {
                    continue;
                }
                let recording_id = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                out.push(RecordingEntry {
                    recording_id,
                    session_id: session_id.clone(),
                    node_id: node_id.clone(),
                    file_path: path.display().to_string(),
                    size_bytes: meta.len(),
                    has_manifest: path.with_extension("json").exists(),
                    offload_state: OffloadState::Local,
                });
            }
        }
    }
    out.sort_by(|a, b| a.recording_id.cmp(&b.recording_id));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_files_with_manifest_flag() {
        let dir = tempfile::tempdir().unwrap();
        let node_dir = dir.path().join("GAME_1").join("CAM_L");
        std::fs::create_dir_all(&node_dir).unwrap();
        std::fs::write(node_dir.join("GAME_1_CAM_L.mp4"), b"data").unwrap();
        std::fs::write(node_dir.join("GAME_1_CAM_L.json"), b"{}").unwrap();
        let other = dir.path().join("GAME_2").join("CAM_L");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("GAME_2_CAM_L.mp4"), b"xy").unwrap();

        let entries = list_recordings(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].has_manifest);
        assert_eq!(entries[0].session_id, "GAME_1");
        assert_eq!(entries[0].size_bytes, 4);
        assert!(!entries[1].has_manifest);
    }
}
