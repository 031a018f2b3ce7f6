//! File registration and retrieval for a session.
//!
//! This is the seam an HTTP upload/download layer plugs into: bytes go to
//! the storage backend, metadata goes into the session, and every member
//! hears about the new file through a `FileListUpdate` broadcast.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use qdrop_core::error::{Error, Result};
use qdrop_core::protocol::{
    FileEntry, FileId, FileListUpdatePayload, FileRecord, Message, ShareCode,
};

use crate::registry::SessionRegistry;
use crate::storage::Storage;

/// Store an uploaded file and register it with its session.
///
/// The stored key is namespaced by share code so a sweep can reason about a
/// session's objects. If registration finds the session already retired, the
/// stored bytes are removed again before the error surfaces.
pub async fn register_upload<S: Storage>(
    registry: &SessionRegistry,
    storage: &S,
    share_code: &ShareCode,
    uploader_id: &str,
    name: &str,
    mime_type: &str,
    data: Bytes,
) -> Result<FileEntry> {
    let session = registry.lookup_or_not_found(share_code).await?;

    let key = format!("{share_code}/{}", FileId::new());
    let size = data.len() as u64;
    storage.put(&key, data).await?;

    let record = FileRecord::new(
        name.to_string(),
        key.clone(),
        size,
        mime_type.to_string(),
        uploader_id.to_string(),
    );
    let entry = record.to_entry();

    let Some(files) = session.register_file(record).await else {
        // Session retired between lookup and registration.
        let _ = storage.delete(&key).await;
        return Err(Error::SessionNotFound(share_code.to_string()));
    };

    info!(
        %share_code,
        file = name,
        size,
        uploader = uploader_id,
        file_count = files.len(),
        "file registered"
    );
    session
        .broadcast(
            &Message::FileListUpdate(FileListUpdatePayload { files }),
            None,
        )
        .await;

    Ok(entry)
}

/// Fetch a registered file's bytes, enforcing the session's download policy.
pub async fn download<S: Storage>(
    registry: &SessionRegistry,
    storage: &S,
    share_code: &ShareCode,
    file_id: FileId,
) -> Result<(Arc<FileRecord>, Bytes)> {
    let session = registry.lookup_or_not_found(share_code).await?;
    if !session.settings.allow_download {
        return Err(Error::NotAuthorized);
    }

    let record = session
        .find_file(file_id)
        .await
        .ok_or_else(|| Error::FileNotFound(file_id.to_string()))?;

    let data = storage.get(&record.stored_key).await?;
    let count = record.record_download();
    debug!(
        %share_code,
        file = record.original_name,
        downloads = count,
        "file downloaded"
    );
    Ok((record, data))
}
