//! Chunked, resumable upload endpoints.

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};

use api::request::{UploadConfirm, UploadFinalize, UploadInit};
use api::response::{
    UploadChunkResponse, UploadConfirmResponse, UploadFinalizeResponse, UploadInitResponse,
};

use crate::error::AppError;
use crate::result::Result;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::UPLOAD_INIT, post(init))
        .route(api::path::UPLOAD_CHUNK, post(chunk))
        .route(api::path::UPLOAD_FINALIZE, post(finalize))
        .route(api::path::UPLOAD_CONFIRM, post(confirm))
}

async fn init(
    State(state): State<AppState>,
    Json(req): Json<UploadInit>,
) -> Result<Json<UploadInitResponse>> {
    Ok(Json(state.store.init_upload(req).await?))
}

/// Multipart fields: `upload_id`, `chunk_index`, optional `chunk_hash`,
/// and the `chunk` bytes.
async fn chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadChunkResponse>> {
    let mut upload_id = None;
    let mut chunk_index = None;
    let mut chunk_hash = None;
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("multipart error: {}", e)))?
    {
        match field.name() {
            Some("upload_id") => {
                upload_id = Some(field.text().await.map_err(AppError::bad_request)?)
            }
            Some("chunk_index") => {
                let text = field.text().await.map_err(AppError::bad_request)?;
                chunk_index = Some(
                    text.parse::<u32>()
                        .map_err(|_| AppError::bad_request("chunk_index is not an integer"))?,
                );
            }
            Some("chunk_hash") => {
                chunk_hash = Some(field.text().await.map_err(AppError::bad_request)?)
            }
            Some("chunk") => {
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::bad_request(format!("chunk body: {}", e)))?
                        .to_vec(),
                )
            }
            _ => {}
        }
    }

    let upload_id = upload_id.ok_or_else(|| AppError::bad_request("missing upload_id"))?;
    let chunk_index = chunk_index.ok_or_else(|| AppError::bad_request("missing chunk_index"))?;
    let data = data.ok_or_else(|| AppError::bad_request("missing chunk data"))?;

    Ok(Json(
        state
            .store
            .write_chunk(&upload_id, chunk_index, chunk_hash, data)
            .await?,
    ))
}

async fn finalize(
    State(state): State<AppState>,
    Json(req): Json<UploadFinalize>,
) -> Result<Json<UploadFinalizeResponse>> {
    Ok(Json(state.store.finalize(req).await?))
}

async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<UploadConfirm>,
) -> Result<Json<UploadConfirmResponse>> {
    Ok(Json(state.store.confirm(req).await?))
}
