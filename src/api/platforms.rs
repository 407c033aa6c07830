use super::errors::{ApiError, ApiResult};
use super::AppState;
use crate::atoms::error::EngineError;
use crate::atoms::types::PlatformType;
use crate::engine::intake::crypto::wecom_decrypt;
use crate::engine::intake::{handler_for, CallbackRequest, CallbackResponse};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use std::collections::HashMap;

fn to_callback_request(headers: HeaderMap, query: HashMap<String, String>, body: Bytes) -> CallbackRequest {
    let headers = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    CallbackRequest::new(headers, query, body.to_vec())
}

/// The URL-verification handshake a platform issues when a webhook is first
/// registered. Only WeCom and its bot variant echo back a decrypted
/// `echostr`; everything else just needs a 200 to confirm reachability.
pub async fn verify(State(state): State<AppState>, Path(api_key): Path<String>, Query(query): Query<HashMap<String, String>>) -> ApiResult<String> {
    let platform = state.store.get_platform_by_api_key(&api_key)?;

    if let Some(echostr) = query.get("echostr") {
        if matches!(platform.platform_type, PlatformType::Wecom | PlatformType::WecomBot) {
            let encoding_aes_key = platform
                .config
                .get("encoding_aes_key")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ApiError(EngineError::config_missing("encoding_aes_key is not configured for this platform")))?;
            let corp_id = platform.config.get("corp_id").and_then(|v| v.as_str()).unwrap_or("");
            let decrypted = wecom_decrypt(echostr, encoding_aes_key, corp_id)
                .or_else(|| wecom_decrypt(echostr, encoding_aes_key, ""))
                .ok_or_else(|| ApiError(EngineError::invalid("failed to decrypt echostr")))?;
            return Ok(decrypted);
        }
    }
    Ok(String::new())
}

pub async fn callback(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<String> {
    let platform = state.store.get_platform_by_api_key(&api_key)?;
    let req = to_callback_request(headers, query, body);

    let handler = handler_for(platform.platform_type);
    let response = handler.handle(&state.store, &platform, &req).await?;
    Ok(match response {
        CallbackResponse::Ok => "success".to_string(),
        CallbackResponse::Challenge(challenge) => challenge,
    })
}

pub async fn wukongim_webhook(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap, body: Bytes) -> ApiResult<String> {
    let platform = state
        .store
        .list_platforms_by_type(PlatformType::Wukongim)?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError(EngineError::not_found("no active wukongim platform configured")))?;

    let req = to_callback_request(headers, query, body);
    let handler = handler_for(PlatformType::Wukongim);
    handler.handle(&state.store, &platform, &req).await?;
    Ok("success".to_string())
}
