use std::sync::Arc;

use axum::extract::FromRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::servers::Lifecycle;
use crate::streams::StreamConfig;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
    pub streams: StreamConfig,
}

pub struct ApiServer {
    pub state: AppState,
    pub address: String,
    pub port: u16,
}

/// Body of `POST /servers/{name}/port`.
#[derive(Debug, Deserialize)]
pub struct PortRequest {
    #[serde(default)]
    pub port: Value,
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub result: &'static str,
}

/// JSON body extractor whose rejections use the API error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct JsonBody<T>(pub T);
