use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::types::{ActionResult, ApiServer, AppState, JsonBody, PortRequest};
use crate::error::Result;
use crate::servers::{CreateOutcome, CreateRequest, RebindOutcome, ServerList};
use crate::streams::{SessionParams, run_session};
use crate::templates::Template;

impl ApiServer {
    pub fn new(state: AppState, address: &str, port: u16) -> Self {
        Self {
            state,
            address: address.to_string(),
            port,
        }
    }

    async fn list_servers(State(state): State<AppState>) -> Result<Json<ServerList>> {
        Ok(Json(state.lifecycle.list().await?))
    }

    async fn list_templates(State(state): State<AppState>) -> Json<Vec<Template>> {
        Json(state.lifecycle.templates().to_vec())
    }

    async fn create_server(
        State(state): State<AppState>,
        JsonBody(request): JsonBody<CreateRequest>,
    ) -> Result<Json<CreateOutcome>> {
        Ok(Json(state.lifecycle.create(request).await?))
    }

    async fn start(
        State(state): State<AppState>,
        Path(name): Path<String>,
    ) -> Result<Json<ActionResult>> {
        let result = state.lifecycle.start(&name).await?;
        Ok(Json(ActionResult { result }))
    }

    async fn stop(
        State(state): State<AppState>,
        Path(name): Path<String>,
    ) -> Result<Json<ActionResult>> {
        let result = state.lifecycle.stop(&name).await?;
        Ok(Json(ActionResult { result }))
    }

    async fn remove(
        State(state): State<AppState>,
        Path(name): Path<String>,
    ) -> Result<Json<ActionResult>> {
        let result = state.lifecycle.remove(&name).await?;
        Ok(Json(ActionResult { result }))
    }

    async fn change_port(
        State(state): State<AppState>,
        Path(name): Path<String>,
        JsonBody(body): JsonBody<PortRequest>,
    ) -> Result<Json<RebindOutcome>> {
        Ok(Json(state.lifecycle.rebind(&name, &body.port).await?))
    }

    /// Plain text; `String` responses carry `text/plain; charset=utf-8`.
    async fn logs(State(state): State<AppState>, Path(name): Path<String>) -> Result<String> {
        state.lifecycle.logs(&name).await
    }

    async fn session(
        ws: WebSocketUpgrade,
        Query(params): Query<SessionParams>,
        State(state): State<AppState>,
    ) -> Response {
        let runtime = state.lifecycle.runtime();
        let config = state.streams.clone();
        ws.on_upgrade(move |socket| run_session(socket, runtime, params, config))
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/servers", get(Self::list_servers))
            .route("/templates", get(Self::list_templates))
            .route("/servers/create", post(Self::create_server))
            .route("/servers/{name}/start", post(Self::start))
            .route("/servers/{name}/stop", post(Self::stop))
            .route("/servers/{name}/remove", post(Self::remove))
            .route("/servers/{name}/port", post(Self::change_port))
            .route("/servers/{name}/logs", get(Self::logs))
            .route("/ws", get(Self::session))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        let address = format!("{}:{}", self.address, self.port);
        let listener = TcpListener::bind(&address).await?;
        info!(%address, "API listening");
        axum::serve(listener, Self::router(self.state)).await
    }
}
