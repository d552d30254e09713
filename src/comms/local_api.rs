use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Form, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tera::Tera;
use tracing::{debug, error, info};

use crate::host::{normalize_node_id, HostServer};
use crate::monitoring::cache::StatusCache;
use crate::monitoring::poller::Poller;
use crate::probe::correlator::ReplyRouter;
use crate::probe::runner::ProbeRunner;
use crate::probe::DeviceStatus;
use crate::settings::SettingsStore;

/// The device-list column injector, bundled at compile time and served from
/// `/ui.js` the way the host's web UI expects.
const UI_JS: &str = include_str!("../../webui/ui.js");

type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<dyn HostServer>,
    /// Inbound hook target: the embedding host feeds every agent message
    /// through `reply_router.handle_agent_message`.
    pub reply_router: Arc<ReplyRouter>,
    pub runner: ProbeRunner,
    pub cache: Arc<StatusCache>,
    pub settings: Arc<SettingsStore>,
    pub templates: Option<Arc<Tera>>,
    pub with_ui: bool,
}

impl AppState {
    pub fn new(
        host: Arc<dyn HostServer>,
        reply_router: Arc<ReplyRouter>,
        settings: Arc<SettingsStore>,
        with_ui: bool,
    ) -> Self {
        let templates = if with_ui {
            match Tera::new("templates/**/*.html") {
                Ok(t) => {
                    debug!("loaded {} templates", t.get_template_names().count());
                    Some(Arc::new(t))
                }
                Err(e) => {
                    error!("template parsing error: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let runner = ProbeRunner::new(host.clone(), reply_router.clone(), settings.clone());
        Self {
            host,
            reply_router,
            runner,
            cache: Arc::new(StatusCache::new()),
            settings,
            templates,
            with_ui,
        }
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            self.host.clone(),
            self.runner.clone(),
            self.cache.clone(),
            self.settings.clone(),
        )
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": crate::VERSION}))
}

// Status API: /status?id=<id>&id=<id>... — repeated keys, short or long ids.
// Cache-first with the configured TTL; misses are probed on demand.
async fn status(
    State(state): State<SharedState>,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let mut ids: Vec<String> = params
        .into_iter()
        .filter(|(k, v)| k == "id" && !v.trim().is_empty())
        .map(|(_, v)| normalize_node_id(&v))
        .collect();
    ids.sort();
    ids.dedup();

    // BTreeMap keeps the response stable for the browser script
    let mut out: BTreeMap<String, DeviceStatus> = BTreeMap::new();
    if ids.is_empty() {
        return Json(out);
    }

    let ttl = state.settings.current().await.cache_ttl();
    let mut misses = Vec::new();
    for id in ids {
        match state.cache.fresh(&id, ttl).await {
            Some(status) => {
                out.insert(id, status);
            }
            None => misses.push(id),
        }
    }

    if !misses.is_empty() {
        let probed = state.runner.probe_many(misses).await;
        for (id, status) in probed {
            state.cache.insert(id.clone(), status.clone()).await;
            out.insert(id, status);
        }
    }

    Json(out)
}

// Connected-agent listing, keyed by node id.
async fn agents(State(state): State<SharedState>) -> impl IntoResponse {
    let map: BTreeMap<String, _> = state
        .host
        .connected_agents()
        .into_iter()
        .map(|a| (a.node_id.clone(), a))
        .collect();
    Json(json!({"agents": map}))
}

fn admin_form_html(mesh_id: &str, poll_interval: u64) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <title>OneDriveCheck</title></head>\
         <body style=\"font-family:sans-serif;padding:20px;\">\
         <h2>OneDriveCheck &mdash; Settings</h2>\
         <form method=\"POST\" action=\"admin\">\
         <label><strong>Device group id</strong></label><br/>\
         <input type=\"text\" name=\"mesh_id\" value=\"{mesh_id}\" style=\"width:420px\"/><br/><br/>\
         <label><strong>Polling interval</strong> (seconds, min 10)</label><br/>\
         <input type=\"number\" min=\"10\" name=\"poll_interval\" value=\"{poll_interval}\" style=\"width:120px\"/><br/><br/>\
         <input type=\"submit\" value=\"Save\"/>\
         </form></body></html>"
    )
}

async fn admin_page(State(state): State<SharedState>) -> impl IntoResponse {
    let cfg = state.settings.current().await;
    let mesh_id = cfg.mesh_id.clone().unwrap_or_default();
    let poll_interval = cfg.poll_interval().as_secs();

    if let Some(templates) = &state.templates {
        let mut context = tera::Context::new();
        context.insert("mesh_id", &mesh_id);
        context.insert("poll_interval", &poll_interval);
        context.insert("version", crate::VERSION);
        match templates.render("admin.html", &context) {
            Ok(html) => return Html(html).into_response(),
            Err(e) => error!("template render error: {}", e),
        }
    }
    Html(admin_form_html(&mesh_id, poll_interval)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AdminForm {
    #[serde(default)]
    pub mesh_id: String,
    pub poll_interval: Option<u64>,
}

async fn admin_save(
    State(state): State<SharedState>,
    Form(form): Form<AdminForm>,
) -> impl IntoResponse {
    let mesh_id = form.mesh_id.trim().to_string();
    let result = state
        .settings
        .update(|s| {
            s.mesh_id = if mesh_id.is_empty() {
                None
            } else {
                Some(mesh_id.clone())
            };
            if let Some(interval) = form.poll_interval {
                s.poll_interval_secs = interval;
            }
        })
        .await;

    match result {
        Ok(updated) => {
            info!(
                mesh_id = updated.mesh_id.as_deref().unwrap_or("(none)"),
                poll_interval_secs = updated.poll_interval().as_secs(),
                "settings saved"
            );
            Redirect::to("admin").into_response()
        }
        Err(e) => {
            error!("saving settings failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn ui_js() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        UI_JS,
    )
}

pub fn create_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/agents", get(agents))
        .route("/admin", get(admin_page).post(admin_save))
        .route("/ui.js", get(ui_js));

    if state.with_ui {
        use tower_http::services::ServeDir;
        router = router.nest_service("/static", ServeDir::new("webui"));
    }

    router.with_state(state)
}

pub async fn serve(state: SharedState, port: u16) -> Result<()> {
    state.poller().spawn();

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
