use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Form, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::constants::{PAGE_TITLE, SESSION_COOKIE};
use crate::conversation::ChatSession;
use crate::llm::ChatClient;
use crate::session::{submit_turn, SessionStore, TurnOutcome};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    sessions: Arc<SessionStore>,
    client: Arc<ChatClient>,
}

impl AppState {
    pub fn new(client: ChatClient) -> Result<Self> {
        let templates = create_minijinja_env().context("Failed to initialize template engine")?;
        Ok(Self {
            templates: Arc::new(templates),
            sessions: Arc::new(SessionStore::new()),
            client: Arc::new(client),
        })
    }
}

// Minijinja Environment setup
fn create_minijinja_env() -> Result<AutoReloader> {
    // Use AutoReloader for development convenience
    let reloader = AutoReloader::new(|notifier| {
        let loader = path_loader("templates");
        let mut env = Environment::new();
        env.set_loader(loader);
        // Watch the templates directory for changes
        notifier.watch_path("templates", true);
        Ok(env)
    });
    Ok(reloader)
}

/// Transient banner rendered above the chat, scoped to one response.
#[derive(Debug, Clone, Serialize)]
struct Notice {
    kind: &'static str,
    text: String,
}

impl Notice {
    fn info(text: impl Into<String>) -> Self {
        Self {
            kind: "info",
            text: text.into(),
        }
    }

    fn success(text: impl Into<String>) -> Self {
        Self {
            kind: "success",
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            kind: "error",
            text: text.into(),
        }
    }
}

fn notice_for(outcome: &TurnOutcome) -> Option<Notice> {
    match outcome {
        TurnOutcome::Replied | TurnOutcome::EmptyPrompt => None,
        TurnOutcome::MissingKey => Some(Notice::info("请输入OpenAI API Key以继续。")),
        TurnOutcome::MalformedKey => {
            Some(Notice::error("API Key格式不正确，请检查后重新输入。"))
        }
        TurnOutcome::RemoteFailed(reason) => Some(Notice::error(format!("发生错误：{reason}"))),
    }
}

/// The page is a pure function of the session history, the notice, and the
/// key to re-fill into the masked input.
fn render_page(
    state: &AppState,
    session: &ChatSession,
    api_key: &str,
    notice: Option<Notice>,
) -> Response {
    let rendered = state.templates.acquire_env().and_then(|env| {
        env.get_template("index.html").and_then(|tmpl| {
            tmpl.render(minijinja::context! {
                title => PAGE_TITLE,
                messages => session.messages,
                api_key => api_key,
                notice => notice,
            })
        })
    });
    match rendered {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
                .into_response()
        }
    }
}

/// Pull the session id out of the `Cookie` header, if present and valid.
fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookies.split(';') {
        let cookie = cookie.trim();
        if let Some(rest) = cookie.strip_prefix(SESSION_COOKIE) {
            if let Some(value) = rest.strip_prefix('=') {
                if let Ok(id) = Uuid::parse_str(value.trim()) {
                    return Some(id);
                }
            }
        }
    }
    None
}

fn resolve_session(headers: &HeaderMap) -> (Uuid, bool) {
    match session_id(headers) {
        Some(id) => (id, false),
        None => (Uuid::new_v4(), true),
    }
}

/// Attach the session cookie when this response created the session.
fn with_session_cookie(mut response: Response, id: Uuid, is_new: bool) -> Response {
    if is_new {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

async fn index_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (sid, is_new) = resolve_session(&headers);
    let handle = state.sessions.session(sid);
    let session = handle.lock().await;
    let response = render_page(&state, &session, "", None);
    with_session_cookie(response, sid, is_new)
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    api_key: String,
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Response {
    let (sid, is_new) = resolve_session(&headers);
    let handle = state.sessions.session(sid);
    // Holding the session lock across the remote call keeps turns within a
    // session strictly sequential.
    let mut session = handle.lock().await;
    let outcome = submit_turn(&mut session, &state.client, &form.prompt, &form.api_key).await;
    let response = render_page(&state, &session, &form.api_key, notice_for(&outcome));
    with_session_cookie(response, sid, is_new)
}

#[derive(Debug, Deserialize)]
pub struct ClearForm {
    #[serde(default)]
    api_key: String,
}

async fn clear_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ClearForm>,
) -> Response {
    let (sid, is_new) = resolve_session(&headers);
    let handle = state.sessions.session(sid);
    let mut session = handle.lock().await;
    session.clear();
    let response = render_page(
        &state,
        &session,
        &form.api_key,
        Some(Notice::success("对话已清空！")),
    );
    with_session_cookie(response, sid, is_new)
}

// Build our application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/chat", post(chat_handler))
        .route("/clear", post(clear_handler))
        // Route for static files must be nested under a path like /static
        // or it will conflict with other routes.
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(addr: SocketAddr) -> Result<()> {
    let state = AppState::new(ChatClient::new())?;
    let app = build_router(state);

    info!("Web server listening on http://{}", addr);

    // Bind using tokio::net::TcpListener
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    // Use axum::serve to run the application
    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn session_id_parses_the_sid_cookie() {
        let id = Uuid::new_v4();
        let headers = headers_with_cookie(&format!("theme=dark; sid={}; lang=zh", id));
        assert_eq!(session_id(&headers), Some(id));
    }

    #[test]
    fn session_id_ignores_garbage_and_lookalike_cookies() {
        assert_eq!(session_id(&headers_with_cookie("sid=not-a-uuid")), None);
        let id = Uuid::new_v4();
        assert_eq!(
            session_id(&headers_with_cookie(&format!("sid2={}", id))),
            None
        );
        assert_eq!(session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn outcomes_map_to_distinct_notices() {
        assert!(notice_for(&TurnOutcome::Replied).is_none());
        assert!(notice_for(&TurnOutcome::EmptyPrompt).is_none());

        let missing = notice_for(&TurnOutcome::MissingKey).unwrap();
        let malformed = notice_for(&TurnOutcome::MalformedKey).unwrap();
        assert_eq!(missing.kind, "info");
        assert_eq!(malformed.kind, "error");
        assert_ne!(missing.text, malformed.text);

        let failed = notice_for(&TurnOutcome::RemoteFailed("boom".to_string())).unwrap();
        assert_eq!(failed.kind, "error");
        assert!(failed.text.contains("boom"));
    }
}
