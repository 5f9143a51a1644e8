use crate::{Error, SearchResultPage, Searcher};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info};

type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<Searcher>,
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

/// Serves `searcher` until Ctrl-C or SIGTERM. The corpus must already be loaded.
pub async fn serve(searcher: Arc<Searcher>, config: WebConfig) -> Result<(), WebError> {
    let state = Arc::new(AppState { searcher });
    let router = build_router(state);
    info!(%config.addr, "Binding HTTP listener");
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_request_error() {
            ApiError::bad_request(err.to_string())
        } else if err.is_not_found() {
            ApiError::not_found(err.to_string())
        } else {
            error!(error = %err, "Request failed");
            ApiError::internal("query failure")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/search", get(search_html))
        .route("/api/search", get(api_search))
        .route("/api/preview", get(api_preview))
        .route("/api/works", get(api_works))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn home(State(state): State<SharedState>) -> impl IntoResponse {
    let works = state.searcher.works().map(|table| table.len()).unwrap_or(0);
    let template = HomeTemplate {
        works,
        version: env!("CARGO_PKG_VERSION"),
    };
    Html(template.render().unwrap_or_else(|err| render_error_page(err.to_string())))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "shakesearch-web" }))
}

async fn search_html(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let outcome = parse_search_params(&params, state.searcher.config().default_page_length)
        .and_then(|(query, page, length)| {
            let results = state.searcher.search(&query, page, length)?;
            Ok((query, results))
        });
    match outcome {
        Ok((query, results)) => {
            let rows = results.results.iter().map(ResultRow::from_result).collect();
            let template = SearchTemplate {
                query: &query,
                page: &results,
                rows,
                previous_href: page_href(&query, results.page.checked_sub(1), results.length),
                next_href: page_href(
                    &query,
                    has_next_page(&results).then_some(results.page + 1),
                    results.length,
                ),
            };
            Html(template.render().unwrap_or_else(|err| render_error_page(err.to_string())))
                .into_response()
        }
        Err(err) => (err.status, Html(render_error_page(err.message))).into_response(),
    }
}

async fn api_search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResultPage>, ApiError> {
    let (query, page, length) =
        parse_search_params(&params, state.searcher.config().default_page_length)?;
    Ok(Json(state.searcher.search(&query, page, length)?))
}

async fn api_preview(
    State(state): State<SharedState>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing id in URL params"))?;
    let preview = state.searcher.preview(&id)?;
    Ok(Json(json!({ "id": id, "preview": preview })))
}

async fn api_works(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let works = state.searcher.works()?;
    Ok(Json(json!({
        "works": works.iter().collect::<Vec<_>>(),
        "total_blocks": works.total_blocks(),
    })))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    page: Option<String>,
    length: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreviewParams {
    id: Option<String>,
}

/// Query text, page and page length, with numbers taken verbatim from the URL so a
/// malformed value is reported rather than silently defaulted.
fn parse_search_params(
    params: &SearchParams,
    default_length: usize,
) -> Result<(String, usize, usize), ApiError> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing search query in URL params"))?;
    let page = match params.page.as_deref() {
        None | Some("") => 0,
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request("page number is not valid"))?,
    };
    let length = match params.length.as_deref() {
        None | Some("") => default_length,
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request("page length is not valid"))?,
    };
    Ok((query.to_string(), page, length))
}

fn has_next_page(page: &SearchResultPage) -> bool {
    (page.page + 1).saturating_mul(page.length) < page.total
}

fn page_href(query: &str, page: Option<usize>, length: usize) -> Option<String> {
    page.map(|page| {
        format!(
            "/search?q={}&page={page}&length={length}",
            utf8_percent_encode(query, NON_ALPHANUMERIC)
        )
    })
}

fn render_error_page(message: String) -> String {
    let template = ErrorTemplate { message: &message };
    template
        .render()
        .unwrap_or_else(|_| "<!DOCTYPE html><title>Error</title>".to_string())
}

struct ResultRow<'a> {
    work: &'a str,
    id: &'a str,
    preview_href: String,
    lines: usize,
    fragments: &'a [String],
}

impl<'a> ResultRow<'a> {
    fn from_result(result: &'a crate::SearchResult) -> Self {
        Self {
            work: &result.work,
            id: &result.id,
            preview_href: format!(
                "/api/preview?id={}",
                utf8_percent_encode(&result.id, NON_ALPHANUMERIC)
            ),
            lines: result.lines,
            fragments: &result.fragments,
        }
    }
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>ShakeSearch</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="bg-slate-50 text-slate-900">
    <main class="min-h-screen flex flex-col items-center justify-start py-10 px-4">
      <div class="max-w-3xl w-full space-y-6">
        <p class="uppercase tracking-wide text-sm text-slate-500">ShakeSearch v{{ version }}</p>
        <h1 class="text-4xl font-extrabold tracking-tight">Search the complete works.</h1>
        <p class="text-lg text-slate-600">{{ works }} works indexed. Misspellings are forgiven when nothing matches exactly.</p>
        <form action="/search" method="get" class="flex gap-3">
          <input type="text" name="q" placeholder="Alas, poor Yorick" class="flex-1 rounded-md border border-slate-300 px-3 py-2" />
          <button type="submit" class="inline-flex items-center rounded-md bg-slate-900 px-4 py-2 text-white font-semibold">Search</button>
        </form>
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct HomeTemplate {
    works: usize,
    version: &'static str,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>ShakeSearch • {{ query }}</title>
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
  </head>
  <body class="bg-slate-50 text-slate-900">
    <main class="min-h-screen flex flex-col items-center justify-start py-10 px-4">
      <div class="max-w-3xl w-full space-y-4">
        <div>
          <p class="uppercase tracking-wide text-sm text-slate-500">Fuzziness {{ page.fuzziness }}</p>
          <h1 class="text-4xl font-extrabold tracking-tight">Results for “{{ query }}”</h1>
          <p class="text-lg text-slate-600">{{ page.total }} matching passages, page {{ page.page + 1 }}.</p>
        </div>
        {% if rows.len() == 0 %}
          <p>No results found.</p>
        {% else %}
        <ol class="space-y-4">
          {% for row in rows %}
          <li class="bg-white shadow rounded p-4">
            <h2 class="font-semibold">{{ row.work }}</h2>
            {% for fragment in row.fragments %}
            <p class="text-slate-700">{{ fragment|safe }}</p>
            {% endfor %}
            <a href="{{ row.preview_href }}" class="text-blue-700 hover:underline">Preview {{ row.id }} ({{ row.lines }} lines)</a>
          </li>
          {% endfor %}
        </ol>
        {% endif %}
        <nav class="flex gap-3">
          {% if let Some(href) = previous_href %}<a href="{{ href }}" class="text-blue-700">Previous</a>{% endif %}
          {% if let Some(href) = next_href %}<a href="{{ href }}" class="text-blue-700">Next</a>{% endif %}
        </nav>
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct SearchTemplate<'a> {
    query: &'a str,
    page: &'a SearchResultPage,
    rows: Vec<ResultRow<'a>>,
    previous_href: Option<String>,
    next_href: Option<String>,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>ShakeSearch • Error</title>
  </head>
  <body>
    <main>
      <h1>Something went wrong</h1>
      <p>{{ message }}</p>
      <a href="/">Back to search</a>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ErrorTemplate<'a> {
    message: &'a str,
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use crate::SearchConfig;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    const CORPUS: &str = "🙂THE TRAGEDY OF HAMLET\n\
        ACT I\n\
        Who's there?\n\
        ACT V\n\
        Alas, poor Yorick! I knew him, Horatio.\n\
        🙂THE TEMPEST\n\
        MIRANDA.\n\
        O brave new world, that has such people in't!\n";

    fn test_router() -> Router {
        let searcher = Searcher::new(SearchConfig::default());
        searcher.load(CORPUS).unwrap();
        build_router(Arc::new(AppState {
            searcher: Arc::new(searcher),
        }))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn api_search_yorick() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::get("/api/search?q=yorick&page=0&length=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let payload: SearchResultPage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload.total, 1);
        assert_eq!(payload.length, 5);
        assert_eq!(payload.results[0].id, "THE TRAGEDY OF HAMLET-2");
    }

    #[tokio::test]
    async fn api_search_defaults_page_and_length() {
        let (status, payload) = get_json(test_router(), "/api/search?q=yorik").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["page"], 0);
        assert_eq!(payload["length"], 10);
        assert_eq!(payload["fuzziness"], 1);
    }

    #[tokio::test]
    async fn api_search_rejects_bad_params() {
        let (status, payload) = get_json(test_router(), "/api/search").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "missing search query in URL params");

        let (status, payload) = get_json(test_router(), "/api/search?q=ghost&page=two").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "page number is not valid");

        let (status, payload) = get_json(test_router(), "/api/search?q=ghost&length=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "page length is not valid");

        let (status, _) = get_json(test_router(), "/api/search?q=ghost&length=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_preview_statuses() {
        let (status, payload) =
            get_json(test_router(), "/api/preview?id=THE%20TEMPEST-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["preview"],
            "\nO brave new world, that has such people in't!\n"
        );

        let (status, _) = get_json(test_router(), "/api/preview").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(test_router(), "/api/preview?id=TEMPEST").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(test_router(), "/api/preview?id=MACBETH-0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unloaded_searcher_is_a_query_failure() {
        let router = build_router(Arc::new(AppState {
            searcher: Arc::new(Searcher::default()),
        }));
        let (status, payload) = get_json(router, "/api/search?q=ghost").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload["error"], "query failure");
    }

    #[tokio::test]
    async fn api_works_lists_block_counts() {
        let (status, payload) = get_json(test_router(), "/api/works").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["total_blocks"], 5);
        assert_eq!(payload["works"][0]["title"], "THE TEMPEST");
        assert_eq!(payload["works"][1]["blocks"], 3);
    }

    #[tokio::test]
    async fn search_page_highlights_and_links_previews() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/search?q=brave").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("<mark>brave</mark>"));
        assert!(html.contains("/api/preview?id=THE%20TEMPEST%2D1"));
    }

    #[tokio::test]
    async fn search_page_reports_bad_requests() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/search?q=").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn home_and_health() {
        let router = test_router();
        let response = router
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let (status, payload) = get_json(router, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "ok");
    }

    #[test]
    fn next_page_only_when_matches_remain() {
        let page = |page, total| SearchResultPage {
            total,
            page,
            length: 10,
            fuzziness: 0,
            results: Vec::new(),
        };
        assert!(has_next_page(&page(0, 11)));
        assert!(!has_next_page(&page(0, 10)));
        assert!(!has_next_page(&page(1, 20)));
    }
}
