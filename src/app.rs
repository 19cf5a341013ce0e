#![cfg(not(tarpaulin_include))]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::Query;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::aggregate::{BonusCriteria, Metric};
use crate::auth::{Credentials, require_basic_auth};
use crate::charts::{self, ChartOptions};
use crate::config::{Config, RefreshPolicy, SheetLocation};
use crate::dataset::Dataset;
use crate::error::AppError;
use crate::export;
use crate::google::{self, TokenStore};
use crate::page::{self, DashboardQuery};
use crate::reactive::{Content, Context, Input, Output, ViewState};
use crate::source::{self, SheetSource};

pub struct AppState {
    pub config: Config,
    source: Box<dyn SheetSource>,
    cache: RwLock<Option<Arc<Dataset>>>,
    credentials: Arc<Credentials>,
    handlebars: Handlebars<'static>,
    criteria: BonusCriteria,
}

impl AppState {
    /// Hash the shared password and register templates.
    pub fn new(config: Config, source: Box<dyn SheetSource>) -> Result<Self, Box<dyn std::error::Error>> {
        let credentials = Credentials::new(&config.username, &config.password)?;
        let mut handlebars = Handlebars::new();
        page::register_templates(&mut handlebars)?;

        Ok(AppState {
            config,
            source,
            cache: RwLock::new(None),
            credentials: Arc::new(credentials),
            handlebars,
            criteria: BonusCriteria::default(),
        })
    }

    fn developer_title(&self) -> &'static str {
        self.config.variant.developer_title()
    }

    async fn load(&self) -> Result<Arc<Dataset>, AppError> {
        let values = self.source.fetch().await?;
        let dataset = Dataset::from_values(&values)?;
        log::info!("Loaded {} activations from {}", dataset.len(), self.source.describe());
        Ok(Arc::new(dataset))
    }

    /// Refetch the sheet and replace the cached dataset.
    pub async fn refresh(&self) -> Result<Arc<Dataset>, AppError> {
        let dataset = self.load().await?;
        *self.cache.write().await = Some(dataset.clone());
        Ok(dataset)
    }

    /// The dataset for one request, honouring the refresh policy.
    pub async fn dataset(&self) -> Result<Arc<Dataset>, AppError> {
        match self.config.refresh {
            RefreshPolicy::PerRequest => self.load().await,
            RefreshPolicy::Startup => {
                if let Some(dataset) = self.cache.read().await.as_ref() {
                    return Ok(dataset.clone());
                }
                self.refresh().await
            }
        }
    }

    fn view_state(&self, query: DashboardQuery) -> Result<ViewState, AppError> {
        let today = chrono::Local::now().date_naive();
        query.into_state(today, self.config.date_window_days)
    }

    fn context<'a>(&'a self, dataset: &'a Dataset, view: &'a ViewState) -> Context<'a> {
        Context {
            dataset,
            state: view,
            criteria: &self.criteria,
            developer_title: self.developer_title(),
        }
    }
}

/// Build the router with every route behind the basic-auth gate.
pub fn router(state: Arc<AppState>) -> Router {
    let credentials = state.credentials.clone();
    let assets = ServeDir::new(&state.config.assets_dir);

    Router::new()
        .route("/", get(dashboard))
        .route("/api/update", post(api_update))
        .route("/api/outputs/:output", get(api_output))
        .route("/api/refresh", post(api_refresh))
        .route("/charts/main-map.svg", get(main_map_svg))
        .route("/charts/filtered-map.svg", get(filtered_map_svg))
        .route("/charts/weekly/:file", get(weekly_svg))
        .route("/export/activations.csv", get(export_activations_csv))
        .route("/export/activations.xlsx", get(export_activations_xlsx))
        .route("/export/bonus.csv", get(export_bonus_csv))
        .nest_service("/assets", assets)
        .layer(middleware::from_fn_with_state(credentials, require_basic_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the browser consent flow when the sheet comes from Google.
pub async fn authorize(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match &config.sheet {
        SheetLocation::Google {
            credentials_path,
            token_path,
            ..
        } => {
            google::ensure_authorized(credentials_path, &TokenStore::new(token_path.clone())).await?;
        }
        SheetLocation::Snapshot(path) => {
            log::info!("Reading snapshot {}; no Google authorization needed", path.display());
        }
    }
    Ok(())
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    authorize(&config).await?;

    let source = source::from_location(&config.sheet);
    let state = Arc::new(AppState::new(config, source)?);

    if state.config.refresh == RefreshPolicy::Startup {
        state.refresh().await?;
    }

    let addr = SocketAddr::new(state.config.bind_addr, state.config.port);
    let listener = TcpListener::bind(addr).await?;
    log::info!(
        "{} dashboard listening on http://{}",
        state.developer_title(),
        addr
    );
    if addr.ip().is_unspecified() {
        match local_ip_address::local_ip() {
            Ok(ip) => log::info!("On your network: http://{}:{}", ip, addr.port()),
            Err(e) => log::warn!("Could not determine local IP: {}", e),
        }
    }

    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn dashboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Html<String>, AppError> {
    let view = state.view_state(query)?;
    let dataset = state.dataset().await?;
    let ctx = state.context(&dataset, &view);
    page::render(&state.handlebars, &ctx).map(Html)
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    state: ViewState,
    changed: Vec<Input>,
}

#[derive(Debug, Serialize)]
struct OutputUpdate {
    output: Output,
    content: Content,
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    outputs: Vec<OutputUpdate>,
}

async fn api_update(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, AppError> {
    let dataset = state.dataset().await?;
    let ctx = state.context(&dataset, &request.state);
    let outputs = ctx
        .update(&request.changed)
        .into_iter()
        .map(|(output, content)| OutputUpdate { output, content })
        .collect();
    Ok(Json(UpdateResponse { outputs }))
}

async fn api_output(
    State(state): State<Arc<AppState>>,
    Path(output): Path<String>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Content>, AppError> {
    let output: Output = output.parse().map_err(AppError::NotFound)?;
    let view = state.view_state(query)?;
    let dataset = state.dataset().await?;
    Ok(Json(state.context(&dataset, &view).compute(output)))
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    rows: usize,
}

async fn api_refresh(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>, AppError> {
    let dataset = state.refresh().await?;
    Ok(Json(RefreshResponse { rows: dataset.len() }))
}

fn svg_response(svg: String) -> Response {
    ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response()
}

async fn map_svg(
    state: Arc<AppState>,
    query: DashboardQuery,
    output: Output,
) -> Result<Response, AppError> {
    let view = state.view_state(query)?;
    let dataset = state.dataset().await?;
    let Content::Map(figure) = state.context(&dataset, &view).compute(output) else {
        return Err(AppError::Chart(format!("{} is not a map", output)));
    };
    let svg = charts::render_map(&figure, &ChartOptions::map())
        .map_err(|e| AppError::Chart(e.to_string()))?;
    Ok(svg_response(svg))
}

async fn main_map_svg(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, AppError> {
    map_svg(state, query, Output::MainMap).await
}

async fn filtered_map_svg(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, AppError> {
    map_svg(state, query, Output::FilteredMap).await
}

async fn weekly_svg(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, AppError> {
    let metric = file
        .strip_suffix(".svg")
        .and_then(Metric::from_id)
        .ok_or_else(|| AppError::NotFound(format!("no weekly chart '{}'", file)))?;
    let view = state.view_state(query)?;
    let dataset = state.dataset().await?;
    let Content::Weekly(series) = state.context(&dataset, &view).compute(Output::WeeklyBars) else {
        return Err(AppError::Chart("weekly bars are not a series".to_string()));
    };
    let svg = charts::render_weekly(&series, metric, &ChartOptions::weekly())
        .map_err(|e| AppError::Chart(e.to_string()))?;
    Ok(svg_response(svg))
}

fn attachment(content_type: &'static str, filename: &str, body: impl IntoResponse) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_activations_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, AppError> {
    let view = state.view_state(query)?;
    let dataset = state.dataset().await?;
    let Content::Table(table) = state.context(&dataset, &view).compute(Output::MainTable) else {
        return Err(AppError::Export("main table is not a table".to_string()));
    };
    Ok(attachment(
        "text/csv; charset=utf-8",
        "activations.csv",
        export::table_to_csv(&table),
    ))
}

async fn export_activations_xlsx(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, AppError> {
    let view = state.view_state(query)?;
    let dataset = state.dataset().await?;
    let Content::Table(table) = state.context(&dataset, &view).compute(Output::MainTable) else {
        return Err(AppError::Export("main table is not a table".to_string()));
    };
    let bytes = export::table_to_xlsx(&table).map_err(|e| AppError::Export(e.to_string()))?;
    Ok(attachment(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "activations.xlsx",
        bytes,
    ))
}

async fn export_bonus_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, AppError> {
    let view = state.view_state(query)?;
    let dataset = state.dataset().await?;
    let Content::Bonus(table) = state.context(&dataset, &view).compute(Output::BonusTable) else {
        return Err(AppError::Export("bonus table is not a table".to_string()));
    };
    let filename = format!(
        "bonus-{}.csv",
        table.quarter.as_deref().unwrap_or("none").replace(' ', "-")
    );
    Ok(attachment(
        "text/csv; charset=utf-8",
        &filename,
        export::bonus_to_csv(&table, state.developer_title()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures;
    use crate::google::GoogleApiError;
    use crate::source::StaticSource;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    // base64("demo:secret")
    const AUTH: &str = "Basic ZGVtbzpzZWNyZXQ=";
    const RANGE: &str = "start=2020-06-01&end=2020-09-30";

    fn values() -> Vec<Vec<String>> {
        vec![
            fixtures::header(),
            fixtures::row("Ana", "7/1/2020", "Demo", "Mountain", &[(10, "40")]),
            fixtures::row("Ben", "7/9/2020", "Clinic", "Road", &[(13, "5")]),
            fixtures::row("Ana", "10/2/2020", "Demo", "Road", &[(10, "10")]),
        ]
    }

    fn config(refresh: &str) -> Config {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SHEET_SNAPSHOT", "unused.json"),
            ("VALID_USERNAME_PASSWORD_PAIRS", "secret"),
            ("DATA_REFRESH", refresh),
        ]);
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap()
    }

    fn app_with(source: Box<dyn SheetSource>) -> Router {
        router(Arc::new(AppState::new(config("startup"), source).unwrap()))
    }

    fn app() -> Router {
        app_with(Box::new(StaticSource(values())))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, AUTH)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    struct CountingSource(Arc<AtomicUsize>);

    #[async_trait]
    impl SheetSource for CountingSource {
        async fn fetch(&self) -> Result<Vec<Vec<String>>, GoogleApiError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(values())
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[tokio::test]
    async fn test_requires_basic_auth() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers().get(header::WWW_AUTHENTICATE).unwrap();
        assert!(challenge.to_str().unwrap().starts_with("Basic realm="));

        // base64("demo:wrong")
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/export/bonus.csv")
                    .header(header::AUTHORIZATION, "Basic ZGVtbzp3cm9uZw==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dashboard_page() {
        let response = app().oneshot(get(&format!("/?{}", RANGE))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Bonus Tracker"));
        assert!(html.contains("2020 Q3"));
    }

    #[tokio::test]
    async fn test_bad_date_is_bad_request() {
        let response = app().oneshot(get("/?start=someday")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_update_returns_affected_outputs() {
        let mut view = ViewState::new(crate::aggregate::DateRange {
            start: chrono::NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
            end: chrono::NaiveDate::from_ymd_opt(2020, 9, 30).unwrap(),
        });
        view.developers = crate::aggregate::Selection::Only(vec!["Ben".to_string()]);
        let body = serde_json::json!({ "state": view, "changed": ["developers"] });

        let request = Request::builder()
            .method("POST")
            .uri("/api/update")
            .header(header::AUTHORIZATION, AUTH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let outputs = json["outputs"].as_array().unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0]["output"], "filtered_totals");
        assert_eq!(outputs[0]["content"]["value"]["staff_educated"], 5);
        assert_eq!(outputs[1]["output"], "filtered_map");
    }

    #[tokio::test]
    async fn test_api_output() {
        let response = app()
            .oneshot(get(&format!("/api/outputs/totals?{}", RANGE)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["kind"], "totals");
        assert_eq!(json["value"]["activations"], 2);
        assert_eq!(json["value"]["bob"], 40);

        let response = app().oneshot(get("/api/outputs/sidebar")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_weekly_chart() {
        let response = app().oneshot(get("/charts/weekly/revenue.svg")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_exports() {
        let response = app()
            .oneshot(get(&format!("/export/bonus.csv?{}&quarter=2020%20Q4", RANGE)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers().get(header::CONTENT_DISPOSITION).unwrap();
        assert_eq!(disposition, "attachment; filename=\"bonus-2020-Q4.csv\"");
        let csv = body_text(response).await;
        assert_eq!(
            csv,
            "Brand Developer,Total B.O.B.,Total Activations,Total Clinics,Trail Building Days\nAna,10,1,0,0\n"
        );

        let response = app()
            .oneshot(get(&format!("/export/activations.csv?{}", RANGE)))
            .await
            .unwrap();
        let csv = body_text(response).await;
        // header plus the two rows inside the range
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.starts_with("Timestamp,Brand Developer,"));

        let response = app()
            .oneshot(get(&format!("/export/activations.xlsx?{}", RANGE)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_reports_rows() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/refresh")
            .header(header::AUTHORIZATION, AUTH)
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"rows":3}"#);
    }

    #[tokio::test]
    async fn test_empty_sheet_is_unavailable() {
        let response = app_with(Box::new(StaticSource(vec![])))
            .oneshot(get("/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "No data found.");
    }

    #[tokio::test]
    async fn test_refresh_policies() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let cached = AppState::new(config("startup"), Box::new(CountingSource(fetches.clone()))).unwrap();
        cached.dataset().await.unwrap();
        cached.dataset().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        cached.refresh().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        let fetches = Arc::new(AtomicUsize::new(0));
        let live = AppState::new(config("request"), Box::new(CountingSource(fetches.clone()))).unwrap();
        live.dataset().await.unwrap();
        live.dataset().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
