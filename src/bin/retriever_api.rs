use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use lru::LruCache;
use moodboard::config::{init_tracing, DatabaseArgs, EncoderArgs};
use moodboard::model::ScoredImage;
use moodboard::rate_limit::SystemClock;
use moodboard::retrieval::DEFAULT_NUM_IMAGES;
use moodboard::{ImageFilter, Retriever, SlidingWindowLimiter};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(
    name = "moodboard-retriever",
    about = "HTTP API that turns a prompt into a moodboard of stored images"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "MOODBOARD_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Maximum images allowed per request.
    #[arg(long, default_value_t = 64)]
    max_num_images: usize,

    /// Max cached prompt embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// Max requests per rolling minute (0 disables rate limiting).
    #[arg(long, default_value_t = 120)]
    max_requests_per_minute: usize,

    #[command(flatten)]
    database: DatabaseArgs,

    #[command(flatten)]
    encoder: EncoderArgs,
}

#[derive(Clone)]
struct AppState {
    retriever: Retriever,
    max_num_images: usize,
    embedding_cache: Option<Arc<Mutex<LruCache<String, Vec<f32>>>>>,
    rate_limiter: Option<Arc<Mutex<SlidingWindowLimiter>>>,
}

#[derive(Debug, Deserialize)]
struct MoodboardRequest {
    prompt: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    num_images: Option<usize>,
}

#[derive(Debug, Serialize)]
struct MoodboardResponse {
    images: Vec<ScoredImage>,
    color_palette: Vec<String>,
    suggested_styles: Vec<String>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    num_images: usize,
    latency_ms: f64,
    model: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = ApiCli::parse();
    // The catalog drives its own runtime, so it is built before the server's.
    let encoder = cli.encoder.build()?;
    let catalog = cli.database.connect_existing(cli.encoder.encoder_dimensions)?;
    let retriever = Retriever::new(Arc::new(catalog), Arc::new(encoder));
    let state = AppState {
        retriever,
        max_num_images: cli.max_num_images.max(1),
        embedding_cache: build_cache(cli.embedding_cache_size),
        rate_limiter: build_rate_limiter(cli.max_requests_per_minute),
    };
    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(serve(addr, state))
}

async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);
    println!("moodboard-retriever listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/moodboard", post(moodboard_handler))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn moodboard_handler(
    State(state): State<AppState>,
    Json(request): Json<MoodboardRequest>,
) -> Result<Json<MoodboardResponse>, (StatusCode, Json<ErrorBody>)> {
    if request.prompt.trim().is_empty() {
        return Err(bad_request("prompt is required"));
    }
    if let Some(limiter) = &state.rate_limiter {
        if let Err(wait) = limiter.lock().await.try_acquire() {
            return Err(too_many_requests(format!(
                "rate limit exceeded, retry in {}s",
                wait.as_secs().max(1)
            )));
        }
    }
    let num_images = request
        .num_images
        .unwrap_or(DEFAULT_NUM_IMAGES)
        .clamp(1, state.max_num_images);
    let filter = ImageFilter::new(request.domain.as_deref(), request.subcategory.as_deref());
    let start = Instant::now();

    let embedding = embed_prompt(&state, request.prompt.trim().to_string())
        .await
        .map_err(internal_error)?;
    let retriever = state.retriever.clone();
    let board = tokio::task::spawn_blocking(move || {
        retriever.moodboard_for_vector(&embedding, &filter, num_images)
    })
    .await
    .map_err(|err| internal_error(anyhow!("retrieval task join error: {err}")))?
    .map_err(internal_error)?;

    let response = MoodboardResponse {
        meta: ResponseMeta {
            num_images: board.images.len(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            model: state.retriever.model_id().to_string(),
        },
        images: board.images,
        color_palette: board.color_palette,
        suggested_styles: board.suggested_styles,
    };
    Ok(Json(response))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!("moodboard request failed: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

fn too_many_requests(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

async fn embed_prompt(state: &AppState, prompt: String) -> Result<Vec<f32>> {
    if let Some(cache) = &state.embedding_cache {
        if let Some(hit) = {
            let mut guard = cache.lock().await;
            guard.get(&prompt).cloned()
        } {
            return Ok(hit);
        }
    }

    let retriever = state.retriever.clone();
    let prompt_clone = prompt.clone();
    let embedding = tokio::task::spawn_blocking(move || retriever.embed_prompt(&prompt_clone))
        .await
        .map_err(|err| anyhow!("embedding task join error: {err}"))??;

    if let Some(cache) = &state.embedding_cache {
        let mut guard = cache.lock().await;
        guard.put(prompt, embedding.clone());
    }
    Ok(embedding)
}

fn build_cache(size: usize) -> Option<Arc<Mutex<LruCache<String, Vec<f32>>>>> {
    NonZeroUsize::new(size).map(|capacity| Arc::new(Mutex::new(LruCache::new(capacity))))
}

fn build_rate_limiter(max_per_minute: usize) -> Option<Arc<Mutex<SlidingWindowLimiter>>> {
    if max_per_minute == 0 {
        return None;
    }
    Some(Arc::new(Mutex::new(SlidingWindowLimiter::with_clock(
        max_per_minute,
        RATE_WINDOW,
        SystemClock::new(),
    ))))
}
