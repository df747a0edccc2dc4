//! HTTP route handlers for the agent API.

use std::panic::{catch_unwind, AssertUnwindSafe};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use healer::config::resolve_github_token;
use healer::io::command;
use healer::io::git::parse_owner_repo;
use healer::io::github::GitHubClient;
use healer::pipeline::run_pipeline;
use healer::registry::{Registry, RegistryObserver, RunRecord};
use healer::state::{RunMode, RunState};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/run", post(start_run))
        .route("/run/{run_id}", get(get_run))
}

async fn health() -> &'static str {
    "ok"
}

/// POST /api/run request body. Field aliases accept both naming styles
/// callers use in the wild.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    #[serde(alias = "repository_url")]
    pub repo_url: String,
    pub team_name: String,
    #[serde(alias = "team_leader_name")]
    pub team_leader: String,
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(default)]
    pub authorize_write: bool,
    pub github_token: Option<String>,
    pub max_iterations: Option<u32>,
}

fn default_mode() -> RunMode {
    RunMode::RunAgent
}

#[derive(Debug, Serialize)]
struct StartRunResponse {
    run_id: String,
    final_status: &'static str,
}

type ApiError = (StatusCode, Json<Value>);

fn reject(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

/// Accept only plain GitHub repository URLs.
pub fn valid_repo_url(url: &str) -> bool {
    let pattern =
        Regex::new(r"^https://github\.com/[\w.-]+/[\w.-]+/?$").expect("pattern is valid");
    pattern.is_match(url)
}

/// POST /api/run - validate the request, register a record, and hand the
/// run to a detached worker thread. Every rejection happens before any run
/// record exists.
async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    if request.team_name.trim().is_empty() || request.team_leader.trim().is_empty() {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "team_name and team_leader are required",
        ));
    }
    if !valid_repo_url(&request.repo_url) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "repo_url must match https://github.com/<owner>/<repo>",
        ));
    }
    if request.max_iterations == Some(0) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "max_iterations must be positive",
        ));
    }

    let probe_url = request.repo_url.clone();
    let probe_timeout = state.config.probe_timeout();
    let reachable = tokio::task::spawn_blocking(move || {
        command::run(
            &format!("git ls-remote --heads {probe_url}"),
            &std::env::temp_dir(),
            probe_timeout,
        )
        .success()
    })
    .await
    .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "probe task failed"))?;
    if !reachable {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "repository is not reachable",
        ));
    }

    let token = resolve_github_token(request.github_token.as_deref());
    if !request.mode.is_read_only() {
        check_write_access(&request, token.as_deref()).await?;
    }

    let run_id = Registry::new_run_id();
    let mut run_state = RunState::new(
        &request.repo_url,
        &request.team_name,
        &request.team_leader,
        request.max_iterations.unwrap_or(state.config.max_iterations),
        request.mode.is_read_only(),
        if request.mode.is_read_only() {
            None
        } else {
            token
        },
    );

    state
        .registry
        .register(&run_id, request.mode.as_str(), &run_state);
    info!(run_id = %run_id, repo = %request.repo_url, mode = request.mode.as_str(), "run accepted");

    let registry = state.registry.clone();
    let config = state.config.clone();
    let worker_id = run_id.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("run-{run_id}"))
        .spawn(move || {
            let mut observer = RegistryObserver::new(registry.clone(), &worker_id);
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                run_pipeline(&mut run_state, &config, &mut observer)
            }));
            match outcome {
                Ok(document) => registry.attach_results(&worker_id, document),
                Err(_) => {
                    error!(run_id = %worker_id, "worker panicked");
                    registry.mark_crashed(&worker_id);
                }
            }
        });
    if let Err(err) = spawned {
        warn!(err = %err, "could not spawn worker thread");
        state.registry.mark_crashed(&run_id);
        return Err(reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "could not start run worker",
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id,
            final_status: "RUNNING",
        }),
    ))
}

/// Write mode needs explicit authorization, a token, and verified push
/// permission on the target repository.
async fn check_write_access(
    request: &StartRunRequest,
    token: Option<&str>,
) -> Result<(), ApiError> {
    if !request.authorize_write {
        return Err(reject(
            StatusCode::FORBIDDEN,
            "write mode requires authorize_write",
        ));
    }
    let Some(token) = token else {
        return Err(reject(
            StatusCode::UNAUTHORIZED,
            "write mode requires a github token",
        ));
    };
    let Some((owner, repo)) = parse_owner_repo(&request.repo_url) else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "cannot parse owner/repo from repo_url",
        ));
    };

    let token = token.to_string();
    let permitted = tokio::task::spawn_blocking(move || {
        let client = GitHubClient::new(&token)?;
        client.has_write_permission(&owner, &repo)
    })
    .await
    .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "permission task failed"))?;

    match permitted {
        Ok(true) => Ok(()),
        Ok(false) => Err(reject(
            StatusCode::FORBIDDEN,
            "token lacks write permission on the repository",
        )),
        Err(err) => {
            warn!(err = %err, "permission check failed");
            Err(reject(
                StatusCode::FORBIDDEN,
                "could not verify write permission",
            ))
        }
    }
}

/// GET /api/run/{run_id} - last-written registry snapshot.
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    state
        .registry
        .snapshot(&run_id)
        .map(Json)
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "unknown run id"))
}
