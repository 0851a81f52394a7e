//! Git smart-HTTP host for the provisioned repositories.
//!
//! Serves `<prefix>/<module>/info/refs`, `<prefix>/<module>/git-upload-pack`
//! and `<prefix>/<module>/git-receive-pack` by running
//! `git <service> --stateless-rpc` against `<base>/repositories/<module>`.
//! Module names span several path segments, so routing is a single wildcard.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use axum::body::{Body, Bytes};
use axum::extract::{Path as AxumPath, Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dibs_core::ModuleName;
use flate2::read::GzDecoder;
use http_body_util::BodyExt;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{io_err, DaemonError};
use crate::paths;

const UPLOAD_PACK: &str = "git-upload-pack";
const RECEIVE_PACK: &str = "git-receive-pack";

#[derive(Debug, Clone)]
struct GitHostState {
    base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

/// Request-level failure, rendered as a plain-text status response.
#[derive(Debug)]
enum GitHostError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for GitHostError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            GitHostError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            GitHostError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            GitHostError::Internal(m) => {
                tracing::error!(error = %m, "git host request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, message).into_response()
    }
}

/// What a wildcard path under the prefix addresses.
#[derive(Debug, PartialEq, Eq)]
enum GitRoute {
    InfoRefs(String),
    Service { module: String, service: &'static str },
}

fn parse_route(rest: &str) -> Option<GitRoute> {
    let rest = rest.trim_start_matches('/');
    if let Some(module) = rest.strip_suffix("/info/refs") {
        return Some(GitRoute::InfoRefs(module.to_owned()));
    }
    [UPLOAD_PACK, RECEIVE_PACK].into_iter().find_map(|service| {
        rest.strip_suffix(service)
            .and_then(|m| m.strip_suffix('/'))
            .map(|module| GitRoute::Service {
                module: module.to_owned(),
                service,
            })
    })
}

/// Router serving every repository below `<base_dir>/repositories`.
pub fn router(base_dir: &Path, path_prefix: &str) -> Router {
    let prefix = path_prefix.trim_end_matches('/');
    let prefix = if prefix.is_empty() || prefix.starts_with('/') {
        prefix.to_owned()
    } else {
        format!("/{prefix}")
    };

    Router::new()
        .route(
            &format!("{prefix}/{{*rest}}"),
            get(info_refs).post(service_rpc),
        )
        .with_state(GitHostState {
            base_dir: base_dir.to_path_buf(),
        })
}

/// Bind the listener. Failure is a setup error.
pub async fn bind(addr: &str) -> Result<TcpListener, DaemonError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind {
            addr: addr.to_owned(),
            source,
        })
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    base_dir: &Path,
    path_prefix: &str,
    shutdown: CancellationToken,
) -> Result<(), DaemonError> {
    let local = listener
        .local_addr()
        .map_err(|e| io_err("git host listener", e))?;
    tracing::info!(addr = %local, prefix = path_prefix, "git host listening");

    axum::serve(listener, router(base_dir, path_prefix))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| io_err("git host", e))
}

fn resolve_repository(state: &GitHostState, module: &str) -> Result<PathBuf, GitHostError> {
    let name = ModuleName::parse(module).map_err(|e| GitHostError::BadRequest(e.to_string()))?;
    let path = paths::repository_path(&state.base_dir, &name);
    if !path.is_dir() {
        return Err(GitHostError::NotFound(format!("no repository for module {name}")));
    }
    Ok(path)
}

/// `GET <prefix>/<module>/info/refs?service=git-upload-pack|git-receive-pack`
async fn info_refs(
    State(state): State<GitHostState>,
    AxumPath(rest): AxumPath<String>,
    Query(query): Query<InfoRefsQuery>,
) -> Result<Response, GitHostError> {
    let Some(GitRoute::InfoRefs(module)) = parse_route(&rest) else {
        return Err(GitHostError::NotFound(format!("no such endpoint: {rest}")));
    };
    let service = match query.service.as_deref() {
        Some(UPLOAD_PACK) => UPLOAD_PACK,
        Some(RECEIVE_PACK) => RECEIVE_PACK,
        Some(other) => return Err(GitHostError::BadRequest(format!("unknown service {other}"))),
        None => {
            return Err(GitHostError::BadRequest(
                "service query parameter required".to_owned(),
            ))
        }
    };
    let repo = resolve_repository(&state, &module)?;

    let output = tokio::process::Command::new("git")
        .arg(service_command(service))
        .arg("--stateless-rpc")
        .arg("--advertise-refs")
        .arg(&repo)
        .output()
        .await
        .map_err(|e| GitHostError::Internal(format!("failed to spawn git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitHostError::Internal(format!("git {service} failed: {stderr}")));
    }

    let mut body = pkt_line_header(service);
    body.extend_from_slice(&output.stdout);
    Ok(git_response(
        format!("application/x-{service}-advertisement"),
        body,
    ))
}

/// `POST <prefix>/<module>/git-upload-pack|git-receive-pack`
async fn service_rpc(
    State(state): State<GitHostState>,
    AxumPath(rest): AxumPath<String>,
    request: Request,
) -> Result<Response, GitHostError> {
    let Some(GitRoute::Service { module, service }) = parse_route(&rest) else {
        return Err(GitHostError::NotFound(format!("no such endpoint: {rest}")));
    };
    let repo = resolve_repository(&state, &module)?;

    let gzipped = request
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    let body = request
        .into_body()
        .collect()
        .await
        .map_err(|e| GitHostError::BadRequest(format!("body read failed: {e}")))?
        .to_bytes();
    let input = if gzipped { inflate(&body)? } else { body };

    let output = run_service(&repo, service, &input).await?;
    if service == RECEIVE_PACK {
        tracing::info!(module = %module, "push received");
    }
    Ok(git_response(format!("application/x-{service}-result"), output))
}

async fn run_service(repo: &Path, service: &str, input: &[u8]) -> Result<Vec<u8>, GitHostError> {
    let internal = |what: &str, e: std::io::Error| GitHostError::Internal(format!("{what}: {e}"));

    let mut child = tokio::process::Command::new("git")
        .arg(service_command(service))
        .arg("--stateless-rpc")
        .arg(repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| internal("failed to spawn git", e))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| GitHostError::Internal("git stdin not piped".to_owned()))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| GitHostError::Internal("git stdout not piped".to_owned()))?;

    let (written, read) = tokio::join!(
        // Owning stdin closes the pipe once the body is written.
        async move {
            stdin.write_all(input).await?;
            stdin.shutdown().await
        },
        async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        }
    );
    written.map_err(|e| internal("git stdin", e))?;
    let output = read.map_err(|e| internal("git stdout", e))?;

    let status = child.wait().await.map_err(|e| internal("git wait", e))?;
    if !status.success() {
        return Err(GitHostError::Internal(format!("git {service} exited with {status}")));
    }
    Ok(output)
}

/// `git-upload-pack` → `upload-pack`, the subcommand git expects.
fn service_command(service: &str) -> &str {
    service.strip_prefix("git-").unwrap_or(service)
}

fn inflate(body: &[u8]) -> Result<Bytes, GitHostError> {
    let mut out = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|e| GitHostError::BadRequest(format!("invalid gzip body: {e}")))?;
    Ok(Bytes::from(out))
}

fn git_response(content_type: String, body: impl Into<Body>) -> Response {
    (
        [(CONTENT_TYPE, content_type), (CACHE_CONTROL, "no-cache".to_owned())],
        body.into(),
    )
        .into_response()
}

/// pkt-line service announcement preceding the ref advertisement.
fn pkt_line_header(service: &str) -> Vec<u8> {
    let announcement = format!("# service={service}\n");
    let pkt_len = announcement.len() + 4;
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("{pkt_len:04x}").as_bytes());
    buf.extend_from_slice(announcement.as_bytes());
    buf.extend_from_slice(b"0000");
    buf
}
