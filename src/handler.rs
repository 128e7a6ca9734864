//! REST adapter mapping `/api/programs` routes onto [`ProgramStore`] calls.
//!
//! Store work runs on the blocking pool. Missing programs become 404, any
//! other storage failure becomes 500 with a generic message and the error
//! text.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt::Display;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ALLOW, CONTENT_TYPE, HeaderValue,
};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::server::ServerState;
use crate::storage::{ProgramStore, StorageError};
use crate::types::{ProgramDraft, ProgramPatch};

pub type HttpResponse = Response<Full<Bytes>>;

const PROGRAMS_PATH: &str = "/api/programs";
const HEALTH_PATH: &str = "/api/health";
const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// Largest request body accepted for create/update.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ErrorBody {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    fn with_error(message: impl Into<String>, error: impl Display) -> Self {
        Self {
            message: message.into(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Programs,
    Program(&'a str),
    Health,
    Unknown,
}

impl<'a> Route<'a> {
    fn resolve(path: &'a str) -> Self {
        let path = path.trim_end_matches('/');
        if path == PROGRAMS_PATH {
            return Route::Programs;
        }
        if path == HEALTH_PATH {
            return Route::Health;
        }
        match path
            .strip_prefix(PROGRAMS_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(id) if !id.is_empty() && !id.contains('/') => Route::Program(id),
            _ => Route::Unknown,
        }
    }

    fn allow(&self) -> &'static str {
        match self {
            Route::Programs => "GET, POST, OPTIONS",
            Route::Program(_) => "GET, PUT, DELETE, OPTIONS",
            Route::Health => "GET, OPTIONS",
            Route::Unknown => "",
        }
    }
}

/// Entry point for every HTTP request.
pub async fn handle<B>(req: Request<B>, state: Arc<ServerState>) -> Result<HttpResponse, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = Route::resolve(&path);

    let response = match (&method, &route) {
        (_, Route::Unknown) => json_response(
            StatusCode::NOT_FOUND,
            &ErrorBody::message("Route not found"),
        ),
        (&Method::OPTIONS, _) => preflight(route.allow()),
        (&Method::GET, Route::Health) => health(&state).await,
        (&Method::GET, Route::Programs) => list_programs(&state).await,
        (&Method::POST, Route::Programs) => match read_json::<ProgramDraft, B>(req).await {
            Ok(draft) => create_program(&state, draft).await,
            Err(rejection) => rejection,
        },
        (&Method::GET, Route::Program(id)) => get_program(&state, id).await,
        (&Method::PUT, Route::Program(id)) => match read_json::<ProgramPatch, B>(req).await {
            Ok(patch) => update_program(&state, id, patch).await,
            Err(rejection) => rejection,
        },
        (&Method::DELETE, Route::Program(id)) => delete_program(&state, id).await,
        _ => method_not_allowed(route.allow()),
    };

    tracing::debug!(%method, %path, status = response.status().as_u16(), "handled request");
    Ok(with_cors(response))
}

async fn list_programs(state: &Arc<ServerState>) -> HttpResponse {
    match with_store(state, |store| Ok(store.list())).await {
        Ok(programs) => json_response(StatusCode::OK, &programs),
        Err(err) => storage_failure(err, "Error fetching programs", false),
    }
}

async fn get_program(state: &Arc<ServerState>, id: &str) -> HttpResponse {
    let id = id.to_string();
    match with_store(state, move |store| store.get(&id)).await {
        Ok(program) => json_response(StatusCode::OK, &program),
        Err(err) => storage_failure(err, "Error fetching program", false),
    }
}

async fn create_program(state: &Arc<ServerState>, draft: ProgramDraft) -> HttpResponse {
    match with_store(state, move |store| store.create(draft)).await {
        Ok(program) => json_response(StatusCode::CREATED, &program),
        Err(err) => storage_failure(err, "Error creating program", true),
    }
}

async fn update_program(state: &Arc<ServerState>, id: &str, patch: ProgramPatch) -> HttpResponse {
    let id = id.to_string();
    match with_store(state, move |store| store.update(&id, patch)).await {
        Ok(program) => json_response(StatusCode::OK, &program),
        Err(err) => storage_failure(err, "Error updating program", true),
    }
}

async fn delete_program(state: &Arc<ServerState>, id: &str) -> HttpResponse {
    let id = id.to_string();
    match with_store(state, move |store| store.delete(&id)).await {
        Ok(()) => json_response(
            StatusCode::OK,
            &ErrorBody::message("Program deleted successfully"),
        ),
        Err(err) => storage_failure(err, "Error deleting program", false),
    }
}

async fn health(state: &Arc<ServerState>) -> HttpResponse {
    let programs = match with_store(state, |store| Ok(store.list().len())).await {
        Ok(count) => count,
        Err(err) => return storage_failure(err, "Error reading program store", false),
    };
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "name": state.name,
            "version": state.version,
            "uptimeSeconds": state.uptime().as_secs(),
            "programs": programs,
        }),
    )
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(state: &Arc<ServerState>, f: F) -> Result<T, StorageError>
where
    F: FnOnce(&ProgramStore) -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| {
            StorageError::Io(std::io::Error::other(format!(
                "spawn_blocking failed: {}",
                e
            )))
        })?
}

/// Parse the request body, capped at [`MAX_BODY_BYTES`]. An empty body
/// counts as `{}`.
async fn read_json<T, B>(req: Request<B>) -> Result<T, HttpResponse>
where
    T: DeserializeOwned + Default,
    B: Body,
    B::Error: Into<BoxError>,
{
    let bytes = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            tracing::warn!(limit = MAX_BODY_BYTES, "rejected oversized request body");
            return Err(json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &ErrorBody::message(format!(
                    "Request body exceeds {MAX_BODY_BYTES} bytes"
                )),
            ));
        }
        Err(err) => {
            return Err(json_response(
                StatusCode::BAD_REQUEST,
                &ErrorBody::with_error("Could not read request body", err),
            ));
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|err| {
        json_response(
            StatusCode::BAD_REQUEST,
            &ErrorBody::with_error("Invalid program payload", err),
        )
    })
}

fn storage_failure(err: StorageError, context: &str, expose_error: bool) -> HttpResponse {
    if err.is_not_found() {
        return json_response(
            StatusCode::NOT_FOUND,
            &ErrorBody::message("Program not found"),
        );
    }
    tracing::error!(error = %err, "{context}");
    let body = if expose_error {
        ErrorBody::with_error(context, &err)
    } else {
        ErrorBody::message(context)
    };
    json_response(StatusCode::INTERNAL_SERVER_ERROR, &body)
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> HttpResponse {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, Bytes::from(bytes)),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize response body");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(br#"{"message":"Internal server error"}"#),
            )
        }
    };
    let mut response = Response::new(Full::new(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn preflight(allow: &'static str) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}

fn method_not_allowed(allow: &'static str) -> HttpResponse {
    let mut response = json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorBody::message("Method not allowed"),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}

fn with_cors(mut response: HttpResponse) -> HttpResponse {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}
