//! HTTP retrieval service
//!
//! Routes:
//! - `GET /measurements` (or `/measurements/`) - everything, or one page when
//!   `size > 0` (`?page=N&size=M`)
//! - `GET /measurements/first`, `GET /measurements/last` - positional lookups
//! - `GET /measurements/{id}` - lookup by measurement id
//! - anything else under `/measurements/` - 400
//!
//! Bodies are `{"Data": ...}` with `Data` omitted when there is nothing to return,
//! including an empty cache or a page past the end.
//! Bad parameters answer 400, a key without data answers 404, anything else 500.

use crate::actors::{PageRequest, PagerActor};
use crate::error::{MeterError, MeterResult};
use crate::measurement::Measurement;
use crate::repository::{Key, MeasurementRepository};
use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared state of the handlers.
type SharedRepository = Arc<dyn MeasurementRepository>;

/// Response envelope.
#[derive(Debug, Serialize)]
pub struct MeasurementsResponse {
    /// One measurement or a sequence of them
    #[serde(rename = "Data", skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

/// Body of [`MeasurementsResponse`].
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Single measurement
    One(Arc<Measurement>),
    /// Sequence of measurements
    Many(Vec<Arc<Measurement>>),
}

impl MeasurementsResponse {
    fn one(measurement: Arc<Measurement>) -> Self {
        Self {
            data: Some(Payload::One(measurement)),
        }
    }

    fn many(measurements: Vec<Arc<Measurement>>) -> Self {
        Self {
            data: Some(Payload::Many(measurements)),
        }
    }

    fn empty() -> Self {
        Self { data: None }
    }
}

/// Raw pagination query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    page: Option<String>,
    size: Option<String>,
}

/// Error mapped to an HTTP status.
struct ApiError(MeterError);

impl From<MeterError> for ApiError {
    fn from(err: MeterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            MeterError::BadParameter(msg) => {
                warn!(%msg, "Rejected measurements request");
                (StatusCode::BAD_REQUEST, format!("bad request: {msg}")).into_response()
            }
            MeterError::NotFound(msg) => {
                debug!(%msg, "Measurement not found");
                (StatusCode::NOT_FOUND, Json(MeasurementsResponse::empty())).into_response()
            }
            other => {
                error!(error = %other, "Measurements request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("internal error: {other}"),
                )
                    .into_response()
            }
        }
    }
}

/// Build the measurements router over a shared repository.
pub fn router(repo: SharedRepository) -> Router {
    Router::new()
        .route("/measurements", get(list_measurements))
        .route("/measurements/", get(list_measurements))
        .route("/measurements/{key}", get(get_measurement))
        .fallback(unmatched)
        .with_state(repo)
}

/// Paths under `/measurements/` that name no key are bad requests, not missing data.
async fn unmatched(uri: Uri) -> Response {
    if uri.path().starts_with("/measurements/") {
        ApiError(MeterError::BadParameter(format!(
            "unsupported measurements path '{}'",
            uri.path()
        )))
        .into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn list_measurements(
    State(repo): State<SharedRepository>,
    Query(params): Query<PageParams>,
) -> Result<Json<MeasurementsResponse>, ApiError> {
    let request = PageRequest::from_params(params.page.as_deref(), params.size.as_deref())?;
    debug!(page = request.page(), size = request.size(), "Serving measurements");

    let measurements = PagerActor::new(repo).fetch_page(&request).await?;
    if measurements.is_empty() {
        return Ok(Json(MeasurementsResponse::empty()));
    }
    Ok(Json(MeasurementsResponse::many(measurements)))
}

async fn get_measurement(
    State(repo): State<SharedRepository>,
    Path(key): Path<String>,
) -> Result<Json<MeasurementsResponse>, ApiError> {
    let key: Key = key.parse()?;
    debug!(%key, "Serving single measurement");

    match PagerActor::new(repo).get(key).await? {
        Some(measurement) => Ok(Json(MeasurementsResponse::one(measurement))),
        None => Err(MeterError::NotFound(format!("no measurement for key '{key}'")).into()),
    }
}

/// HTTP server bound to a listening socket.
pub struct HttpService {
    listener: TcpListener,
    router: Router,
}

impl HttpService {
    /// Bind the service to `address`.
    pub async fn bind(address: SocketAddr, repo: SharedRepository) -> MeterResult<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            MeterError::Configuration(format!("failed to bind {address}: {e}"))
        })?;
        Ok(Self {
            listener,
            router: router(repo),
        })
    }

    /// Address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> MeterResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until `shutdown` completes, then drain in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> MeterResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(address = %self.local_addr()?, "Retrieval service listening");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Retrieval service stopped");
        Ok(())
    }
}
