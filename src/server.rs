use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::error::CalcError;
use crate::history::HistoryStore;
use crate::model::{CalculationRecord, Operation};
use crate::service::CalculationService;
use crate::store::RecordStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

type Query = HashMap<String, String>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct Deleted {
    message: &'static str,
    deleted: Option<CalculationRecord>,
}

/// HTTP front of the calculator and its history.
#[derive(Clone)]
pub struct AbacusServer {
    service: CalculationService,
    history: HistoryStore,
}

impl AbacusServer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            service: CalculationService::new(store.clone()),
            history: HistoryStore::new(store),
        }
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        // Paths (including the operation name) are matched before methods, so an
        // unknown path is a 404 whatever the method.
        let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "healthy" })));

        let version = warp::path!("version")
        .and(warp::get())
        .map(|| {
            info!("Version endpoint accessed: {}", VERSION);
            warp::reply::json(&json!({ "version": VERSION }))
        });

        // GET /history?operation=
        let list = warp::path!("history")
        .and(warp::get())
        .and(warp::query::<Query>())
        .and(with_history(self.history.clone()))
        .and_then(handle_list);

        // GET /history/:id
        let get = warp::path!("history" / String)
        .and(warp::get())
        .and(with_history(self.history.clone()))
        .and_then(handle_get);

        // PUT /history/:id?num1=&num2=&operation=
        let update = warp::path!("history" / String)
        .and(warp::put())
        .and(warp::query::<Query>())
        .and(with_history(self.history.clone()))
        .and_then(handle_update);

        // DELETE /history/:id
        let delete = warp::path!("history" / String)
        .and(warp::delete())
        .and(with_history(self.history.clone()))
        .and_then(handle_delete);

        // GET /:operation?num1=&num2=
        let calculate = warp::path!(String)
        .and_then(known_operation)
        .and(warp::get())
        .and(warp::query::<Query>())
        .and(with_service(self.service.clone()))
        .and_then(handle_calculate);

        let log = warp::log::custom(|info: warp::log::Info<'_>| {
            info!(
                method = %info.method(),
                path = info.path(),
                status = info.status().as_u16(),
                remote = ?info.remote_addr(),
                elapsed_ms = info.elapsed().as_millis() as u64,
                "Request handled"
            );
        });

        health
        .or(version)
        .or(list)
        .or(get)
        .or(update)
        .or(delete)
        .or(calculate)
        .recover(handle_rejection)
        .with(log)
    }

    /// Binds `addr` and returns the bound address with the serving future,
    /// which completes once `shutdown` resolves.
    pub fn bind(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), warp::Error> {
        warp::serve(self.routes()).try_bind_with_graceful_shutdown(addr, shutdown)
    }

    /// Serves until `shutdown` resolves. Fails only if the address cannot be bound.
    pub async fn run(self, addr: SocketAddr, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<(), warp::Error> {
        let (bound, server) = self.bind(addr, shutdown)?;
        info!("Calculator microservice running on {}", bound);
        server.await;
        Ok(())
    }
}

fn with_service(service: CalculationService) -> impl Filter<Extract = (CalculationService,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

fn with_history(history: HistoryStore) -> impl Filter<Extract = (HistoryStore,), Error = Infallible> + Clone {
    warp::any().map(move || history.clone())
}

async fn known_operation(name: String) -> Result<Operation, Rejection> {
    Operation::resolve(&name).ok_or_else(warp::reject::not_found)
}

// --- HANDLERS ---

async fn handle_calculate(operation: Operation, query: Query, service: CalculationService) -> Result<Response, Rejection> {
    let num1 = query.get("num1").map(String::as_str);
    let num2 = query.get("num2").map(String::as_str);

    match service.compute(operation.name(), num1, num2).await {
        Ok(record) => Ok(json_reply(&json!({ "result": record.result }), StatusCode::OK)),
        Err(e) => {
            if e.is_client_error() {
                warn!(?num1, ?num2, "Error in /{}: {}", operation, e);
            }
            Ok(error_reply(&e, "Failed to save calculation"))
        }
    }
}

async fn handle_list(query: Query, history: HistoryStore) -> Result<Response, Rejection> {
    let filter = query.get("operation").map(String::as_str);
    match history.list(filter).await {
        Ok(records) => Ok(json_reply(&records, StatusCode::OK)),
        Err(e) => Ok(error_reply(&e, "Failed to fetch history")),
    }
}

async fn handle_get(id: String, history: HistoryStore) -> Result<Response, Rejection> {
    match history.get(&id).await {
        Ok(record) => Ok(json_reply(&record, StatusCode::OK)),
        Err(e) => Ok(error_reply(&e, "Failed to fetch calculation")),
    }
}

async fn handle_update(id: String, query: Query, history: HistoryStore) -> Result<Response, Rejection> {
    let operation = query.get("operation").map(String::as_str);
    let num1 = query.get("num1").map(String::as_str);
    let num2 = query.get("num2").map(String::as_str);

    match history.update(&id, operation, num1, num2).await {
        Ok(record) => Ok(json_reply(&record, StatusCode::OK)),
        Err(e) => {
            if e.is_client_error() {
                warn!("Error in /history/{}: {}", id, e);
            }
            Ok(error_reply(&e, "Failed to update calculation"))
        }
    }
}

async fn handle_delete(id: String, history: HistoryStore) -> Result<Response, Rejection> {
    let deleted = match history.delete(&id).await {
        Ok(record) => Some(record),
        // Deleting an absent id answers like a successful no-op.
        Err(CalcError::NotFound(_)) => {
            info!(%id, "Delete of unknown calculation");
            None
        }
        Err(e) => return Ok(error_reply(&e, "Failed to delete calculation")),
    };

    Ok(json_reply(&Deleted { message: "Calculation deleted", deleted }, StatusCode::OK))
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string")
    } else {
        error!(rejection = ?err, "Unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    };

    Ok(json_reply(&ErrorBody { error: message.to_string() }, status))
}

// --- REPLIES ---

fn status_for(err: &CalcError) -> StatusCode {
    match err {
        CalcError::NotFound(_) => StatusCode::NOT_FOUND,
        CalcError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

/// Client errors carry their own message; server errors get `server_message`
/// and the cause stays in the logs.
fn error_reply(err: &CalcError, server_message: &str) -> Response {
    let status = status_for(err);
    let error = if status.is_server_error() {
        server_message.to_string()
    } else {
        err.to_string()
    };
    json_reply(&ErrorBody { error }, status)
}
