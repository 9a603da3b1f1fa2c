//! Administrative HTTP API.
//!
//! Routes, relative to the configured base path:
//!
//! | method  | path               | action                                   |
//! |---------|--------------------|------------------------------------------|
//! | `GET`   | `/metrics`         | Prometheus exposition of all metrics     |
//! | `GET`   | `/loggen`          | scheduler state and pending requests     |
//! | `POST`  | `/loggen`          | enqueue `{type, format, count, framed}`  |
//! | `GET`   | `/loggen/formats`  | type to format names                     |
//! | `PATCH` | `/loggen/streams`  | `{"<stream>": bool}` stream toggles      |
//! | `GET`   | `/golang`          | level weights of structured app logs     |
//! | `PATCH` | `/golang`          | merge new level weights                  |
//!
//! Client errors are answered with status 400 and `{"error": "<message>"}`.

use std::{collections::BTreeMap, convert::Infallible, fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full, Limited};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use loggen_payload::LevelWeightsPatch;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{control::Control, queue};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Admin`].
pub enum Error {
    /// The listen address could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Listen address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
}

/// Bind the admin listener.
///
/// # Errors
///
/// Fails if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    TcpListener::bind(addr).await.map_err(|source| Error::Bind {
        addr,
        source: Box::new(source),
    })
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// The administrative API.
pub struct Admin {
    control: Arc<Control>,
    prometheus: Option<PrometheusHandle>,
    base: String,
}

impl fmt::Debug for Admin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admin")
            .field("control", &self.control)
            .field("prometheus", &self.prometheus.is_some())
            .field("base", &self.base)
            .finish()
    }
}

impl Admin {
    /// Create a new [`Admin`]. Without a `prometheus` handle `/metrics` is
    /// not served.
    #[must_use]
    pub fn new(control: Arc<Control>, prometheus: Option<PrometheusHandle>, base_path: &str) -> Self {
        Self {
            control,
            prometheus,
            base: base_path.trim_end_matches('/').to_string(),
        }
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let mut join_set = JoinSet::new();
        match listener.local_addr() {
            Ok(addr) => info!(%addr, base = %self.base, "admin api listening"),
            Err(err) => warn!("admin api listening on unknown address: {err}"),
        }
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping accept loop.");
                    break;
                }

                incoming = listener.accept() => {
                    let (stream, addr) = match incoming {
                        Ok(sa) => sa,
                        Err(e) => {
                            error!("Error accepting connection: {e}");
                            continue;
                        }
                    };
                    debug!("Accepted connection from {addr}");

                    let admin = Arc::clone(&self);
                    join_set.spawn(async move {
                        let service = service_fn(move |req| {
                            let admin = Arc::clone(&admin);
                            async move { admin.handle(req).await }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            error!("Error serving {addr}: {e}");
                        }
                    });
                }
            }
        }

        drop(listener);
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                return Ok(reject(
                    &parts.method,
                    parts.uri.path(),
                    StatusCode::BAD_REQUEST,
                    &format!("unreadable body: {err}"),
                ));
            }
        };
        Ok(self.route(&parts.method, parts.uri.path(), &body))
    }

    /// Answer one request.
    pub(crate) fn route(&self, method: &Method, path: &str, body: &[u8]) -> Response<Full<Bytes>> {
        let Some(route) = path
            .strip_prefix(self.base.as_str())
            .filter(|route| route.starts_with('/'))
        else {
            return reject(method, path, StatusCode::NOT_FOUND, "not found");
        };
        let route = if route.len() > 1 {
            route.trim_end_matches('/')
        } else {
            route
        };

        match (method, route) {
            (&Method::GET, "/metrics") => match &self.prometheus {
                Some(handle) => text(handle.render()),
                None => reject(method, path, StatusCode::NOT_FOUND, "metrics disabled"),
            },
            (&Method::GET, "/loggen") => json(StatusCode::OK, &self.control.snapshot()),
            (&Method::POST, "/loggen") => match parse::<queue::Request>(body) {
                Ok(request) => match self.control.enqueue(request) {
                    Ok(request) => {
                        info!(kind = %request.kind, format = %request.format, count = request.count, "request enqueued");
                        json(StatusCode::OK, &request)
                    }
                    Err(err) => reject(method, path, StatusCode::BAD_REQUEST, &err.to_string()),
                },
                Err(msg) => reject(method, path, StatusCode::BAD_REQUEST, &msg),
            },
            (&Method::GET, "/loggen/formats") => {
                json(StatusCode::OK, &self.control.registry().list_formats())
            }
            (&Method::PATCH, "/loggen/streams") => match parse::<BTreeMap<String, bool>>(body) {
                Ok(toggles) => match self.control.set_streams(&toggles) {
                    Ok(streams) => json(StatusCode::OK, &streams),
                    Err(err) => reject(method, path, StatusCode::BAD_REQUEST, &err.to_string()),
                },
                Err(msg) => reject(method, path, StatusCode::BAD_REQUEST, &msg),
            },
            (&Method::GET, "/golang") => json(StatusCode::OK, &self.control.levels()),
            (&Method::PATCH, "/golang") => match parse::<LevelWeightsPatch>(body) {
                Ok(patch) => json(StatusCode::OK, &self.control.patch_levels(patch)),
                Err(msg) => reject(method, path, StatusCode::BAD_REQUEST, &msg),
            },
            (_, "/metrics" | "/loggen" | "/loggen/formats" | "/loggen/streams" | "/golang") => {
                reject(method, path, StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            }
            _ => reject(method, path, StatusCode::NOT_FOUND, "not found"),
        }
    }
}

fn reject(method: &Method, path: &str, status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    warn!(%method, path, status = status.as_u16(), "rejected request: {msg}");
    json(status, &ErrorBody { error: msg })
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    serde_json::from_slice(body).map_err(|err| format!("malformed request body: {err}"))
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(body: String) -> Response<Full<Bytes>> {
    respond(
        StatusCode::OK,
        "text/plain; version=0.0.4",
        Bytes::from(body),
    )
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", Bytes::from(body)),
        Err(err) => {
            error!("failed to serialize response: {err}");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                Bytes::from_static(br#"{"error":"serialization failed"}"#),
            )
        }
    }
}
