//! HTTP transport for the request pipeline.
//!
//! axum owns the listener; every request is collected into a
//! [`ThemeRequest`] and answered by [`Pipeline::handle`]. With a TLS acceptor
//! connections are accepted here and served by hyper directly.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::convert::Infallible;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::dev::pipeline::{Pipeline, ResponseBody, ThemeRequest, ThemeResponse};
use crate::error::{CliError, Result, StartupError};

/// Largest request body forwarded to the storefront.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(pipeline)
}

async fn handle_request(State(pipeline): State<Arc<Pipeline>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response(),
    };

    let request = ThemeRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };
    into_response(pipeline.handle(request).await)
}

fn into_response(response: ThemeResponse) -> Response {
    match response.body {
        ResponseBody::Full(bytes) => {
            let mut out = Response::new(Body::from(bytes));
            *out.status_mut() = response.status;
            *out.headers_mut() = response.headers;
            out
        }
        ResponseBody::Events(stream) => {
            let events = stream.map(|data| Ok::<_, Infallible>(Event::default().data(data)));
            let mut out = Sse::new(events)
                .keep_alive(
                    KeepAlive::new()
                        .interval(Duration::from_secs(15))
                        .text("ping"),
                )
                .into_response();
            out.headers_mut().extend(response.headers);
            out
        }
    }
}

/// Bind the listening socket, classifying failures for the user.
pub async fn bind(host: &str, port: u16) -> std::result::Result<TcpListener, StartupError> {
    let address = format!("{host}:{port}");
    TcpListener::bind(&address).await.map_err(|err| {
        tracing::debug!(%address, "bind failed: {}", err);
        match err.kind() {
            ErrorKind::AddrInUse => StartupError::AddressInUse { address },
            _ => StartupError::AddressNotBindable {
                host: host.to_string(),
            },
        }
    })
}

/// Serve until `cancel` fires. Open connections are shut down gracefully.
pub async fn serve(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    router: Router,
    cancel: CancellationToken,
) -> Result<()> {
    match tls {
        None => axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| CliError::Server(format!("Server error: {}", e))),
        Some(acceptor) => {
            serve_tls(listener, acceptor, router, cancel).await;
            Ok(())
        }
    }
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    cancel: CancellationToken,
) {
    let service = TowerToHyperService::new(router);

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    tracing::warn!("accept failed: {}", err);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::debug!("TLS handshake failed: {}", err);
                    return;
                }
            };

            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);
            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = cancel.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(err) = result {
                tracing::debug!("connection error: {}", err);
            }
        });
    }
}
