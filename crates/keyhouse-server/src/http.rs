//! HTTP Endpoints
//!
//! The axum surface for the three transports, mirroring the gRPC service:
//!
//! - `PUT  /v2/getvalues`: plaintext JSON
//! - `POST /v2/bhttp_getvalues`: Binary HTTP framed body
//! - `POST /v2/oblivious_getvalues`: Oblivious HTTP framed body
//!
//! As on the gRPC side, a parseable envelope always yields 200 with the
//! (possibly error-carrying) protocol response as the body; only
//! transport-level failures map to HTTP error codes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::Router;
use keyhouse_ohttp::OHTTP_RESPONSE_CONTENT_TYPE;
use tower_http::trace::TraceLayer;

use crate::protocol::{bhttp_status, ProtocolCodec};

pub fn router(codec: Arc<ProtocolCodec>) -> Router {
    Router::new()
        .route("/v2/getvalues", put(get_values))
        .route("/v2/bhttp_getvalues", post(bhttp_get_values))
        .route("/v2/oblivious_getvalues", post(oblivious_get_values))
        .layer(TraceLayer::new_for_http())
        .with_state(codec)
}

async fn get_values(State(codec): State<Arc<ProtocolCodec>>, body: Bytes) -> Response {
    match codec.get_values_json(&body).await {
        Ok(json) => (
            [(header::CONTENT_TYPE, "application/json")],
            json,
        )
            .into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(bhttp_status(e.kind()))
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, e.message).into_response()
        }
    }
}

async fn bhttp_get_values(State(codec): State<Arc<ProtocolCodec>>, body: Bytes) -> Response {
    let response = codec.get_values_bhttp(&body).await;
    (
        [(header::CONTENT_TYPE, "message/bhttp")],
        response,
    )
        .into_response()
}

async fn oblivious_get_values(State(codec): State<Arc<ProtocolCodec>>, body: Bytes) -> Response {
    match codec.get_values_ohttp(&body).await {
        Ok(data) => (
            [(header::CONTENT_TYPE, OHTTP_RESPONSE_CONTENT_TYPE)],
            data,
        )
            .into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(bhttp_status(e.kind()))
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, e.message).into_response()
        }
    }
}
