//! Axum HTTP server
//!
//! Exposes the Anthropic-compatible surface:
//! - `POST /v1/messages` is translated and dispatched to the driver picked
//!   by the `provider/model` prefix.
//! - Every other path is byte-proxied to the upstream Anthropic API.

use crate::config::AdapterConfig;
use crate::error_map::{map_driver_error, map_stream_error, MappedError};
use crate::sink::{payload_digest, DebugSink, ErrorReport, FileSink, NullSink};
use crate::streaming::{collect, error_frame, fresh_message_id, CollectError, StreamTranscoder};
use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Request, Response, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bronte_protocol::convert::inbound::convert_request;
use bronte_protocol::convert::outbound::{render_turn, RenderOptions};
use bronte_protocol::{wire, ProviderEvent, ToolDecl, Turn};
use bronte_providers::{
    media, schema, DriverRegistry, DriverRequest, EventStream, ProviderDriver, ProviderHints,
};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AppState {
    registry: Arc<DriverRegistry>,
    hints: ProviderHints,
    send_reasoning: bool,
    sink: Arc<dyn DebugSink>,
    client: reqwest::Client,
    upstream_base: String,
}

/// Create the router from a full configuration.
pub fn create_app(config: AdapterConfig) -> Result<Router> {
    let registry =
        DriverRegistry::build(config.providers).context("failed to build driver registry")?;
    let sink: Arc<dyn DebugSink> = match &config.debug_dir {
        Some(dir) => Arc::new(FileSink::new(dir, config.debug_level)),
        None => Arc::new(NullSink),
    };
    Ok(create_app_from_parts(
        registry,
        sink,
        ProviderHints {
            reasoning_effort: config.reasoning_effort,
            service_tier: config.service_tier,
        },
        config.send_reasoning,
        config.upstream_base_url,
    ))
}

/// Router from pre-built parts; tests use this to inject stub drivers and an
/// in-memory sink.
pub fn create_app_from_parts(
    registry: DriverRegistry,
    sink: Arc<dyn DebugSink>,
    hints: ProviderHints,
    send_reasoning: bool,
    upstream_base: String,
) -> Router {
    let state = AppState {
        registry: Arc::new(registry),
        hints,
        send_reasoning,
        sink,
        client: reqwest::Client::new(),
        upstream_base: upstream_base.trim_end_matches('/').to_string(),
    };

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .fallback(handle_passthrough)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the adapter on loopback and return its URL plus the serve future.
///
/// Port 0 asks the kernel for a free port; the returned URL carries the
/// resolved one.
pub async fn bind(
    config: AdapterConfig,
) -> Result<(String, Pin<Box<dyn Future<Output = Result<()>> + Send>>)> {
    let port = config.port;
    let app = create_app(config)?;
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, port))
        .await
        .with_context(|| format!("failed to bind 127.0.0.1:{port}"))?;
    let url = format!("http://{}", listener.local_addr()?);
    let server: Pin<Box<dyn Future<Output = Result<()>> + Send>> =
        Box::pin(async move { axum::serve(listener, app).await.context("server error") });
    Ok((url, server))
}

/// Bind and serve until shutdown.
pub async fn serve(config: AdapterConfig) -> Result<()> {
    let (url, server) = bind(config).await?;
    info!(%url, "bronte adapter listening");
    server.await
}

async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    match handle_messages_inner(state, headers, body).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "unhandled error in /v1/messages");
            let body = serde_json::json!({"error": format!("Internal server error: {e}")});
            json_response(StatusCode::INTERNAL_SERVER_ERROR, &body)
        }
    }
}

async fn handle_messages_inner(
    state: AppState,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>> {
    let request: wire::MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                &MappedError {
                    status: 400,
                    kind: "invalid_request_error".to_string(),
                    message: format!("could not parse request body: {e}"),
                },
            ));
        }
    };

    // `provider/model` routing. A bare model goes to the anthropic driver
    // when one is registered, and is byte-proxied upstream otherwise.
    let (provider_name, model) = match request.model.split_once('/') {
        Some((provider, rest)) => (provider.to_string(), rest.to_string()),
        None => {
            if state.registry.contains("anthropic") {
                ("anthropic".to_string(), request.model.clone())
            } else {
                debug!(model = %request.model, "no provider prefix, proxying upstream");
                return proxy_upstream(
                    &state,
                    Method::POST,
                    "/v1/messages",
                    &headers,
                    reqwest::Body::from(body),
                )
                .await;
            }
        }
    };

    let Some(driver) = state.registry.get(&provider_name) else {
        let mapped = MappedError {
            status: 400,
            kind: "unknown_provider".to_string(),
            message: format!("no driver registered for '{provider_name}'"),
        };
        record_request_error(&state, &body, &provider_name, &model, &mapped);
        return Ok(error_response(StatusCode::BAD_REQUEST, &mapped));
    };

    let converted = match convert_request(&request) {
        Ok(converted) => converted,
        Err(e) => {
            let mapped = MappedError {
                status: 400,
                kind: e.kind().to_string(),
                message: e.to_string(),
            };
            record_request_error(&state, &body, &provider_name, &model, &mapped);
            return Ok(error_response(StatusCode::BAD_REQUEST, &mapped));
        }
    };

    let mut turns = converted.turns;
    media::normalize_file_parts(&mut turns);

    let mut tools = converted.tools;
    for decl in tools.values_mut() {
        if let ToolDecl::Function(function) = decl {
            function.input_schema = schema::adapt_schema(driver.kind(), &function.input_schema);
        }
    }

    let driver_request = DriverRequest {
        model,
        system: converted.system,
        turns,
        tools,
        tool_choice: request.tool_choice.clone(),
        max_output_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop_sequences.clone(),
        user_id: request.metadata.as_ref().and_then(|m| m.user_id.clone()),
        thinking: request.thinking.clone(),
        hints: state.hints,
    };
    let model_for_report = driver_request.model.clone();

    let events = match driver.invoke(driver_request).await {
        Ok(events) => events,
        Err(e) => {
            let mapped = map_driver_error(driver.kind(), &e);
            record_error(&state, &body, &provider_name, &model_for_report, "upstream", &mapped);
            return Ok(error_response(
                StatusCode::from_u16(mapped.status).unwrap_or(StatusCode::BAD_REQUEST),
                &mapped,
            ));
        }
    };

    if request.stream.unwrap_or(false) {
        let transcoder = StreamTranscoder::new(request.model.clone(), driver.kind());
        let frames = transcode_stream(
            events,
            transcoder,
            state.sink.clone(),
            StreamReportContext {
                provider_name: provider_name.clone(),
                provider: driver.kind(),
                model: model_for_report,
                payload_digest: request_digest(&body),
            },
        );
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(frames))
            .context("failed to build SSE response")?;
        return Ok(response);
    }

    match collect(events).await {
        Ok(collected) => {
            let turn = Turn::assistant(collected.parts);
            let rendered = render_turn(
                &turn,
                &RenderOptions {
                    send_reasoning: state.send_reasoning,
                },
            )
            .context("failed to render collected response")?;
            for warning in &rendered.warnings {
                warn!(provider = %provider_name, "{warning}");
            }

            let content = match rendered.message.content {
                wire::Content::Blocks(blocks) => blocks,
                wire::Content::String(text) => vec![wire::ContentBlock::text(text)],
            };
            let response = wire::MessagesResponse {
                id: fresh_message_id(),
                kind: "message".to_string(),
                role: wire::Role::Assistant,
                content,
                model: request.model.clone(),
                stop_reason: Some(collected.stop_reason.to_string()),
                stop_sequence: None,
                usage: collected.usage.into(),
            };
            Ok(Json(response).into_response())
        }
        Err(CollectError::Driver(e)) => {
            let mapped = map_driver_error(driver.kind(), &e);
            record_error(&state, &body, &provider_name, &request.model, "stream", &mapped);
            Ok(error_response(
                StatusCode::from_u16(mapped.status).unwrap_or(StatusCode::BAD_REQUEST),
                &mapped,
            ))
        }
        Err(CollectError::Event {
            code,
            error_type,
            message,
        }) => {
            let mapped = map_stream_error(
                driver.kind(),
                code.as_deref(),
                error_type.as_deref(),
                &message,
            );
            record_error(&state, &body, &provider_name, &request.model, "stream", &mapped);
            Ok(error_response(
                StatusCode::from_u16(mapped.status).unwrap_or(StatusCode::BAD_REQUEST),
                &mapped,
            ))
        }
    }
}

struct StreamReportContext {
    provider_name: String,
    provider: bronte_protocol::ProviderKind,
    model: String,
    payload_digest: String,
}

/// Pipe neutral events through the transcoder, recording failures.
///
/// Errors after this point cannot change the HTTP status; they become inline
/// SSE `error` events and the stream closes.
fn transcode_stream(
    mut events: EventStream,
    mut transcoder: StreamTranscoder,
    sink: Arc<dyn DebugSink>,
    context: StreamReportContext,
) -> impl Stream<Item = std::result::Result<String, std::io::Error>> + Send {
    async_stream::stream! {
        let buffer_chunks = sink.wants_chunks();
        let mut chunks: Vec<String> = Vec::new();

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if buffer_chunks {
                        chunks.push(serde_json::to_string(&event).unwrap_or_default());
                    }
                    if let ProviderEvent::Error { code, error_type, message, .. } = &event {
                        let mapped = map_stream_error(
                            context.provider,
                            code.as_deref(),
                            error_type.as_deref(),
                            message,
                        );
                        record_stream_error(&sink, &context, &mapped, buffer_chunks.then(|| chunks.clone()));
                    }
                    for frame in transcoder.feed(&event) {
                        yield Ok(frame);
                    }
                    if transcoder.is_closed() {
                        return;
                    }
                }
                Err(e) => {
                    let mapped = map_driver_error(context.provider, &e);
                    record_stream_error(&sink, &context, &mapped, buffer_chunks.then(|| chunks.clone()));
                    for frame in transcoder.feed_error(&e) {
                        yield Ok(frame);
                    }
                    return;
                }
            }
        }

        if !transcoder.is_closed() {
            yield Ok(error_frame("overloaded_error", "upstream stream ended unexpectedly"));
        }
    }
}

/// Byte-for-byte reverse proxy to the upstream Anthropic API.
async fn handle_passthrough(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let result = proxy_upstream(
        &state,
        parts.method,
        &path_and_query,
        &parts.headers,
        reqwest::Body::wrap_stream(body.into_data_stream()),
    )
    .await;

    match result {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "passthrough request failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

async fn proxy_upstream(
    state: &AppState,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: reqwest::Body,
) -> Result<Response<Body>> {
    let url = format!("{}{}", state.upstream_base, path_and_query);
    debug!(%url, "proxying upstream");

    let mut builder = state.client.request(method, &url);
    for (name, value) in headers {
        if name == header::HOST {
            continue;
        }
        builder = builder.header(name, value.clone());
    }

    let upstream = builder
        .body(body)
        .send()
        .await
        .context("upstream request failed")?;

    let status = upstream.status();
    let mut response = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if name == header::TRANSFER_ENCODING || name == header::CONNECTION {
            continue;
        }
        response = response.header(name.clone(), value.clone());
    }

    // Bodies are streamed regardless of size.
    let body_stream = upstream.bytes_stream().map(|r| r.map_err(std::io::Error::other));
    response
        .body(Body::from_stream(body_stream))
        .context("failed to build passthrough response")
}

fn request_digest(body: &Bytes) -> String {
    let payload: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
    payload_digest(&payload)
}

fn record_request_error(
    state: &AppState,
    body: &Bytes,
    provider: &str,
    model: &str,
    mapped: &MappedError,
) {
    record_error(state, body, provider, model, "request", mapped);
}

fn record_error(
    state: &AppState,
    body: &Bytes,
    provider: &str,
    model: &str,
    stage: &str,
    mapped: &MappedError,
) {
    let mut report = ErrorReport::new(stage, mapped.kind.clone(), mapped.message.clone());
    report.provider = Some(provider.to_string());
    report.model = Some(model.to_string());
    report.status = Some(mapped.status);
    report.payload_digest = Some(request_digest(body));
    state.sink.record(report);
}

fn record_stream_error(
    sink: &Arc<dyn DebugSink>,
    context: &StreamReportContext,
    mapped: &MappedError,
    chunks: Option<Vec<String>>,
) {
    let mut report = ErrorReport::new("stream", mapped.kind.clone(), mapped.message.clone());
    report.provider = Some(context.provider_name.clone());
    report.model = Some(context.model.clone());
    report.payload_digest = Some(context.payload_digest.clone());
    report.chunks = chunks;
    sink.record(report);
}

fn error_response(status: StatusCode, mapped: &MappedError) -> Response<Body> {
    json_response(status, &serde_json::to_value(mapped.body()).unwrap_or_default())
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
