use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::config::{Direction, Edge, PinMode};
use crate::error::AppError;
use crate::gpio::{ChangeEvent, GpioBackend, GpioManager};

pub struct AppState<B: GpioBackend> {
    pub manager: Arc<GpioManager<B>>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<ChangeEvent>,
    channel_filter: Option<u32>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if channel_filter.as_ref().map(|c| *c == event.channel).unwrap_or(true) {
                            if let Ok(text) = serde_json::to_string(&event) {
                                if session.text(text).await.is_err() {
                                    warn!("WebSocket client disconnected");
                                    break;
                                }
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        if session.text(format!("Event stream lagged by {n} messages")).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/channels")
                    .route(web::get().to(list_channels::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channels/mode")
                    .route(web::post().to(set_mode::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channels/destroy")
                    .route(web::post().to(destroy_channels::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channels/reset")
                    .route(web::post().to(reset_channels::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channels/events")
                    .route(web::get().to(events_ws_all::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channel/{channel}")
                    .route(web::get().to(channel_descriptor::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channel/{channel}/setup")
                    .route(web::post().to(setup_channel::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channel/{channel}/value")
                    .route(web::get().to(get_value::<B>))
                    .route(web::post().to(set_value::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channel/{channel}/event")
                    .route(web::get().to(get_last_event::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/channel/{channel}/events")
                    .route(web::get().to(get_events::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_channels<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let channels = state.manager.list_channels().await;

    Ok(web::Json(channels))
}

async fn channel_descriptor<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let channel = parse_channel(&req)?;
    let desc = state.manager.channel_descriptor(channel).await?;

    Ok(web::Json(desc))
}

async fn set_mode<B: GpioBackend + 'static>(
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let mode = parse_mode_payload(&body)?;
    state.manager.set_mode(mode)?;

    Ok(HttpResponse::Ok())
}

async fn setup_channel<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let channel = parse_channel(&req)?;
    let (direction, edge) = parse_setup_payload(&body)?;

    state.manager.setup(channel, direction, edge).await?;

    Ok(HttpResponse::Ok())
}

async fn get_value<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let channel = parse_channel(&req)?;

    let value = state.manager.read_value(channel).await?;

    Ok(web::Json(value))
}

async fn set_value<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let channel = parse_channel(&req)?;
    let value = parse_value_payload(&body)?;

    state.manager.write_value(channel, value).await?;

    Ok(HttpResponse::Ok())
}

async fn destroy_channels<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    state.manager.destroy().await?;

    Ok(HttpResponse::Ok())
}

async fn reset_channels<B: GpioBackend + 'static>(state: web::Data<AppState<B>>) -> HttpResponse {
    state.manager.reset();

    HttpResponse::Ok().finish()
}

async fn get_last_event<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let channel = parse_channel(&req)?;

    let last = state.manager.last_event(channel).await?;

    match last {
        Some(event) => Ok(HttpResponse::Ok().json(event)),
        None => Ok(HttpResponse::Ok().finish()),
    }
}

async fn get_events<B: GpioBackend + 'static>(
    req: HttpRequest,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let channel = parse_channel(&req)?;

    let events = state.manager.channel_events(channel, query.limit).await?;

    Ok(web::Json(events))
}

async fn events_ws_all<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let rx = state.manager.subscribe_events();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::InvalidValue(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx, None).await;
    });

    Ok(response)
}

fn parse_channel(req: &HttpRequest) -> Result<u32, AppError> {
    let channel = req
        .match_info()
        .get("channel")
        .ok_or_else(|| AppError::InvalidValue("Missing channel".into()))?;
    let channel = channel
        .parse::<u32>()
        .map_err(|_| AppError::InvalidValue("Channel must be a number".into()))?;

    Ok(channel)
}

// Truthy coercion at the wire boundary: any non-zero number or `true`
// drives the pin high, `0` and `false` drive it low.
fn parse_value_payload(body: &[u8]) -> Result<bool, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty value payload".into()));
    }

    let text = std::str::from_utf8(body)
        .map_err(|_| AppError::InvalidValue("Value payload must be valid UTF-8".into()))?;
    let trimmed = text.trim();

    if let Ok(number) = trimmed.parse::<i64>() {
        return Ok(number != 0);
    }
    match trimmed {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(AppError::InvalidValue(
            "Value must be an integer or boolean".into(),
        )),
    }
}

// Both fields are optional, defaulting to an output pin with no edge, the
// same defaulting the channel setup call has always had.
fn parse_setup_payload(body: &[u8]) -> Result<(Direction, Edge), AppError> {
    if body.is_empty() {
        return Ok((Direction::Out, Edge::None));
    }

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid setup payload: {e}")))?;

    let direction = match payload.get("direction") {
        None | Some(serde_json::Value::Null) => Direction::Out,
        Some(serde_json::Value::String(s)) => Direction::parse(s)?,
        Some(other) => return Err(AppError::InvalidDirection(other.to_string())),
    };
    let edge = match payload.get("edge") {
        None | Some(serde_json::Value::Null) => Edge::None,
        Some(serde_json::Value::String(s)) => Edge::parse(s)?,
        Some(other) => return Err(AppError::InvalidEdge(other.to_string())),
    };

    Ok((direction, edge))
}

fn parse_mode_payload(body: &[u8]) -> Result<PinMode, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty mode payload".into()));
    }

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid mode payload: {e}")))?;

    match payload.get("mode") {
        Some(serde_json::Value::String(s)) => PinMode::parse(s),
        Some(other) => Err(AppError::InvalidMode(other.to_string())),
        None => Err(AppError::InvalidValue("Missing mode".into())),
    }
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
