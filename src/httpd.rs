// HTTP Server Module - Lamp emulator endpoints (/color, /rainbow, /status)
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::LampConfig;
use crate::lamp::{Lamp, RainbowAction};
use crate::types::{Channel, Rgb};

pub type SharedLamp = Arc<Mutex<Lamp>>;

type Params = Query<HashMap<String, String>>;

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn param<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Result<T, Response> {
    let raw = params
        .get(key)
        .ok_or_else(|| bad_request(format!("missing parameter '{}'", key)))?;
    raw.trim()
        .parse()
        .map_err(|_| bad_request(format!("invalid value for '{}': {}", key, raw)))
}

fn no_such_led(id: usize, led_count: usize) -> Response {
    bad_request(format!("no LED with id {} (lamp has {})", id, led_count))
}

/// Requested channel values of a `/color` call, in r, g, b order.
type ChannelValues = [(Channel, Option<u8>); 3];

// `id` is required; r, g and b may be given together or one at a time
fn color_params(params: &HashMap<String, String>) -> Result<(usize, ChannelValues), Response> {
    let id = param(params, "id")?;
    let mut values: ChannelValues = Channel::ALL.map(|channel| (channel, None));
    for (channel, value) in values.iter_mut() {
        let key = channel.letter().to_string();
        if params.contains_key(&key) {
            *value = Some(param(params, &key)?);
        }
    }
    if values.iter().all(|(_, value)| value.is_none()) {
        return Err(bad_request("missing parameters 'r', 'g' and 'b'".to_string()));
    }
    Ok((id, values))
}

async fn set_color(State(lamp): State<SharedLamp>, Query(params): Params) -> Response {
    let (id, values) = match color_params(&params) {
        Ok(v) => v,
        Err(response) => return response,
    };

    let mut lamp = lamp.lock().await;
    if let [(_, Some(r)), (_, Some(g)), (_, Some(b))] = values {
        if !lamp.set_color(id, Rgb::new(r, g, b)) {
            return no_such_led(id, lamp.led_count());
        }
        if let Some(color) = lamp.color(id) {
            debug!(id, r = color.r, g = color.g, b = color.b, "color set");
        }
        return (StatusCode::OK, "OK").into_response();
    }

    for (channel, value) in values {
        let Some(value) = value else { continue };
        if !lamp.set_channel(id, channel, value) {
            return no_such_led(id, lamp.led_count());
        }
        if let Some(stored) = lamp.channel(id, channel) {
            debug!(id, channel = %channel, value = stored, "channel set");
        }
    }
    (StatusCode::OK, "OK").into_response()
}

async fn rainbow(State(lamp): State<SharedLamp>, Query(params): Params) -> Response {
    let raw = params.get("action").map(String::as_str).unwrap_or("");
    let Some(action) = RainbowAction::parse(raw) else {
        return bad_request(format!("unknown rainbow action '{}'", raw));
    };

    lamp.lock().await.rainbow(action.clone());
    debug!(?action, "rainbow");
    (StatusCode::OK, "OK").into_response()
}

async fn status(State(lamp): State<SharedLamp>) -> Response {
    let status = lamp.lock().await.status();
    Json(status).into_response()
}

pub fn router(lamp: SharedLamp) -> Router {
    Router::new()
        .route("/color", get(set_color))
        .route("/rainbow", get(rainbow))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(lamp)
}

/// Drives the rainbow animation until the task is dropped.
pub fn spawn_ticker(lamp: SharedLamp, tick: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            lamp.lock().await.tick();
        }
    })
}

pub async fn serve(listener: TcpListener, lamp: SharedLamp, tick: Duration) -> Result<()> {
    let ticker = spawn_ticker(lamp.clone(), tick);
    let result = axum::serve(listener, router(lamp)).await;
    ticker.abort();
    result.context("Lamp emulator server failed")
}

pub async fn run_lamp_emulator(config: &LampConfig) -> Result<()> {
    let addr = format!("{}:{}", config.emulator_ip, config.emulator_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "lamp emulator with {} LEDs listening on http://{}",
        config.led_count,
        listener.local_addr()?
    );

    let lamp = Arc::new(Mutex::new(Lamp::new(config.led_count)));
    serve(listener, lamp, Duration::from_millis(config.rainbow_tick_ms)).await
}

/// Serves `lamp` on an ephemeral local port and returns its base URL.
#[cfg(test)]
pub async fn start_test_emulator(lamp: SharedLamp) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Long tick so the animation does not move under the assertions
    tokio::spawn(serve(listener, lamp, Duration::from_secs(3600)));
    format!("http://{}", addr)
}
