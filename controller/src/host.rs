use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use spzb_common::{
    ActuatorMode, ActuatorState, ControlError, HvacMode, PersistedState, Preset, RuntimeConfig,
    SensorReading, ThermostatEngine, ThermostatSnapshot, TOPIC_CMD_MODE, TOPIC_CMD_PRESET,
    TOPIC_CMD_TARGET, TOPIC_CONTROLLER_STATE, TOPIC_SENSOR_TEMP,
};

use crate::{
    clock::Clock,
    ports::PersistenceStore,
    scheduler::TokioScheduler,
    sensor_feed::SensorFeed,
    store::JsonStore,
    valve::SimulatedValve,
    zone::{ZoneController, ZoneError},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Clone)]
struct AppState {
    zone: Arc<ZoneController>,
    valve: Arc<SimulatedValve>,
    feed: Arc<SensorFeed>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatePayload<'a> {
    #[serde(flatten)]
    snapshot: &'a ThermostatSnapshot,
    #[serde(rename = "updatedEpoch")]
    updated_epoch: i64,
}

#[derive(Debug, Serialize)]
struct ValveView {
    name: String,
    #[serde(flatten)]
    state: ActuatorState,
    active: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = JsonStore::from_env();
    let runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    let restored = store.restore().await.unwrap_or_else(|err| {
        warn!("failed to restore previous state: {err:#}");
        None
    });

    let engine = ThermostatEngine::new(runtime.thermostat.clone(), restored);
    let clock = Clock::new();
    let valve = Arc::new(SimulatedValve::new(engine.config.heater.clone(), clock));
    let zone = Arc::new(ZoneController::new(engine, valve.clone(), clock));
    let feed = Arc::new(SensorFeed::new());

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("spzb-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        zone: zone.clone(),
        valve,
        feed: feed.clone(),
    };

    subscribe_topics(&mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_state_publish_loop(zone.snapshots(), mqtt, store);
    let zone_handle = zone.start(feed.as_ref(), &TokioScheduler);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/target", post(handle_set_target))
        .route("/api/preset", post(handle_set_preset))
        .route("/api/valve", get(handle_get_valve))
        .route("/api/valve/override", post(handle_valve_override))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(zone_handle);
    info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("unable to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_TEMP,
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_PRESET,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Publishes every snapshot the zone emits and keeps `state.json` in step
/// with the attributes that survive a restart.
fn spawn_state_publish_loop(
    mut snapshots: watch::Receiver<ThermostatSnapshot>,
    mqtt: AsyncClient,
    store: JsonStore,
) {
    tokio::spawn(async move {
        let mut persisted: Option<PersistedState> = None;
        snapshots.mark_changed();

        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();

            let payload = StatePayload {
                snapshot: &snapshot,
                updated_epoch: Utc::now().timestamp(),
            };
            match serde_json::to_vec(&payload) {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }

            let state = PersistedState::from(&snapshot);
            if persisted.as_ref() != Some(&state) {
                match store.persist(&state).await {
                    Ok(()) => persisted = Some(state),
                    Err(err) => warn!("failed to persist controller state: {err:#}"),
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;

    match topic.as_str() {
        TOPIC_SENSOR_TEMP => {
            app_state.feed.publish(SensorReading::from_payload(&message));
        }
        TOPIC_CMD_MODE => {
            let mode = message.parse::<HvacMode>()?;
            app_state.zone.set_mode(mode).await?;
        }
        TOPIC_CMD_TARGET => {
            let target = parse_temperature(&message)?;
            app_state.zone.set_target_temperature(Some(target)).await?;
        }
        TOPIC_CMD_PRESET => {
            let preset = message.parse::<Preset>()?;
            app_state.zone.set_preset(preset).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.zone.snapshot())
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match value.parse::<HvacMode>() {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let result = state.zone.set_mode(mode).await;
    zone_response(&state, result)
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = parse_temperature(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let result = state.zone.set_target_temperature(Some(target)).await;
    zone_response(&state, result)
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let preset = match value.parse::<Preset>() {
        Ok(preset) => preset,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let result = state.zone.set_preset(preset).await;
    zone_response(&state, result)
}

async fn handle_get_valve(State(state): State<AppState>) -> impl IntoResponse {
    Json(valve_view(&state.valve))
}

async fn handle_valve_override(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("mode") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'mode' parameter");
    };

    let mode = ActuatorMode::from(value.trim().to_ascii_lowercase());
    if let ActuatorMode::Other(other) = &mode {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid valve mode '{other}'"),
        );
    }

    state.valve.manual_override(mode);
    Json(valve_view(&state.valve)).into_response()
}

fn parse_temperature(raw: &str) -> Result<f32, ControlError> {
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ControlError::InvalidTemperature(raw.to_string()))
}

fn valve_view(valve: &SimulatedValve) -> ValveView {
    let state = valve.current();
    ValveView {
        name: valve.name().to_string(),
        active: state.activity().is_active(),
        state,
    }
}

/// The snapshot is returned on success; on failure the zone has still
/// emitted its (optimistic) state, so only the error is reported.
fn zone_response(state: &AppState, result: Result<(), ZoneError>) -> axum::response::Response {
    match result {
        Ok(()) => Json(state.zone.snapshot()).into_response(),
        Err(err) => error_response(zone_error_status(&err), &err.to_string()),
    }
}

fn zone_error_status(err: &ZoneError) -> StatusCode {
    match err {
        ZoneError::Control(_) => StatusCode::BAD_REQUEST,
        ZoneError::Actuator(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use crate::ports::ActuatorError;

    use super::*;

    #[test]
    fn temperatures_must_be_finite_numbers() {
        assert_eq!(parse_temperature(" 21.5 "), Ok(21.5));
        assert!(parse_temperature("warm").is_err());
        assert!(parse_temperature("NaN").is_err());
    }

    #[test]
    fn control_errors_are_client_errors() {
        let control = ZoneError::Control(ControlError::PresetUnavailable);
        let actuator = ZoneError::Actuator(ActuatorError::Unavailable("valve".into()));

        assert_eq!(zone_error_status(&control), StatusCode::BAD_REQUEST);
        assert_eq!(zone_error_status(&actuator), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn state_payload_flattens_the_snapshot() {
        let engine = ThermostatEngine::new(Default::default(), None);
        let snapshot = engine.snapshot(None);
        let payload = StatePayload {
            snapshot: &snapshot,
            updated_epoch: 1_700_000_000,
        };

        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["updatedEpoch"], 1_700_000_000);
        assert_eq!(json["hvacMode"], "off");
        assert_eq!(json["hvacAction"], "off");
    }
}
