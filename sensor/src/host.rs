use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use tracing::{debug, info, warn};

use spzb_common::{HvacAction, TOPIC_CONTROLLER_STATE, TOPIC_SENSOR_STATUS, TOPIC_SENSOR_TEMP};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ControllerState {
    #[serde(rename = "hvacAction")]
    hvac_action: HvacAction,
}

/// First-order room model: warms towards the radiator while the valve is
/// open, drifts back to the ambient temperature otherwise.
#[derive(Debug, Clone)]
struct RoomModel {
    temperature: f32,
    ambient: f32,
    radiator: f32,
}

impl RoomModel {
    const HEATING_RATE: f32 = 0.05;
    const LOSS_RATE: f32 = 0.02;

    fn new(temperature: f32) -> Self {
        Self {
            temperature,
            ambient: 15.0,
            radiator: 28.0,
        }
    }

    fn step(&mut self, heating: bool) -> f32 {
        let loss = (self.temperature - self.ambient) * Self::LOSS_RATE;
        let gain = if heating {
            (self.radiator - self.temperature).max(0.0) * Self::HEATING_RATE
        } else {
            0.0
        };
        self.temperature += gain - loss;
        self.temperature
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("spzb-sensor", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.subscribe(TOPIC_CONTROLLER_STATE, QoS::AtMostOnce)
        .await
        .context("failed to subscribe to controller state")?;
    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    let heating = Arc::new(AtomicBool::new(false));
    let valve_open = heating.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message)))
                    if message.topic == TOPIC_CONTROLLER_STATE =>
                {
                    match serde_json::from_slice::<ControllerState>(&message.payload) {
                        Ok(state) => valve_open.store(
                            state.hvac_action == HvacAction::Heating,
                            Ordering::Relaxed,
                        ),
                        Err(err) => debug!("ignoring controller state: {err}"),
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("sensor mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    info!("sensor publisher started");

    let mut room = RoomModel::new(18.0);
    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let temperature = room.step(heating.load(Ordering::Relaxed));
                mqtt.publish(TOPIC_SENSOR_TEMP, QoS::AtLeastOnce, true, format!("{temperature:.1}"))
                    .await
                    .context("failed to publish sensor temperature")?;
            }
            _ = &mut shutdown => break,
        }
    }

    info!("sensor shutting down");
    mqtt.publish(TOPIC_SENSOR_TEMP, QoS::AtLeastOnce, true, "unavailable")
        .await
        .context("failed to publish sensor shutdown")?;
    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "offline")
        .await
        .context("failed to publish sensor offline status")?;
    // Give the event loop a moment to flush the last publishes.
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_warms_while_heating() {
        let mut room = RoomModel::new(18.0);
        let before = room.temperature;

        let after = room.step(true);

        assert!(after > before);
        assert!(after < room.radiator);
    }

    #[test]
    fn room_settles_at_ambient_without_heat() {
        let mut room = RoomModel::new(18.0);
        for _ in 0..2_000 {
            room.step(false);
        }

        assert!((room.temperature - room.ambient).abs() < 0.01);
    }

    #[test]
    fn reads_action_from_controller_state() {
        let state: ControllerState =
            serde_json::from_str(r#"{"name":"zone","hvacAction":"heating","active":true}"#)
                .unwrap();

        assert_eq!(state.hvac_action, HvacAction::Heating);
    }
}
