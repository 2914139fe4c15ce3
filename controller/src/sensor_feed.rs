use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use spzb_common::SensorReading;

use crate::ports::SensorReader;

const READING_CHANNEL_CAPACITY: usize = 16;

/// Room temperature as received from the broker, fanned out to the zone.
pub struct SensorFeed {
    latest: Mutex<Option<SensorReading>>,
    readings: broadcast::Sender<SensorReading>,
}

impl SensorFeed {
    pub fn new() -> Self {
        let (readings, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        Self {
            latest: Mutex::new(None),
            readings,
        }
    }

    pub fn publish(&self, reading: SensorReading) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(reading.clone());
        let _ = self.readings.send(reading);
    }
}

impl Default for SensorFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorReader for SensorFeed {
    fn latest(&self) -> Option<SensorReading> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<SensorReading> {
        self.readings.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_latest_and_fans_out() {
        let feed = SensorFeed::new();
        assert_eq!(feed.latest(), None);

        let mut readings = feed.subscribe();
        feed.publish(SensorReading::from_payload("19.5"));
        feed.publish(SensorReading::from_payload("unavailable"));

        assert_eq!(
            readings.recv().await.unwrap(),
            SensorReading::Value("19.5".to_string())
        );
        assert_eq!(readings.recv().await.unwrap(), SensorReading::Unavailable);
        assert_eq!(feed.latest(), Some(SensorReading::Unavailable));
    }
}
