// Polling loop: read one field at a fixed rate and publish it over Zenoh

use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{telemetry_topic, ReadMode, TelemetryConfig, TOPIC_HEALTH};
use crate::messages::{ReaderHealth, TelemetrySample};
use crate::motor::control_table::MotorRegistry;
use crate::motor::protocol::{MotorId, PacketHandler};
use crate::motor::SerialBus;
use crate::reader::{Reader, ReaderError};

pub struct Telemetry {
    reader: Reader,
    ids: Vec<MotorId>,
    mode: ReadMode,
    // Caller-side buffer for single reads
    single_values: Vec<f32>,
    health: ReaderHealth,
}

impl Telemetry {
    pub fn new(config: &TelemetryConfig) -> Result<Self, ReaderError> {
        let registry = MotorRegistry::new(&config.motors);
        let ids = config.motor_ids();
        let reader = Reader::new(config.field, &ids, &registry)?.with_error_policy(config.error_flags);

        Ok(Self {
            reader,
            single_values: vec![0.0; ids.len()],
            ids,
            mode: config.mode,
            health: ReaderHealth::Ok,
        })
    }

    /// Read every motor once
    ///
    /// Only configuration errors come back as `Err`; bus trouble shows up
    /// in the sample's health.
    pub fn poll<B: PacketHandler + ?Sized>(&mut self, bus: &mut B) -> Result<TelemetrySample, ReaderError> {
        let (values, health, unavailable) = match self.mode {
            ReadMode::Sync => {
                let report = self.reader.sync_read(bus, &self.ids)?;
                let health = ReaderHealth::from_report(&report, self.ids.len());
                (self.reader.values().to_vec(), health, report.unavailable)
            }
            ReadMode::Single => {
                // One motor per call, so the stale tail is known after a failure
                let mut unavailable = Vec::new();
                for (i, &id) in self.ids.iter().enumerate() {
                    if !self.reader.read(&mut *bus, &[id], &mut self.single_values[i..=i])? {
                        unavailable.extend_from_slice(&self.ids[i..]);
                        break;
                    }
                }
                let health = if unavailable.is_empty() {
                    ReaderHealth::Ok
                } else {
                    ReaderHealth::CommFailure
                };
                (self.single_values.clone(), health, unavailable)
            }
        };

        if health != self.health {
            match health {
                ReaderHealth::Ok => info!("{} readings recovered", self.reader.field()),
                _ => warn!("{} readings degraded: {:?}", self.reader.field(), health),
            }
            self.health = health;
        }

        Ok(TelemetrySample {
            field: self.reader.field(),
            ids: self.ids.clone(),
            values,
            health,
            unavailable,
        })
    }

    pub fn health(&self) -> ReaderHealth {
        self.health
    }
}

/// Open the bus and take a single sample
pub fn read_once(config: &TelemetryConfig) -> Result<TelemetrySample, Box<dyn std::error::Error + Send + Sync>> {
    let mut bus = SerialBus::open_with_baudrate(&config.port, config.baudrate)?;
    let mut telemetry = Telemetry::new(config)?;
    Ok(telemetry.poll(&mut bus)?)
}

pub async fn run(config: TelemetryConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config.validate()?;
    info!("Opening motor bus on {} at {} baud", config.port, config.baudrate);
    let mut bus = SerialBus::open_with_baudrate(&config.port, config.baudrate)?;
    let mut telemetry = Telemetry::new(&config)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let topic = telemetry_topic(config.field);
    let pub_sample = session.declare_publisher(topic.clone()).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(config.loop_period());

    info!(
        "Telemetry started: {}Hz loop, {:?} mode, motors {:?}",
        config.loop_hz,
        config.mode,
        config.motor_ids()
    );
    info!("Publishing to: {}, {}", topic, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // Serial reads block until the bus answers or times out
        let sample = tokio::task::block_in_place(|| telemetry.poll(&mut bus))?;

        let sample_json = serde_json::to_string(&sample)?;
        pub_sample.put(sample_json).await?;

        let health_json = serde_json::to_string(&sample.health)?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::control_table::{Field, MotorSpec, MODEL_AX_12A, MODEL_MX_64};
    use crate::motor::mock::MockBus;

    fn config(mode: ReadMode) -> TelemetryConfig {
        TelemetryConfig {
            field: Field::PresentTemperature,
            mode,
            motors: vec![
                MotorSpec { id: 1, model: MODEL_AX_12A },
                MotorSpec { id: 2, model: MODEL_MX_64 },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_poll_sync_mode() {
        let mut bus = MockBus::new()
            .with_register(1, 43, &[35])
            .with_register(2, 43, &[41]);
        let mut telemetry = Telemetry::new(&config(ReadMode::Sync)).unwrap();

        let sample = telemetry.poll(&mut bus).unwrap();
        assert_eq!(sample.field, Field::PresentTemperature);
        assert_eq!(sample.ids, vec![1, 2]);
        assert_eq!(sample.values, vec![35.0, 41.0]);
        assert_eq!(sample.health, ReaderHealth::Ok);
        assert_eq!(bus.bulk_requests.len(), 1);
        assert!(bus.single_reads.is_empty());
    }

    #[test]
    fn test_poll_sync_mode_partial() {
        let mut bus = MockBus::new().with_register(1, 43, &[35]);
        let mut telemetry = Telemetry::new(&config(ReadMode::Sync)).unwrap();

        let sample = telemetry.poll(&mut bus).unwrap();
        assert_eq!(sample.health, ReaderHealth::Partial);
        assert_eq!(sample.unavailable, vec![2]);
        assert_eq!(sample.values, vec![35.0, 0.0]);
        assert_eq!(telemetry.health(), ReaderHealth::Partial);
    }

    #[test]
    fn test_poll_single_mode() {
        let mut bus = MockBus::new()
            .with_register(1, 43, &[35])
            .with_register(2, 43, &[41]);
        let mut telemetry = Telemetry::new(&config(ReadMode::Single)).unwrap();

        let sample = telemetry.poll(&mut bus).unwrap();
        assert_eq!(sample.values, vec![35.0, 41.0]);
        assert_eq!(sample.health, ReaderHealth::Ok);
        assert!(bus.bulk_requests.is_empty());

        let mut bus = MockBus::new().with_register(2, 43, &[41]);
        let sample = telemetry.poll(&mut bus).unwrap();
        assert_eq!(sample.health, ReaderHealth::CommFailure);
        assert_eq!(sample.unavailable, vec![1, 2]);
        assert_eq!(sample.values, vec![35.0, 41.0]);
        assert_eq!(bus.single_reads.len(), 1);
    }

    #[test]
    fn test_poll_single_mode_lists_stale_tail() {
        let config = TelemetryConfig {
            motors: vec![
                MotorSpec { id: 1, model: MODEL_AX_12A },
                MotorSpec { id: 2, model: MODEL_MX_64 },
                MotorSpec { id: 3, model: MODEL_MX_64 },
            ],
            ..config(ReadMode::Single)
        };
        let mut bus = MockBus::new()
            .with_register(1, 43, &[35])
            .with_register(3, 43, &[39]);
        let mut telemetry = Telemetry::new(&config).unwrap();

        let sample = telemetry.poll(&mut bus).unwrap();
        assert_eq!(sample.health, ReaderHealth::CommFailure);
        assert_eq!(sample.unavailable, vec![2, 3]);
        assert_eq!(sample.values, vec![35.0, 0.0, 0.0]);
        assert_eq!(bus.single_reads.len(), 2);
    }

    #[test]
    fn test_mixed_widths_fail_at_startup() {
        let config = TelemetryConfig {
            field: Field::PresentPos,
            motors: vec![
                MotorSpec { id: 1, model: MODEL_AX_12A },
                MotorSpec { id: 2, model: 1030 },
            ],
            ..Default::default()
        };
        assert!(matches!(
            Telemetry::new(&config),
            Err(ReaderError::ByteWidthMismatch { id: 2, .. })
        ));
    }
}
