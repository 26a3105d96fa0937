//! Sensor relay records
//!
//! Remote relay nodes push a fixed-layout packed binary record; the gateway
//! parses it and forwards each reading to its own bus topic. Pairing and
//! capture live outside this core; only the wire format and the forwarding
//! path are owned here.

use crate::bus::BusHandle;
use crate::error::SensorError;

/// Exact size of one packed relay record
pub const SENSOR_RECORD_LEN: usize = 38;

/// One decoded relay record
///
/// Layout (little-endian, no padding): u32 timestamp ms, f32 temperature °C,
/// f32 humidity %, f32 pressure hPa, f32 UV index, u8 battery %, u8 sensor
/// id, 16-byte NUL-padded device name.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReport {
    pub timestamp_ms: u32,
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub uv_index: f32,
    pub battery_percent: u8,
    pub sensor_id: u8,
    pub device_name: String,
}

impl SensorReport {
    /// Decode one record; anything but exactly 38 bytes is rejected
    pub fn parse(data: &[u8]) -> Result<Self, SensorError> {
        if data.len() != SENSOR_RECORD_LEN {
            return Err(SensorError::InvalidRecordSize {
                expected: SENSOR_RECORD_LEN,
                actual: data.len(),
            });
        }

        let f32_at = |offset: usize| {
            f32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };

        let name_bytes = &data[22..38];
        let name_end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let device_name = String::from_utf8_lossy(&name_bytes[..name_end]).to_string();

        Ok(Self {
            timestamp_ms: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            temperature: f32_at(4),
            humidity: f32_at(8),
            pressure: f32_at(12),
            uv_index: f32_at(16),
            battery_percent: data[20],
            sensor_id: data[21],
            device_name,
        })
    }
}

/// Forward topics derived from the configured prefix
#[derive(Debug, Clone)]
pub struct SensorTopics {
    pub temperature: String,
    pub humidity: String,
    pub pressure: String,
    pub uvindex: String,
    pub battery: String,
    pub status: String,
}

impl SensorTopics {
    /// Build the `<prefix>/<metric>/outside` topic set
    pub fn from_prefix(prefix: &str) -> Self {
        let make = |metric: &str| format!("{}/{}/outside", prefix, metric);
        Self {
            temperature: make("temperature"),
            humidity: make("humidity"),
            pressure: make("pressure"),
            uvindex: make("uvindex"),
            battery: make("battery"),
            status: format!("{}/status", prefix),
        }
    }
}

/// Publish one record to the per-metric topics
pub fn publish_report(bus: &BusHandle, topics: &SensorTopics, report: &SensorReport) {
    bus.publish(&topics.temperature, format!("{:.2}", report.temperature));
    bus.publish(&topics.humidity, format!("{:.2}", report.humidity));
    bus.publish(&topics.pressure, format!("{:.2}", report.pressure));
    bus.publish(&topics.uvindex, format!("{:.2}", report.uv_index));
    bus.publish(&topics.battery, format!("{}", report.battery_percent));
    bus.publish(&topics.status, format!("{} online", report.device_name));

    tracing::debug!(
        "Forwarded relay record from '{}' (sensor {})",
        report.device_name,
        report.sensor_id
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Vec<u8> {
        let mut data = Vec::with_capacity(SENSOR_RECORD_LEN);
        data.extend(123_456u32.to_le_bytes());
        data.extend(21.5f32.to_le_bytes());
        data.extend(48.0f32.to_le_bytes());
        data.extend(1013.25f32.to_le_bytes());
        data.extend(3.7f32.to_le_bytes());
        data.push(87);
        data.push(1);
        data.extend_from_slice(b"SensorNode01\0\0\0\0");
        data
    }

    #[test]
    fn test_parse_record() {
        let report = SensorReport::parse(&sample_record()).unwrap();

        assert_eq!(report.timestamp_ms, 123_456);
        assert!((report.temperature - 21.5).abs() < f32::EPSILON);
        assert!((report.pressure - 1013.25).abs() < f32::EPSILON);
        assert_eq!(report.battery_percent, 87);
        assert_eq!(report.sensor_id, 1);
        assert_eq!(report.device_name, "SensorNode01");
    }

    #[test]
    fn test_wrong_size_rejected() {
        assert!(SensorReport::parse(&[0u8; 37]).is_err());
        assert!(SensorReport::parse(&[0u8; 39]).is_err());
        assert!(SensorReport::parse(&[]).is_err());
    }

    #[test]
    fn test_unterminated_name() {
        let mut data = sample_record();
        data.truncate(22);
        data.extend_from_slice(b"0123456789abcdef");

        let report = SensorReport::parse(&data).unwrap();
        assert_eq!(report.device_name, "0123456789abcdef");
    }

    #[test]
    fn test_topic_layout() {
        let topics = SensorTopics::from_prefix("smartalarm/sensor");
        assert_eq!(topics.temperature, "smartalarm/sensor/temperature/outside");
        assert_eq!(topics.status, "smartalarm/sensor/status");
    }
}
