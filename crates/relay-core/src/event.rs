//! The conventional beacon detection payload.
//!
//! The broker forwards lines without looking inside them, so this type is a
//! convention shared by producers and whatever reads the far end of the serial
//! link.  A detection serializes to one JSON object on one line:
//!
//! ```json
//! {"subject":"beacon_detected","mac":"AA:BB:CC:DD:EE:FF","rssi":-61.0,"timestamp":1700000000.25}
//! ```
//!
//! Scanners that know a human-readable name fill `device_name`; scanners that
//! only see the Bluetooth class of device fill `device_class`.  Absent fields
//! are omitted from the JSON rather than sent as `null`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The `subject` value for a beacon sighting.
pub const SUBJECT_BEACON_DETECTED: &str = "beacon_detected";

/// One beacon detection reported by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconEvent {
    /// Event kind.  Always [`SUBJECT_BEACON_DETECTED`] for detections.
    pub subject: String,

    /// Bluetooth MAC address, `AA:BB:CC:DD:EE:FF` form.
    pub mac: String,

    /// Advertised device name, when the scanner resolves one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Class-of-device string, when the scanner reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    /// Signal strength in dBm (already decoded and calibrated by the producer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,

    /// Detection time as fractional Unix seconds.
    pub timestamp: f64,
}

impl BeaconEvent {
    /// Creates a `beacon_detected` event for `mac`, stamped with the current
    /// time.
    pub fn detected(mac: impl Into<String>) -> Self {
        Self {
            subject: SUBJECT_BEACON_DETECTED.to_string(),
            mac: mac.into(),
            device_name: None,
            device_class: None,
            rssi: None,
            timestamp: unix_now_secs(),
        }
    }

    /// Sets the advertised device name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Sets the class-of-device string.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = Some(class.into());
        self
    }

    /// Sets the signal strength in dBm.
    pub fn with_rssi(mut self, rssi: f64) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Serializes the event as one JSON line, terminator not included.
    ///
    /// # Errors
    ///
    /// Propagates the `serde_json` error; none is expected for this shape.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detected_sets_subject_and_mac() {
        let event = BeaconEvent::detected("AA:BB:CC:DD:EE:FF");
        assert_eq!(event.subject, SUBJECT_BEACON_DETECTED);
        assert_eq!(event.mac, "AA:BB:CC:DD:EE:FF");
        assert!(event.timestamp > 0.0);
    }

    #[test]
    fn test_to_line_has_no_terminator_and_omits_absent_fields() {
        // Arrange
        let event = BeaconEvent::detected("AA:BB:CC:DD:EE:FF").with_rssi(-61.0);

        // Act
        let line = event.to_line().unwrap();

        // Assert
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""subject":"beacon_detected""#));
        assert!(line.contains(r#""rssi":-61.0"#));
        assert!(!line.contains("device_name"));
        assert!(!line.contains("null"));
    }

    #[test]
    fn test_scanner_payload_deserializes() {
        // Arrange: the shape the UART scanner emits
        let json = r#"{"subject":"beacon_detected","mac":"11:22:33:44:55:66",
                       "device_name":"tag-7","rssi":-70,"timestamp":1700000000.5}"#;

        // Act
        let event: BeaconEvent = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(event.device_name.as_deref(), Some("tag-7"));
        assert_eq!(event.rssi, Some(-70.0));
        assert_eq!(event.device_class, None);
    }

    #[test]
    fn test_builder_sets_optional_fields() {
        let event = BeaconEvent::detected("x")
            .with_name("tag")
            .with_class("0x240404");
        assert_eq!(event.device_name.as_deref(), Some("tag"));
        assert_eq!(event.device_class.as_deref(), Some("0x240404"));
    }
}
