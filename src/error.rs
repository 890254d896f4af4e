use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum MonitorError {
    #[error("Invalid threshold for {key}: {value} is not a finite number")]
    InvalidThreshold { key: String, value: f64 },

    #[error("Inverted range: min_temp {min_temp} is above max_temp {max_temp}")]
    InvertedRange { min_temp: f64, max_temp: f64 },

    #[error("Value {value} for {key} is outside [{min}, {max}]")]
    OutOfBounds {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Source already monitored: {0}")]
    DuplicateSource(String),

    #[error("Unknown monitor: {0}")]
    UnknownMonitor(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonitorError::InvertedRange {
            min_temp: 30.0,
            max_temp: 5.0,
        };
        assert_eq!(
            err.to_string(),
            "Inverted range: min_temp 30 is above max_temp 5"
        );

        let err = MonitorError::DuplicateSource("zigbee2mqtt/Kitchen".to_string());
        assert_eq!(
            err.to_string(),
            "Source already monitored: zigbee2mqtt/Kitchen"
        );
    }
}
