//! Serde helpers for human-readable durations in configuration files.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::{fmt, time::Duration};

/// `Duration` as a humantime string ("500ms", "1m 30s"), or whole seconds
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration_str = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&duration_str)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "a duration as seconds (number) or human-readable string (e.g., '50ms', '15s', '1m')",
                )
            }

            fn visit_u64<E>(self, seconds: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(seconds))
            }

            fn visit_i64<E>(self, seconds: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(seconds)
                    .map(Duration::from_secs)
                    .map_err(|_| de::Error::custom(format!("Negative duration: {seconds}")))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                humantime::parse_duration(value)
                    .map_err(|e| de::Error::custom(format!("Invalid duration '{value}': {e}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Wrapper {
        #[serde(with = "duration")]
        value: Duration,
    }

    #[test]
    fn test_parses_human_readable_and_numeric() {
        let parsed: Wrapper = toml::from_str("value = \"1m 30s\"").unwrap();
        assert_eq!(parsed.value, Duration::from_secs(90));

        let parsed: Wrapper = toml::from_str("value = \"50ms\"").unwrap();
        assert_eq!(parsed.value, Duration::from_millis(50));

        let parsed: Wrapper = toml::from_str("value = 15").unwrap();
        assert_eq!(parsed.value, Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_garbage_and_negative() {
        assert!(toml::from_str::<Wrapper>("value = \"soon\"").is_err());
        assert!(toml::from_str::<Wrapper>("value = -3").is_err());
    }

    #[test]
    fn test_serializes_as_humantime() {
        let text = toml::to_string(&Wrapper {
            value: Duration::from_millis(500),
        })
        .unwrap();
        assert_eq!(text.trim(), "value = \"500ms\"");
    }
}
