use std::env;
use std::time::Duration;

use crate::sml_frame::CrcMode;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_BASE_TOPIC: &str = "sml_meter";
const DEFAULT_CLIENT_ID: &str = "sml-mqtt-bridge";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_HEALTHCHECK_PORT: u16 = 8080;
const DEFAULT_HEALTHCHECK_MAX_AGE_SECS: u64 = 600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;
const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MQTT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value `{value}`: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Where and how to fetch the SML frame from the meter.
#[derive(Debug, Clone)]
pub struct MeterSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub qos: u8,
    pub base_topic: String,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub port: u16,
    /// Nominal staleness threshold, before the poll-interval floor is applied
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub meter: MeterSettings,
    pub mqtt: MqttSettings,
    pub health: HealthSettings,
    pub poll_interval: Duration,
    pub crc: CrcMode,
}

impl BridgeConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any name → value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let poll_interval = Duration::from_secs(
            vars.parse_or("POLL_INTERVAL", DEFAULT_POLL_INTERVAL_SECS)?,
        );
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "POLL_INTERVAL",
                value: "0".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }

        let http_timeout =
            Duration::from_secs(vars.parse_or("HTTP_TIMEOUT", DEFAULT_HTTP_TIMEOUT_SECS)?);
        if http_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "HTTP_TIMEOUT",
                value: "0".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }
        // A fetch must never outlive its own cycle
        let http_timeout = http_timeout.min(poll_interval);

        let meter = MeterSettings {
            url: vars.required("HTTP_URL")?,
            username: vars.optional("HTTP_USER"),
            password: vars.optional("HTTP_PASS"),
            timeout: http_timeout,
        };

        let qos: u8 = vars.parse_or("MQTT_QOS", 1)?;
        if qos > 2 {
            return Err(ConfigError::Invalid {
                name: "MQTT_QOS",
                value: qos.to_string(),
                reason: "must be 0, 1 or 2".to_string(),
            });
        }

        let base_topic = vars
            .optional("BASE_TOPIC")
            .unwrap_or_else(|| DEFAULT_BASE_TOPIC.to_string())
            .trim_end_matches('/')
            .to_string();

        let mqtt = MqttSettings {
            host: vars.required("MQTT_HOST")?,
            port: vars.parse_or("MQTT_PORT", DEFAULT_MQTT_PORT)?,
            username: vars.optional("MQTT_USER"),
            password: vars.optional("MQTT_PASS"),
            client_id: vars
                .optional("MQTT_CLIENT_ID")
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            qos,
            base_topic,
            connect_timeout: MQTT_CONNECT_TIMEOUT,
            publish_timeout: MQTT_PUBLISH_TIMEOUT,
        };

        let health = HealthSettings {
            port: vars.parse_or("HEALTHCHECK_PORT", DEFAULT_HEALTHCHECK_PORT)?,
            max_age: Duration::from_secs(
                vars.parse_or("HEALTHCHECK_MAX_AGE", DEFAULT_HEALTHCHECK_MAX_AGE_SECS)?,
            ),
        };

        let crc = match vars.optional("SML_CRC") {
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                name: "SML_CRC",
                value,
                reason,
            })?,
            None => CrcMode::default(),
        };

        Ok(Self {
            meter,
            mqtt,
            health,
            poll_interval,
            crc,
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank are the same thing
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }
}
