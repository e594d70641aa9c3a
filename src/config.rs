//! Deployment settings, baked in at compile time from the build environment and
//! validated once at startup.

use core::{fmt, str::FromStr, time::Duration};
use std::num::NonZeroUsize;

use crate::{flow::Edge, reading::Tags, snapshot::Schedule, transmit::SinkKind};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`{0}` must be set for the selected sink")]
    Missing(&'static str),
    #[error("`{key}` has invalid value `{value}`: {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mqtt {
    pub url: &'static str,
    pub topic: &'static str,
    pub thing_name: &'static str,
    pub ca_cert: Option<&'static str>,
    pub client_cert: Option<&'static str>,
    pub private_key: Option<&'static str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Http { endpoint: &'static str },
    Mqtt(Mqtt),
    Console,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { endpoint } => write!(f, "POST {endpoint}"),
            Self::Mqtt(Mqtt { url, topic, thing_name, .. }) => write!(f, "MQTT {url} topic {topic} as {thing_name}"),
            Self::Console => f.write_str("console"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub edge: Edge,
    pub calibration: f32,
    pub window: NonZeroUsize,
    pub schedule: Schedule,
    pub compat: bool,
    pub destination: Destination,
    pub tags: Tags,
    pub wifi: Option<(&'static str, &'static str)>,
    pub query_port: Option<u16>,
}

pub const DEFAULT_CALIBRATION: f32 = 7.5;
pub const DEFAULT_WINDOW: usize = 5;

/// Every key the firmware understands, captured from the build environment.
const COMPILED: &[(&str, Option<&str>)] = &[
    ("FLOW_EDGE", option_env!("FLOW_EDGE")),
    ("FLOW_CALIBRATION", option_env!("FLOW_CALIBRATION")),
    ("FLOW_WINDOW", option_env!("FLOW_WINDOW")),
    ("FLOW_SINK", option_env!("FLOW_SINK")),
    ("FLOW_CYCLE_SECS", option_env!("FLOW_CYCLE_SECS")),
    ("FLOW_RETRY_SECS", option_env!("FLOW_RETRY_SECS")),
    ("FLOW_SCHEMA_COMPAT", option_env!("FLOW_SCHEMA_COMPAT")),
    ("HTTP_ENDPOINT", option_env!("HTTP_ENDPOINT")),
    ("MQTT_URL", option_env!("MQTT_URL")),
    ("MQTT_TOPIC", option_env!("MQTT_TOPIC")),
    ("MQTT_THING_NAME", option_env!("MQTT_THING_NAME")),
    ("MQTT_CA_CERT", option_env!("MQTT_CA_CERT")),
    ("MQTT_CLIENT_CERT", option_env!("MQTT_CLIENT_CERT")),
    ("MQTT_PRIVATE_KEY", option_env!("MQTT_PRIVATE_KEY")),
    ("DEVICE_ID", option_env!("DEVICE_ID")),
    ("ROOM_ID", option_env!("ROOM_ID")),
    ("LOCATION", option_env!("LOCATION")),
    ("WIFI_SSID", option_env!("WIFI_SSID")),
    ("WIFI_PASS", option_env!("WIFI_PASS")),
    ("QUERY_PORT", option_env!("QUERY_PORT")),
];

fn parse<T>(key: &'static str, value: Option<&str>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            value: raw.into(),
            reason: err.to_string(),
        }),
    }
}

impl Config {
    pub fn compiled() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| COMPILED.iter().find(|(name, _)| *name == key).and_then(|(_, value)| *value))
    }

    /// Builds the configuration from `lookup`, which maps a key to its raw value.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<&'static str>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let edge = parse("FLOW_EDGE", get("FLOW_EDGE"), Edge::Rising)?;
        let calibration = parse("FLOW_CALIBRATION", get("FLOW_CALIBRATION"), DEFAULT_CALIBRATION)?;
        if !(calibration.is_finite() && calibration > 0.0) {
            return Err(ConfigError::Invalid {
                key: "FLOW_CALIBRATION",
                value: calibration.to_string(),
                reason: "must be a positive number".into(),
            });
        }
        let window = parse("FLOW_WINDOW", get("FLOW_WINDOW"), DEFAULT_WINDOW)?;
        let window = NonZeroUsize::new(window).ok_or_else(|| ConfigError::Invalid {
            key: "FLOW_WINDOW",
            value: window.to_string(),
            reason: "use 1 to disable smoothing".into(),
        })?;

        let defaults = Schedule::default();
        let schedule = Schedule {
            cycle_pause: Duration::from_secs(parse("FLOW_CYCLE_SECS", get("FLOW_CYCLE_SECS"), defaults.cycle_pause.as_secs())?),
            retry_delay: Duration::from_secs(parse("FLOW_RETRY_SECS", get("FLOW_RETRY_SECS"), defaults.retry_delay.as_secs())?),
        };
        let compat = parse("FLOW_SCHEMA_COMPAT", get("FLOW_SCHEMA_COMPAT"), true)?;

        let destination = match parse("FLOW_SINK", get("FLOW_SINK"), SinkKind::Console)? {
            SinkKind::Http => Destination::Http { endpoint: require("HTTP_ENDPOINT")? },
            SinkKind::Mqtt => Destination::Mqtt(Mqtt {
                url: require("MQTT_URL")?,
                topic: require("MQTT_TOPIC")?,
                thing_name: require("MQTT_THING_NAME")?,
                ca_cert: get("MQTT_CA_CERT"),
                client_cert: get("MQTT_CLIENT_CERT"),
                private_key: get("MQTT_PRIVATE_KEY"),
            }),
            SinkKind::Console => Destination::Console,
        };

        let owned = |key: &str| get(key).map(|value| value.trim().to_owned());
        let tags = Tags::new(owned("DEVICE_ID"), owned("ROOM_ID"), owned("LOCATION"));
        let wifi = get("WIFI_SSID").map(|ssid| (ssid, lookup("WIFI_PASS").unwrap_or_default()));
        if destination != Destination::Console && wifi.is_none() {
            return Err(ConfigError::Missing("WIFI_SSID"));
        }
        let query_port = get("QUERY_PORT").map(|port| parse("QUERY_PORT", Some(port), 0)).transpose()?;

        Ok(Self { edge, calibration, window, schedule, compat, destination, tags, wifi, query_port })
    }
}
