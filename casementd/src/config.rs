use anyhow::{self, Context, Result};
use dotenv::dotenv;
use std::{
    fmt::{self, Display, Formatter},
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};
use url::Url;

#[derive(Clone, Debug, PartialEq)]
pub enum BusKind {
    InMem,
    Mqtt,
}

impl FromStr for BusKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inmem" => Ok(BusKind::InMem),
            "mqtt" => Ok(BusKind::Mqtt),
            other => anyhow::bail!("unsupported bus kind: {other}"),
        }
    }
}

impl BusKind {
    fn as_str(&self) -> &'static str {
        match self {
            BusKind::InMem => "inmem",
            BusKind::Mqtt => "mqtt",
        }
    }
}

impl Display for BusKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    pub bus: BusKind,
    pub mqtt: MqttConfig,
    pub command_timeout: Duration,
    pub ws_ping: Duration,
    /// Registry consulted for devices that have not reported yet.
    pub directory_url: Option<Url>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            bus: BusKind::InMem,
            mqtt: MqttConfig::default(),
            command_timeout: Duration::from_millis(2000),
            ws_ping: Duration::from_secs(15),
            directory_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` passes the process env.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut c = Self::default();
        if let Some(s) = var("CASEMENT_BIND") {
            c.bind = s.parse().with_context(|| format!("invalid CASEMENT_BIND {s:?}"))?;
        }
        if let Some(s) = var("CASEMENT_BUS") {
            c.bus = s.parse()?;
        }
        if let Some(conn) = var("CASEMENT_MQTT_URL") {
            c.mqtt = MqttConfig::from_connection_string(&conn)?;
        }
        if let Some(s) = var("CASEMENT_MQTT_HOST") {
            c.mqtt.host = s;
        }
        if let Some(s) = var("CASEMENT_MQTT_PORT") {
            c.mqtt.port = s.parse().with_context(|| format!("invalid CASEMENT_MQTT_PORT {s:?}"))?;
        }
        if let Some(s) = var("CASEMENT_MQTT_CLIENT_ID") {
            c.mqtt.client_id = s;
        }
        if let Some(s) = var("CASEMENT_COMMAND_TIMEOUT_MS") {
            c.command_timeout =
                positive_duration(&s, "CASEMENT_COMMAND_TIMEOUT_MS").map(Duration::from_millis)?;
        }
        if let Some(s) = var("CASEMENT_WS_PING_SECS") {
            c.ws_ping = positive_duration(&s, "CASEMENT_WS_PING_SECS").map(Duration::from_secs)?;
        }
        if let Some(s) = var("CASEMENT_DIRECTORY_URL") {
            let url =
                Url::parse(&s).with_context(|| format!("invalid CASEMENT_DIRECTORY_URL {s:?}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("unsupported directory url scheme: {}", url.scheme());
            }
            c.directory_url = Some(url);
        }
        Ok(c)
    }
}

fn positive_duration(raw: &str, key: &str) -> Result<u64> {
    let value: u64 = raw.trim().parse().with_context(|| format!("invalid {key} {raw:?}"))?;
    if value == 0 {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(value)
}

#[derive(Clone, Debug, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 1883, client_id: "casementd".to_string() }
    }
}

impl MqttConfig {
    fn from_connection_string(conn: &str) -> Result<Self> {
        let url = Url::parse(conn)?;
        if url.scheme() != "mqtt" {
            anyhow::bail!("unsupported mqtt url scheme: {}", url.scheme());
        }

        let host =
            url.host_str().ok_or_else(|| anyhow::anyhow!("mqtt url missing host"))?.to_string();
        let port = url.port().unwrap_or(1883);
        let client_id = url
            .query_pairs()
            .find(|(k, _)| k == "client_id")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_else(|| "casementd".to_string());

        Ok(Self { host, port, client_id })
    }
}
