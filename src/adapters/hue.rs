//! Philips Hue bridge client (REST API v1)
//!
//! Covers just what the control loop uses:
//! - `POST /api` to register a username (needs the link button)
//! - `GET /api/<username>/lights` to enumerate lights
//! - `PUT /api/<username>/lights/<id>/state` to change one attribute
//!
//! The bridge answers most calls with HTTP 200 and a JSON array of
//! `{"success": ...}` / `{"error": ...}` entries, so errors have to be
//! fished out of the body.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::traits::{ControllerError, Light, LightController};

/// Application part of the devicetype sent on registration
const APP_NAME: &str = "huetv";
/// Bridge limit for the devicetype field
const MAX_DEVICE_TYPE_LEN: usize = 40;
/// Bridge error type for "link button not pressed"
const LINK_BUTTON_NOT_PRESSED: u64 = 101;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_LINK_ATTEMPTS: u32 = 1;
const DEFAULT_LINK_INTERVAL: Duration = Duration::from_secs(5);

/// Client for one Hue bridge
pub struct HueBridge {
    client: Client,
    base_url: String,
    username: Option<String>,
    link_attempts: u32,
    link_interval: Duration,
    lights: Vec<Light>,
}

impl HueBridge {
    /// Bridge reachable at `http://<address>`.
    ///
    /// Without a username, `connect` registers a new one.
    pub fn new(address: Ipv4Addr, username: Option<String>) -> Self {
        Self::with_base_url(format!("http://{}", address), username)
    }

    pub fn with_base_url(base_url: impl Into<String>, username: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(
                    "Failed to build HTTP client with custom config: {}. Using default.",
                    e
                );
                Client::default()
            });

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.filter(|u| !u.is_empty()),
            link_attempts: DEFAULT_LINK_ATTEMPTS,
            link_interval: DEFAULT_LINK_INTERVAL,
            lights: Vec::new(),
        }
    }

    /// How often to ask for a username while the link button isn't pressed.
    pub fn with_link_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.link_attempts = attempts.max(1);
        self.link_interval = interval;
        self
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn user_url(&self, path: &str) -> Result<String, ControllerError> {
        let username = self
            .username
            .as_deref()
            .ok_or(ControllerError::NotConnected)?;
        Ok(format!("{}/api/{}/{}", self.base_url, username, path))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Value, ControllerError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ControllerError::Status(response.status()));
        }

        let data: Value = response.json().await?;
        check_bridge_errors(&data)?;
        Ok(data)
    }

    async fn register(&self) -> Result<String, ControllerError> {
        let url = format!("{}/api", self.base_url);
        let body = json!({ "devicetype": device_type() });

        let mut attempt = 1;
        loop {
            match self.execute(self.client.post(&url).json(&body)).await {
                Ok(data) => {
                    return data
                        .get(0)
                        .and_then(|entry| entry.pointer("/success/username"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ControllerError::InvalidResponse(format!(
                                "no username in registration response: {}",
                                data
                            ))
                        });
                }
                Err(ControllerError::LinkButtonNotPressed) if attempt < self.link_attempts => {
                    warn!(
                        "Press the link button on the bridge (attempt {}/{})",
                        attempt, self.link_attempts
                    );
                    attempt += 1;
                    tokio::time::sleep(self.link_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LightController for HueBridge {
    async fn connect(&mut self) -> Result<(), ControllerError> {
        if self.username.is_some() {
            debug!("Using configured bridge username");
            return Ok(());
        }

        let username = self.register().await?;
        info!(
            %username,
            "Registered with bridge, pass --username to skip pairing next time"
        );
        self.username = Some(username);
        Ok(())
    }

    async fn fetch_state(&mut self) -> Result<Vec<Light>, ControllerError> {
        let url = self.user_url("lights")?;
        let data = self.execute(self.client.get(&url)).await?;
        self.lights = parse_lights(&data)?;
        debug!(count = self.lights.len(), "Fetched lights");
        Ok(self.lights.clone())
    }

    fn lights(&self) -> &[Light] {
        &self.lights
    }

    async fn set_light(
        &self,
        light_id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), ControllerError> {
        let url = self.user_url(&format!("lights/{}/state", light_id))?;
        let mut body = Map::new();
        body.insert(attribute.to_string(), value);

        debug!(light_id, body = ?body, "Hue request");
        self.execute(self.client.put(&url).json(&body)).await?;
        Ok(())
    }
}

/// `huetv#<hostname>`, cut to the bridge's length limit
fn device_type() -> String {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    format!("{}#{}", APP_NAME, host)
        .chars()
        .take(MAX_DEVICE_TYPE_LEN)
        .collect()
}

/// Turn the first `{"error": ...}` entry of a bridge response into an error
fn check_bridge_errors(data: &Value) -> Result<(), ControllerError> {
    let Some(entries) = data.as_array() else {
        return Ok(());
    };

    for entry in entries {
        if let Some(error) = entry.get("error") {
            let kind = error.get("type").and_then(Value::as_u64).unwrap_or(0);
            if kind == LINK_BUTTON_NOT_PRESSED {
                return Err(ControllerError::LinkButtonNotPressed);
            }
            let description = error
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ControllerError::Bridge { kind, description });
        }
    }
    Ok(())
}

/// Parse `{"<id>": {"name": ...}, ...}` into lights ordered by numeric id
fn parse_lights(data: &Value) -> Result<Vec<Light>, ControllerError> {
    let entries = data.as_object().ok_or_else(|| {
        ControllerError::InvalidResponse(format!("light list is not an object: {}", data))
    })?;

    let mut lights: Vec<Light> = entries
        .iter()
        .map(|(id, light)| Light {
            id: id.clone(),
            name: light
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string(),
        })
        .collect();

    lights.sort_by_key(|light| (light.id.parse::<u64>().unwrap_or(u64::MAX), light.id.clone()));
    Ok(lights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Json, Path, State};
    use axum::routing::{get, post, put};
    use axum::Router;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    const USERNAME: &str = "newdeveloper";

    /// In-process stand-in for a bridge
    #[derive(Clone, Default)]
    struct MockBridge {
        /// Registration calls answered with "link button not pressed"
        unpressed_calls: u32,
        register_calls: Arc<AtomicU32>,
        puts: Arc<Mutex<Vec<(String, Value)>>>,
    }

    async fn register(State(mock): State<MockBridge>, Json(body): Json<Value>) -> Json<Value> {
        assert!(body["devicetype"].as_str().unwrap().starts_with("huetv#"));
        let call = mock.register_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= mock.unpressed_calls {
            Json(json!([{
                "error": { "type": 101, "address": "", "description": "link button not pressed" }
            }]))
        } else {
            Json(json!([{ "success": { "username": USERNAME } }]))
        }
    }

    async fn lights(Path(username): Path<String>) -> Json<Value> {
        if username != USERNAME {
            return Json(json!([{
                "error": { "type": 1, "address": "/lights", "description": "unauthorized user" }
            }]));
        }
        Json(json!({
            "2": { "name": "Floor lamp", "state": { "on": true, "hue": 0 } },
            "10": { "name": "Strip", "state": { "on": true, "hue": 0 } },
            "1": { "name": "Ceiling", "state": { "on": false, "hue": 0 } }
        }))
    }

    async fn set_state(
        State(mock): State<MockBridge>,
        Path((_username, id)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        mock.puts.lock().unwrap().push((id, body));
        Json(json!([{ "success": {} }]))
    }

    async fn spawn_bridge(mock: MockBridge) -> String {
        let app = Router::new()
            .route("/api", post(register))
            .route("/api/{username}/lights", get(lights))
            .route("/api/{username}/lights/{id}/state", put(set_state))
            .with_state(mock);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_connect_registers_after_link_button() {
        let mock = MockBridge {
            unpressed_calls: 2,
            ..Default::default()
        };
        let url = spawn_bridge(mock.clone()).await;

        let mut bridge =
            HueBridge::with_base_url(url, None).with_link_retry(3, Duration::from_millis(10));
        bridge.connect().await.unwrap();

        assert_eq!(bridge.username(), Some(USERNAME));
        assert_eq!(mock.register_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_gives_up_without_link_button() {
        let mock = MockBridge {
            unpressed_calls: 10,
            ..Default::default()
        };
        let url = spawn_bridge(mock.clone()).await;

        let mut bridge =
            HueBridge::with_base_url(url, None).with_link_retry(2, Duration::from_millis(10));
        let result = bridge.connect().await;

        assert!(matches!(result, Err(ControllerError::LinkButtonNotPressed)));
        assert_eq!(mock.register_calls.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.username(), None);
    }

    #[tokio::test]
    async fn test_connect_with_username_skips_registration() {
        let mock = MockBridge::default();
        let url = spawn_bridge(mock.clone()).await;

        let mut bridge = HueBridge::with_base_url(url, Some(USERNAME.to_string()));
        bridge.connect().await.unwrap();

        assert_eq!(mock.register_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_state_orders_lights_by_id() {
        let url = spawn_bridge(MockBridge::default()).await;
        let mut bridge = HueBridge::with_base_url(url, Some(USERNAME.to_string()));

        let lights = bridge.fetch_state().await.unwrap();
        let ids: Vec<&str> = lights.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "10"]);
        assert_eq!(lights[0].name, "Ceiling");
        assert_eq!(bridge.lights(), lights.as_slice());
    }

    #[tokio::test]
    async fn test_unauthorized_user_is_a_bridge_error() {
        let url = spawn_bridge(MockBridge::default()).await;
        let mut bridge = HueBridge::with_base_url(url, Some("stranger".to_string()));

        match bridge.fetch_state().await {
            Err(ControllerError::Bridge { kind, description }) => {
                assert_eq!(kind, 1);
                assert_eq!(description, "unauthorized user");
            }
            other => panic!("Expected bridge error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_light_puts_single_attribute() {
        let mock = MockBridge::default();
        let url = spawn_bridge(mock.clone()).await;
        let bridge = HueBridge::with_base_url(url, Some(USERNAME.to_string()));

        bridge.set_light("2", "hue", json!(15317)).await.unwrap();

        let puts = mock.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, "2");
        assert_eq!(puts[0].1, json!({ "hue": 15317 }));
    }

    #[tokio::test]
    async fn test_set_light_requires_username() {
        let bridge = HueBridge::with_base_url("http://127.0.0.1:9", None);
        let result = bridge.set_light("1", "hue", json!(0)).await;
        assert!(matches!(result, Err(ControllerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_transient() {
        let bridge = HueBridge::with_base_url("http://127.0.0.1:1", Some(USERNAME.to_string()));
        let err = bridge.set_light("1", "hue", json!(0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Http(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_device_type_is_bounded() {
        let device_type = device_type();
        assert!(device_type.starts_with("huetv#"));
        assert!(device_type.chars().count() <= MAX_DEVICE_TYPE_LEN);
    }

    #[test]
    fn test_parse_lights_rejects_error_array() {
        let data = json!([{ "success": {} }]);
        assert!(matches!(
            parse_lights(&data),
            Err(ControllerError::InvalidResponse(_))
        ));
    }
}
