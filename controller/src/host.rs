use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{net::TcpListener, time::MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use brewery_common::{
    rapt, ControlProfile, OutputPolarity, OutputPort, SchedulerConfig, SensorReading, Snapshot,
    ThermalController, ThermalDecision, ThermalState,
};

use crate::{
    gpio::LoggingOutputPort,
    radio::{self, AdvertisementSink, RadioEvent, RadioSource},
};

const GREETING: &str = "Hello, Brewery! 🍺";
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";
const STALE_READING_SECS: i64 = 120;

/// Shared records. Locks are only taken for a single synchronous step and
/// never held across an `.await`.
#[derive(Clone)]
pub struct AppState {
    profile: Arc<Mutex<ControlProfile>>,
    reading: Arc<Mutex<SensorReading>>,
}

#[derive(Debug)]
struct HostSettings {
    http_port: u16,
    profile_path: PathBuf,
    polarity: OutputPolarity,
    radio: RadioSource,
    scheduler: SchedulerConfig,
}

#[derive(Debug, Serialize)]
struct ControlRejection {
    key: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct ControlFailure {
    profile: ControlProfile,
    errors: Vec<ControlRejection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorLiveness {
    NotSelected,
    Waiting,
    Fresh,
    Stale,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = HostSettings::from_env()?;
    let profile = load_profile(&settings.profile_path).await?;
    info!(
        "control profile: sensor={} mode={} target={} hysteresis={} unit={}",
        profile.temperature_sensor,
        profile.temperature_mode.as_str(),
        profile.target_temperature,
        profile.hysteresis,
        profile.temperature_unit.as_str()
    );

    let state = AppState::new(profile);
    let controller = ThermalController::new(LoggingOutputPort::default(), settings.polarity);

    radio::spawn_source(settings.radio, state.clone());
    spawn_sensor_loop(state.clone(), settings.scheduler.sensor_interval());
    spawn_thermal_loop(state.clone(), controller, settings.scheduler.thermal_interval());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("controller stopped");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/metrics", get(handle_get_metrics))
        .route("/prometheus", get(handle_get_prometheus))
        .route("/control", post(handle_post_control))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl HostSettings {
    fn from_env() -> anyhow::Result<Self> {
        let http_port = std::env::var("BREWERY_HTTP_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);

        let profile_path = std::env::var("BREWERY_PROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("settings/profile.json"));

        let polarity = match std::env::var("BREWERY_RELAY_POLARITY") {
            Ok(value) => OutputPolarity::parse(&value).unwrap_or_else(|| {
                warn!("unknown relay polarity '{value}', using active-low");
                OutputPolarity::ActiveLow
            }),
            Err(_) => OutputPolarity::default(),
        };

        let radio = match std::env::var("BREWERY_RADIO") {
            Ok(value) => RadioSource::parse(&value)?,
            Err(_) => RadioSource::Simulated,
        };

        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            sensor_interval_ms: env_millis("BREWERY_SENSOR_INTERVAL_MS")
                .unwrap_or(defaults.sensor_interval_ms),
            thermal_interval_ms: env_millis("BREWERY_THERMAL_INTERVAL_MS")
                .unwrap_or(defaults.thermal_interval_ms),
        };

        Ok(Self {
            http_port,
            profile_path,
            polarity,
            radio,
            scheduler,
        })
    }
}

fn env_millis(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
}

async fn load_profile(path: &Path) -> anyhow::Result<ControlProfile> {
    match tokio::fs::read(path).await {
        Ok(raw) => ControlProfile::from_json(&raw)
            .with_context(|| format!("failed to parse control profile {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(
                "control profile {} not found, using defaults",
                path.display()
            );
            Ok(ControlProfile::default())
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to read control profile {}", path.display()))
        }
    }
}

impl AppState {
    pub fn new(profile: ControlProfile) -> Self {
        Self {
            profile: Arc::new(Mutex::new(profile)),
            reading: Arc::new(Mutex::new(SensorReading::default())),
        }
    }

    fn profile(&self) -> MutexGuard<'_, ControlProfile> {
        lock(&self.profile)
    }

    fn reading(&self) -> MutexGuard<'_, SensorReading> {
        lock(&self.reading)
    }

    /// One thermal task step: evaluate against a consistent snapshot, then
    /// commit the derived state.
    fn run_thermal_cycle<P: OutputPort>(
        &self,
        controller: &mut ThermalController<P>,
    ) -> Option<ThermalState> {
        let reading = self.reading().clone();
        let profile = self.profile().clone();

        match controller.update(&reading, &profile) {
            Ok(ThermalDecision::NoReading) => {
                debug!("no temperature received yet");
                None
            }
            Ok(ThermalDecision::Actuate(next)) => {
                let mut profile = self.profile();
                if profile.thermal_state != next {
                    info!(
                        "thermal state {} -> {}",
                        profile.thermal_state.as_str(),
                        next.as_str()
                    );
                }
                profile.thermal_state = next;
                Some(next)
            }
            Err(err) => {
                warn!("thermal cycle failed, keeping previous state: {err}");
                None
            }
        }
    }

    fn sensor_liveness(&self, now: DateTime<Utc>) -> SensorLiveness {
        if !self.profile().uses_rapt_pill() {
            return SensorLiveness::NotSelected;
        }

        let reading = self.reading();
        match reading.age_secs(now) {
            None => SensorLiveness::Waiting,
            Some(age) if age > STALE_READING_SECS => SensorLiveness::Stale,
            Some(age) => {
                debug!(
                    "temp: {:?} gravity: {:?} age: {age}s",
                    reading.current_temperature, reading.gravity
                );
                SensorLiveness::Fresh
            }
        }
    }
}

impl AdvertisementSink for AppState {
    fn on_advertisement(&self, event: &RadioEvent) {
        let unit = self.profile().temperature_unit;
        match rapt::decode(&event.payload, event.rssi, unit) {
            Ok(Some(reading)) => *self.reading() = reading,
            Ok(None) => {}
            Err(err) => warn!("dropping advertisement from {}: {err}", event.address),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_sensor_loop(state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = None;

        loop {
            interval.tick().await;
            let liveness = state.sensor_liveness(Utc::now());
            if previous != Some(liveness) {
                match liveness {
                    SensorLiveness::NotSelected => info!("pill not set"),
                    SensorLiveness::Waiting => info!("waiting for first pill advertisement"),
                    SensorLiveness::Fresh => info!("pill readings arriving"),
                    SensorLiveness::Stale => {
                        warn!("no pill advertisement for over {STALE_READING_SECS}s")
                    }
                }
            }
            previous = Some(liveness);
        }
    });
}

fn spawn_thermal_loop<P>(state: AppState, mut controller: ThermalController<P>, period: Duration)
where
    P: OutputPort + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            state.run_thermal_cycle(&mut controller);
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn handle_index() -> &'static str {
    GREETING
}

async fn handle_get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(capture_snapshot(&state).into_json())
}

async fn handle_get_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let body = capture_snapshot(&state).to_prometheus();
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}

async fn handle_post_control(
    State(state): State<AppState>,
    Json(updates): Json<Map<String, Value>>,
) -> axum::response::Response {
    let (profile, errors) = {
        let mut profile = state.profile();
        let mut errors = Vec::new();

        for (key, value) in &updates {
            let Some(value) = control_value_text(value) else {
                warn!("control update rejected: {key} has no value");
                errors.push(ControlRejection {
                    key: key.clone(),
                    error: format!("{key}: a value is required"),
                });
                continue;
            };
            info!("control update {key}={value}");
            if let Err(err) = profile.set(key, &value) {
                warn!("control update rejected: {err}");
                errors.push(ControlRejection {
                    key: key.clone(),
                    error: err.to_string(),
                });
            }
        }

        (profile.clone(), errors)
    };

    if errors.is_empty() {
        Json(profile).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(ControlFailure { profile, errors }),
        )
            .into_response()
    }
}

fn capture_snapshot(state: &AppState) -> Snapshot {
    let profile = state.profile().clone();
    let reading = state.reading().clone();
    Snapshot::capture(&profile, &reading)
}

/// Request values may arrive as JSON numbers; the setter coerces from text.
/// Integral floats such as `7.0` are written without the fraction so they
/// still satisfy integer keys. `null` carries no value.
fn control_value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() && float.fract() == 0.0 => Some(format!("{float:.0}")),
            _ => Some(number.to_string()),
        },
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use brewery_common::{
        rapt::{encode_advertisement, PillFrame},
        TemperatureUnit,
    };
    use chrono::TimeDelta;
    use tower::ServiceExt;

    use super::*;

    fn pill_event(temperature_raw: u16) -> RadioEvent {
        RadioEvent {
            address: "78:E3:6D:00:00:01".to_string(),
            rssi: -64,
            payload: encode_advertisement(&PillFrame {
                version: 2,
                compat: 0.0,
                temperature_raw,
                x_raw: 0,
                y_raw: 0,
                z_raw: 16,
                gravity_raw: 1_040,
                battery_raw: 200,
            }),
        }
    }

    fn test_state() -> AppState {
        AppState::new(ControlProfile {
            target_temperature: 20.0,
            hysteresis: 0.5,
            ..ControlProfile::default()
        })
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn post_control(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/control")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn advertisement_replaces_reading() {
        let state = test_state();

        state.on_advertisement(&pill_event(38_816));

        let reading = state.reading().clone();
        assert!((reading.current_temperature.unwrap() - 30.1).abs() < 1e-9);
        assert_eq!(reading.signal_strength, Some(-64));
    }

    #[test]
    fn advertisement_uses_configured_unit() {
        let state = test_state();
        state.profile().temperature_unit = TemperatureUnit::Fahrenheit;

        state.on_advertisement(&pill_event(38_816));

        let temperature = state.reading().current_temperature.unwrap();
        assert!((temperature - 86.18).abs() < 1e-9);
    }

    #[test]
    fn bad_advertisements_keep_previous_reading() {
        let state = test_state();
        state.on_advertisement(&pill_event(38_816));
        let before = state.reading().clone();

        let mut truncated = pill_event(30_000);
        truncated.payload.truncate(20);
        state.on_advertisement(&truncated);

        let unrelated = RadioEvent {
            address: "00:11:22:33:44:55".to_string(),
            rssi: -90,
            payload: vec![0x02, 0x01, 0x06, 0x03, 0xFF, 0x4C, 0x00],
        };
        state.on_advertisement(&unrelated);

        assert_eq!(*state.reading(), before);
    }

    #[test]
    fn thermal_cycle_commits_state_and_drives_outputs() {
        let state = test_state();
        let mut controller =
            ThermalController::new(LoggingOutputPort::default(), OutputPolarity::ActiveHigh);

        assert_eq!(state.run_thermal_cycle(&mut controller), None);
        assert_eq!(state.profile().thermal_state, ThermalState::Off);

        // 19.0 °C
        state.on_advertisement(&pill_event(temperature_raw(19.0)));
        assert_eq!(
            state.run_thermal_cycle(&mut controller),
            Some(ThermalState::Heating)
        );
        assert_eq!(state.profile().thermal_state, ThermalState::Heating);

        state.on_advertisement(&pill_event(temperature_raw(20.0)));
        assert_eq!(state.run_thermal_cycle(&mut controller), Some(ThermalState::Off));
        assert_eq!(state.profile().thermal_state, ThermalState::Off);
    }

    #[test]
    fn liveness_tracks_reading_age() {
        let state = test_state();
        let now = Utc::now();

        assert_eq!(state.sensor_liveness(now), SensorLiveness::Waiting);

        state.on_advertisement(&pill_event(38_816));
        assert_eq!(state.sensor_liveness(Utc::now()), SensorLiveness::Fresh);
        assert_eq!(
            state.sensor_liveness(Utc::now() + TimeDelta::seconds(STALE_READING_SECS + 5)),
            SensorLiveness::Stale
        );

        state.profile().temperature_sensor = "ds18b20".to_string();
        assert_eq!(state.sensor_liveness(now), SensorLiveness::NotSelected);
    }

    #[tokio::test]
    async fn index_returns_greeting() {
        let (status, body) = send(&test_state(), get("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), GREETING);
    }

    #[tokio::test]
    async fn metrics_returns_snapshot() {
        let state = test_state();
        state.on_advertisement(&pill_event(38_816));

        let (status, body) = send(&state, get("/metrics")).await;
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["temperatureSensor"], "raptpill");
        assert_eq!(json["thermalState"], "OFF");
        assert_eq!(json["signalStrength"], -64);
        assert_eq!(json["zAxis"], 1.0);
        assert_eq!(json["gravity"], 1.04);
    }

    #[tokio::test]
    async fn prometheus_returns_text() {
        let state = test_state();
        state.profile().thermal_state = ThermalState::Heating;

        let (status, body) = send(&state, get("/prometheus")).await;
        let text = String::from_utf8(body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(text.lines().any(|line| line == "thermal_state 1"));
        assert!(text.lines().any(|line| line == "current_temperature NaN"));
        assert!(text.lines().any(|line| line == "target_temperature 20.0"));
    }

    #[tokio::test]
    async fn control_applies_all_keys() {
        let state = test_state();

        let (status, body) = send(
            &state,
            post_control(r#"{"targetTemperature": 18.5, "hysteresis": "1", "heatingPin": 4}"#),
        )
        .await;
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["targetTemperature"], 18.5);
        assert_eq!(json["hysteresis"], 1.0);
        assert_eq!(json["heatingPin"], 4);

        let profile = state.profile().clone();
        assert_eq!(profile.target_temperature, 18.5);
        assert_eq!(profile.heating_pin, 4);
    }

    #[tokio::test]
    async fn control_keeps_keys_applied_before_a_failure() {
        let state = test_state();

        let (status, body) = send(
            &state,
            post_control(
                r#"{"targetTemperature": "22", "hysteresis": "abc", "mashTemp": 65, "coolingPin": "7"}"#,
            ),
        )
        .await;
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["errors"][0]["key"], "hysteresis");
        assert_eq!(json["errors"][1]["key"], "mashTemp");
        assert_eq!(json["errors"][1]["error"], "mashTemp unknown parameter");
        assert_eq!(json["profile"]["targetTemperature"], 22.0);

        let profile = state.profile().clone();
        assert_eq!(profile.target_temperature, 22.0);
        assert_eq!(profile.hysteresis, 0.5);
        assert_eq!(profile.cooling_pin, 7);
    }

    #[tokio::test]
    async fn control_cannot_set_thermal_state() {
        let state = test_state();

        let (status, _) = send(&state, post_control(r#"{"thermalState": "HEATING"}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.profile().thermal_state, ThermalState::Off);
    }

    #[tokio::test]
    async fn unit_switch_applies_to_stored_reading() {
        let state = test_state();
        let mut controller =
            ThermalController::new(LoggingOutputPort::default(), OutputPolarity::ActiveHigh);
        // 30.10 °C, decoded while the profile is in celsius
        state.on_advertisement(&pill_event(38_816));

        let (status, _) = send(
            &state,
            post_control(r#"{"temperatureUnit": "fahrenheit", "targetTemperature": "68"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(
            state.run_thermal_cycle(&mut controller),
            Some(ThermalState::Cooling)
        );

        let (_, body) = send(&state, get("/metrics")).await;
        let json: Value = serde_json::from_slice(&body).unwrap();
        let temperature = json["currentTemperature"].as_f64().unwrap();
        assert!((temperature - 86.18).abs() < 1e-9);
        assert_eq!(json["thermalState"], "COOLING");
    }

    #[tokio::test]
    async fn control_accepts_integral_floats_for_pins() {
        let state = test_state();

        let (status, body) = send(
            &state,
            post_control(r#"{"coolingPin": 7.0, "heatingPin": 8, "targetTemperature": 18.0}"#),
        )
        .await;
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["coolingPin"], 7);
        assert_eq!(json["heatingPin"], 8);
        assert_eq!(json["targetTemperature"], 18.0);
    }

    #[tokio::test]
    async fn control_rejects_null_values() {
        let state = test_state();

        let (status, body) = send(
            &state,
            post_control(r#"{"temperatureSensor": null, "coolingPin": 7.5}"#),
        )
        .await;
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["errors"][0]["key"], "temperatureSensor");
        assert_eq!(json["errors"][1]["key"], "coolingPin");

        let profile = state.profile().clone();
        assert_eq!(profile.temperature_sensor, "raptpill");
        assert_eq!(profile.cooling_pin, 26);
    }

    #[test]
    fn control_values_render_as_setter_text() {
        assert_eq!(control_value_text(&Value::from(7.0)), Some("7".to_string()));
        assert_eq!(control_value_text(&Value::from(18.5)), Some("18.5".to_string()));
        assert_eq!(control_value_text(&Value::from(-3)), Some("-3".to_string()));
        assert_eq!(control_value_text(&Value::from("fahrenheit")), Some("fahrenheit".to_string()));
        assert_eq!(control_value_text(&Value::Null), None);
    }

    #[tokio::test]
    async fn control_rejects_non_object_body() {
        let (status, _) = send(&test_state(), post_control("[1, 2]")).await;

        assert!(status.is_client_error());
    }

    fn temperature_raw(celsius: f64) -> u16 {
        rapt::temperature_raw_from_celsius(celsius)
    }
}
