//! # Configuration
//!
//! Process settings come from the environment; the scenario (connectors,
//! vehicles and their simulators) comes from a JSON file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use geotrack_domain::{BoundingBox, Position};
use geotrack_persistence::ArchiveConfig;
use geotrack_simulator::routing::osrm::DEFAULT_SERVER_URL;
use geotrack_simulator::{
    DelayRange, DispatchOptions, DispatchSimulator, RandomRouteOptions, RandomRouteSimulator,
    RetryPolicy, RouteOptions, RouteSimulator, SharedRouteProvider, Simulator,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::websocket::WebSocketConfig;

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Process configuration
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Scenario file
    pub config_path: PathBuf,

    /// Logging level used when `RUST_LOG` is unset
    pub log_level: String,

    /// Routing server used when the scenario names none
    pub osrm_url: String,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            config_path: env::var("GEOTRACK_CONFIG_PATH")
                .unwrap_or_else(|_| "./data/config.json".to_string())
                .into(),

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            osrm_url: env::var("OSRM_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

// =============================================================================
// SCENARIO
// =============================================================================

/// Scenario file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub connectors: Vec<ConnectorEntry>,
    #[serde(default)]
    pub vehicles: Vec<VehicleEntry>,
}

/// Routing defaults shared by every vehicle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSection {
    pub server_url: Option<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorKind {
    WebSocketConnector,
    ArchiveConnector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorEntry {
    pub id: String,
    pub connector: ConnectorKind,
    /// Kind-specific settings
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Typed settings of one connector entry.
#[derive(Debug, Clone)]
pub enum ConnectorSettings {
    WebSocket(WebSocketConfig),
    Archive(ArchiveConfig),
}

#[derive(Debug, Default, Deserialize)]
struct ArchiveData {
    #[serde(default)]
    path: Option<PathBuf>,
}

impl ConnectorEntry {
    pub fn settings(&self) -> Result<ConnectorSettings, ConfigError> {
        let data = if self.data.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.data.clone()
        };
        match self.connector {
            ConnectorKind::WebSocketConnector => {
                let config: WebSocketConfig = serde_json::from_value(data)?;
                config.request().map_err(|err| {
                    ConfigError::invalid(format!("connectors.{}.url", self.id), err.to_string())
                })?;
                Ok(ConnectorSettings::WebSocket(config))
            }
            ConnectorKind::ArchiveConnector => {
                let data: ArchiveData = serde_json::from_value(data)?;
                Ok(ConnectorSettings::Archive(ArchiveConfig { path: data.path }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulatorKind {
    RouteSimulator,
    RandomRouteSimulator,
    DispatchSimulator,
}

const fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleEntry {
    pub id: Uuid,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Meters per second
    #[serde(default)]
    pub speed: Option<f64>,
    pub simulator: SimulatorKind,
    #[serde(default)]
    pub data: SimulatorData,
    /// Ids of the connectors that receive this vehicle's updates
    #[serde(default)]
    pub connectors: Vec<String>,
}

/// Simulator settings. Which fields apply depends on the simulator kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorData {
    // RouteSimulator
    pub start: Option<Position>,
    pub end: Option<Position>,
    pub loop_route: bool,

    // RandomRouteSimulator and DispatchSimulator
    pub coord1: Option<Position>,
    pub coord2: Option<Position>,
    pub delay_secs: Option<DelayRange>,

    // DispatchSimulator
    pub home_location: Option<Position>,
    pub dispatch_wait_secs: Option<DelayRange>,
    pub on_scene_secs: Option<DelayRange>,

    // Shared
    pub update_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub fetch_timeout_ms: Option<u64>,
    pub profile: Option<String>,
    pub server_url: Option<String>,
    pub seed: Option<u64>,
}

/// Fully resolved simulator of one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatorBlueprint {
    Route {
        start: Position,
        end: Position,
        options: RouteOptions,
    },
    RandomRoute(RandomRouteOptions),
    Dispatch(DispatchOptions),
}

impl SimulatorBlueprint {
    pub fn build(self, provider: SharedRouteProvider) -> Simulator {
        match self {
            Self::Route {
                start,
                end,
                options,
            } => RouteSimulator::new(start, end, options, provider).into(),
            Self::RandomRoute(options) => RandomRouteSimulator::new(options, provider).into(),
            Self::Dispatch(options) => DispatchSimulator::new(options, provider).into(),
        }
    }
}

impl VehicleEntry {
    fn field(&self, name: &str) -> String {
        format!("vehicles.{}.{name}", self.id)
    }

    fn position(&self, name: &str, value: Option<Position>) -> Result<Option<Position>, ConfigError> {
        value
            .map(|p| {
                Position::validated(p.latitude, p.longitude)
                    .map_err(|err| ConfigError::invalid(self.field(name), err.to_string()))
            })
            .transpose()
    }

    /// Routing server for this vehicle: its own, the scenario's, or `fallback`.
    pub fn server_url(&self, routing: &RoutingSection, fallback: &str) -> String {
        self.data
            .server_url
            .clone()
            .or_else(|| routing.server_url.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn route_options(&self, routing: &RoutingSection) -> Result<RouteOptions, ConfigError> {
        let defaults = RouteOptions::default();
        let retry_defaults = RetryPolicy::default();
        let options = RouteOptions {
            profile: self
                .data
                .profile
                .clone()
                .or_else(|| routing.profile.clone())
                .unwrap_or(defaults.profile),
            speed_mps: self.speed.unwrap_or(defaults.speed_mps),
            update_interval: self
                .data
                .update_interval_ms
                .map_or(defaults.update_interval, Duration::from_millis),
            retry: RetryPolicy {
                max_retries: self.data.max_retries.unwrap_or(retry_defaults.max_retries),
                fetch_timeout: self
                    .data
                    .fetch_timeout_ms
                    .map_or(retry_defaults.fetch_timeout, Duration::from_millis),
            },
            loop_route: self.data.loop_route,
        };
        options
            .validate()
            .map_err(|err| ConfigError::invalid(self.field("data"), err.to_string()))?;
        Ok(options)
    }

    /// Bounding box from `coord1`/`coord2`. A missing corner falls back
    /// to the default position.
    fn area(&self) -> Result<BoundingBox, ConfigError> {
        let a = self.position("coord1", self.data.coord1)?.unwrap_or_default();
        let b = self.position("coord2", self.data.coord2)?.unwrap_or_default();
        BoundingBox::validated(a, b).map_err(|err| ConfigError::invalid(self.field("coord1"), err.to_string()))
    }

    pub fn simulator_blueprint(&self, routing: &RoutingSection) -> Result<SimulatorBlueprint, ConfigError> {
        let route = self.route_options(routing)?;
        let data = &self.data;
        match self.simulator {
            SimulatorKind::RouteSimulator => {
                let start = self
                    .position("start", data.start)?
                    .ok_or_else(|| ConfigError::invalid(self.field("start"), "missing"))?;
                let end = self
                    .position("end", data.end)?
                    .ok_or_else(|| ConfigError::invalid(self.field("end"), "missing"))?;
                Ok(SimulatorBlueprint::Route {
                    start,
                    end,
                    options: route,
                })
            }
            SimulatorKind::RandomRouteSimulator => {
                let mut options = RandomRouteOptions::new(self.area()?);
                if let Some(delay) = data.delay_secs {
                    options.delay = delay;
                }
                options.route = route;
                options.seed = data.seed;
                Ok(SimulatorBlueprint::RandomRoute(options))
            }
            SimulatorKind::DispatchSimulator => {
                let home = self.position("home_location", data.home_location)?;
                let mut options = DispatchOptions::new(self.area()?, home);
                if let Some(wait) = data.dispatch_wait_secs {
                    options.dispatch_wait = wait;
                }
                if let Some(on_scene) = data.on_scene_secs {
                    options.on_scene = on_scene;
                }
                options.route = route;
                options.seed = data.seed;
                Ok(SimulatorBlueprint::Dispatch(options))
            }
        }
    }
}

impl ScenarioConfig {
    /// Read and parse a scenario file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn connector(&self, id: &str) -> Option<&ConnectorEntry> {
        self.connectors.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    const SCENARIO: &str = r#"{
        "routing": {"server_url": "http://osrm.local/route/v1", "profile": "driving"},
        "connectors": [
            {"id": "ws-main", "connector": "WebSocketConnector",
             "data": {"url": "ws://localhost:9000", "token": "t0k"}},
            {"id": "archive", "connector": "ArchiveConnector"}
        ],
        "vehicles": [
            {"id": "7b8f6f5e-3f7c-4d0e-9a53-2f4a3d3c6c01", "speed": 13.9,
             "simulator": "DispatchSimulator",
             "data": {"coord1": {"latitude": 50.70, "longitude": 7.05},
                      "coord2": {"latitude": 50.76, "longitude": 7.15},
                      "home_location": {"latitude": 50.73, "longitude": 7.10},
                      "on_scene_secs": [30, 60]},
             "connectors": ["ws-main", "archive"]},
            {"id": "0d5e3c7a-8a51-4a37-9c1b-7d14e2a6f0b2", "enabled": false,
             "simulator": "RouteSimulator",
             "data": {"start": {"latitude": 50.70, "longitude": 7.05},
                      "end": {"latitude": 50.71, "longitude": 7.06},
                      "loop_route": true, "update_interval_ms": 500,
                      "server_url": "http://other/route/v1"}}
        ]
    }"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = ScenarioConfig::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.connectors.len(), 2);
        assert_eq!(scenario.vehicles.len(), 2);
        assert!(scenario.vehicles[0].enabled);
        assert!(!scenario.vehicles[1].enabled);
        assert_eq!(
            scenario.connector("archive").map(|c| c.connector),
            Some(ConnectorKind::ArchiveConnector)
        );
    }

    #[test]
    fn test_connector_settings() {
        let scenario = ScenarioConfig::from_json(SCENARIO).unwrap();

        match scenario.connectors[0].settings().unwrap() {
            ConnectorSettings::WebSocket(config) => {
                assert_eq!(config.token.as_deref(), Some("t0k"));
                assert!(config.auto_reconnect);
            }
            other => panic!("unexpected settings {other:?}"),
        }
        match scenario.connectors[1].settings().unwrap() {
            ConnectorSettings::Archive(config) => assert!(config.path.is_none()),
            other => panic!("unexpected settings {other:?}"),
        }
    }

    #[test]
    fn test_websocket_connector_requires_socket_url() {
        let entry = ConnectorEntry {
            id: "ws".into(),
            connector: ConnectorKind::WebSocketConnector,
            data: serde_json::json!({"url": "http://localhost"}),
        };
        assert!(matches!(entry.settings(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_dispatch_blueprint() {
        let scenario = ScenarioConfig::from_json(SCENARIO).unwrap();
        let blueprint = scenario.vehicles[0].simulator_blueprint(&scenario.routing).unwrap();

        let SimulatorBlueprint::Dispatch(options) = blueprint else {
            panic!("expected dispatch blueprint");
        };
        assert_eq!(options.home, Some(Position::new(50.73, 7.10)));
        assert_eq!(options.on_scene, DelayRange::new(30, 60));
        assert_eq!(options.dispatch_wait, DelayRange::new(10, 200));
        assert_eq!(options.route.speed_mps, 13.9);
        assert!(options.area.contains(&Position::new(50.73, 7.10)));
    }

    #[test]
    fn test_route_blueprint_and_server_precedence() {
        let scenario = ScenarioConfig::from_json(SCENARIO).unwrap();
        let vehicle = &scenario.vehicles[1];

        let SimulatorBlueprint::Route { options, .. } =
            vehicle.simulator_blueprint(&scenario.routing).unwrap()
        else {
            panic!("expected route blueprint");
        };
        assert!(options.loop_route);
        assert_eq!(options.update_interval, Duration::from_millis(500));
        assert_eq!(options.speed_mps, 10.0);
        assert_eq!(vehicle.server_url(&scenario.routing, "fallback"), "http://other/route/v1");
        assert_eq!(
            scenario.vehicles[0].server_url(&scenario.routing, "fallback"),
            "http://osrm.local/route/v1"
        );
        assert_eq!(
            scenario.vehicles[0].server_url(&RoutingSection::default(), "fallback"),
            "fallback"
        );
    }

    #[test]
    fn test_invalid_vehicle_data() {
        let mut vehicle: VehicleEntry = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "simulator": "RouteSimulator",
            "data": {"start": {"latitude": 0.0, "longitude": 0.0}}
        }))
        .unwrap();
        let routing = RoutingSection::default();
        assert_err!(vehicle.simulator_blueprint(&routing));

        vehicle.data.end = Some(Position::new(95.0, 0.0));
        assert_err!(vehicle.simulator_blueprint(&routing));

        vehicle.data.end = Some(Position::new(0.0, 0.001));
        assert_ok!(vehicle.simulator_blueprint(&routing));

        vehicle.speed = Some(0.0);
        assert_err!(vehicle.simulator_blueprint(&routing));
    }

    #[test]
    fn test_random_route_needs_an_area() {
        let vehicle: VehicleEntry = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "simulator": "RandomRouteSimulator"
        }))
        .unwrap();
        assert!(vehicle.simulator_blueprint(&RoutingSection::default()).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCENARIO.as_bytes()).unwrap();

        let scenario = ScenarioConfig::load(file.path()).unwrap();
        assert_eq!(scenario.vehicles.len(), 2);

        let missing = ScenarioConfig::load(Path::new("/nonexistent/config.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
