//! # Orchestrator
//!
//! Builds connectors, vehicles and simulators from a scenario and runs
//! their lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use geotrack_persistence::DuckDbPositionRepository;
use geotrack_simulator::{OsrmClient, SharedRouteProvider, Simulator, Vehicle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveConnector;
use crate::config::{ConnectorSettings, EnvConfig, ScenarioConfig};
use crate::connector::SharedConnector;
use crate::error::{ConfigError, Result};
use crate::websocket::WebSocketConnector;

struct ManagedVehicle {
    vehicle: Vehicle,
    simulator: Simulator,
}

/// Owns every runtime object of a scenario.
pub struct Orchestrator {
    connectors: Vec<SharedConnector>,
    vehicles: Vec<ManagedVehicle>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("connectors", &self.connectors.iter().map(|c| c.id()).collect::<Vec<_>>())
            .field("vehicles", &self.vehicles.iter().map(|v| v.vehicle.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl Orchestrator {
    /// Build everything with one OSRM client per distinct routing server.
    pub fn from_config(scenario: &ScenarioConfig, env: &EnvConfig) -> Result<Self> {
        let mut clients: HashMap<String, SharedRouteProvider> = HashMap::new();
        Self::with_provider(scenario, env, |server_url| {
            Arc::clone(
                clients
                    .entry(server_url.to_string())
                    .or_insert_with(|| Arc::new(OsrmClient::new(server_url))),
            )
        })
    }

    /// Build everything, asking `provider` for the routing provider of
    /// each vehicle's server url.
    pub fn with_provider<F>(scenario: &ScenarioConfig, env: &EnvConfig, mut provider: F) -> Result<Self>
    where
        F: FnMut(&str) -> SharedRouteProvider,
    {
        let mut connectors: Vec<SharedConnector> = Vec::new();
        for entry in &scenario.connectors {
            if connectors.iter().any(|c| c.id() == entry.id) {
                return Err(ConfigError::DuplicateId {
                    kind: "connector",
                    id: entry.id.clone(),
                }
                .into());
            }
            let connector: SharedConnector = match entry.settings()? {
                ConnectorSettings::WebSocket(config) => {
                    info!(connector_id = %entry.id, url = %config.url, "Configuring WebSocket connector");
                    Arc::new(WebSocketConnector::new(entry.id.clone(), config))
                }
                ConnectorSettings::Archive(config) => {
                    info!(connector_id = %entry.id, path = ?config.path, "Configuring archive connector");
                    let repository = DuckDbPositionRepository::open(&config)?;
                    Arc::new(ArchiveConnector::new(entry.id.clone(), Arc::new(repository)))
                }
            };
            connectors.push(connector);
        }

        let mut vehicles: Vec<ManagedVehicle> = Vec::new();
        for entry in &scenario.vehicles {
            if !entry.enabled {
                info!(entity_id = %entry.id, "Vehicle disabled, skipping");
                continue;
            }
            if vehicles.iter().any(|v| v.vehicle.id() == entry.id) {
                return Err(ConfigError::DuplicateId {
                    kind: "vehicle",
                    id: entry.id.to_string(),
                }
                .into());
            }

            let blueprint = entry.simulator_blueprint(&scenario.routing)?;
            let server_url = entry.server_url(&scenario.routing, &env.osrm_url);
            let simulator = blueprint.build(provider(&server_url));
            let vehicle = Vehicle::new(entry.id);
            info!(
                entity_id = %entry.id,
                simulator = simulator.kind(),
                server_url = %server_url,
                "Configured vehicle"
            );

            for connector_id in &entry.connectors {
                match connectors.iter().find(|c| c.id() == connector_id) {
                    Some(connector) => {
                        connector.attach(&vehicle);
                    }
                    None => {
                        let err = ConfigError::UnknownConnector {
                            vehicle: entry.id.to_string(),
                            connector: connector_id.clone(),
                        };
                        warn!(entity_id = %entry.id, error = %err, "Skipping connector reference");
                    }
                }
            }

            vehicles.push(ManagedVehicle { vehicle, simulator });
        }

        Ok(Self {
            connectors,
            vehicles,
        })
    }

    pub fn connectors(&self) -> &[SharedConnector] {
        &self.connectors
    }

    pub fn connector(&self, id: &str) -> Option<&SharedConnector> {
        self.connectors.iter().find(|c| c.id() == id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter().map(|v| &v.vehicle)
    }

    pub fn vehicle(&self, id: Uuid) -> Option<&Vehicle> {
        self.vehicles().find(|v| v.id() == id)
    }

    /// Connect every connector, then set up and start every vehicle.
    ///
    /// Failures are logged and skipped; returns how many vehicles run.
    pub async fn start(&self) -> usize {
        for connector in &self.connectors {
            if let Err(err) = connector.connect().await {
                warn!(connector_id = %connector.id(), error = %err, "Connector failed to connect");
            }
        }

        let setups = self.vehicles.iter().map(|managed| async move {
            let vehicle = &managed.vehicle;
            if let Err(err) = vehicle.setup(managed.simulator.clone()).await {
                error!(entity_id = %vehicle.id(), error = %err, "Vehicle setup failed, skipping");
                return false;
            }
            match vehicle.start() {
                Ok(()) => {
                    info!(entity_id = %vehicle.id(), "{}", vehicle.info());
                    true
                }
                Err(err) => {
                    error!(entity_id = %vehicle.id(), error = %err, "Vehicle failed to start");
                    false
                }
            }
        });
        let started = join_all(setups).await.into_iter().filter(|ok| *ok).count();

        info!(
            started,
            total = self.vehicles.len(),
            connectors = self.connectors.len(),
            "Simulation running"
        );
        started
    }

    /// Stop every vehicle, then detach and disconnect every connector.
    pub async fn shutdown(&self) {
        for managed in &self.vehicles {
            managed.vehicle.teardown();
        }
        for connector in &self.connectors {
            for entity_id in connector.attached() {
                connector.detach(entity_id);
            }
            if let Err(err) = connector.disconnect().await {
                warn!(connector_id = %connector.id(), error = %err, "Connector failed to disconnect");
            }
        }
        info!("Simulation stopped");
    }
}
