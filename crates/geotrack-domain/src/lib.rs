//! # Geotrack - Domain Model
//!
//! Value objects, status codes and change notifications shared by the
//! simulator engine, the vehicle entity and every connector. These types
//! are the single source of truth across all layers.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod events;
pub mod geo;

pub use events::{EventBus, Notification, NotificationKind, Subscription};

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Build a position, rejecting coordinates outside the WGS84 ranges.
    pub fn validated(latitude: f64, longitude: f64) -> Result<Self, DomainError> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if lat_ok && lon_ok {
            Ok(Self::new(latitude, longitude))
        } else {
            Err(DomainError::InvalidCoordinates {
                lat: latitude,
                lon: longitude,
            })
        }
    }

    /// Great-circle distance in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        geo::distance(self, other)
    }

    /// Stamp this position with a time.
    #[must_use]
    pub const fn at(self, timestamp: DateTime<Utc>) -> TimedPosition {
        TimedPosition {
            position: self,
            timestamp,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        // Bonn, Germany
        Self::new(DEFAULT_LATITUDE, DEFAULT_LONGITUDE)
    }
}

/// Fallback latitude used when a configuration omits a coordinate.
pub const DEFAULT_LATITUDE: f64 = 50.737_388_9;
/// Fallback longitude used when a configuration omits a coordinate.
pub const DEFAULT_LONGITUDE: f64 = 7.098_194_4;

/// Position snapshot with the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedPosition {
    #[serde(flatten)]
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

impl TimedPosition {
    pub const fn latitude(&self) -> f64 {
        self.position.latitude
    }

    pub const fn longitude(&self) -> f64 {
        self.position.longitude
    }

    /// Timestamp as Unix milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Ordered waypoints from a routing provider. An empty route means
/// no route could be obtained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(Vec<Position>);

impl Route {
    pub const fn new(points: Vec<Position>) -> Self {
        Self(points)
    }

    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn points(&self) -> &[Position] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<Position> {
        self.0.get(index).copied()
    }

    pub fn first(&self) -> Option<Position> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<Position> {
        self.0.last().copied()
    }

    /// Sum of the great-circle lengths of every segment, in meters.
    #[must_use]
    pub fn length_m(&self) -> f64 {
        self.0.windows(2).map(|w| geo::distance(&w[0], &w[1])).sum()
    }
}

impl From<Vec<Position>> for Route {
    fn from(points: Vec<Position>) -> Self {
        Self(points)
    }
}

/// Axis-aligned latitude/longitude box used to sample random destinations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Position,
    pub max: Position,
}

impl BoundingBox {
    /// Build a box from any two opposite corners.
    pub fn from_corners(a: Position, b: Position) -> Self {
        Self {
            min: Position::new(a.latitude.min(b.latitude), a.longitude.min(b.longitude)),
            max: Position::new(a.latitude.max(b.latitude), a.longitude.max(b.longitude)),
        }
    }

    /// Build a box that spans a non-empty area with valid corners.
    pub fn validated(a: Position, b: Position) -> Result<Self, DomainError> {
        Position::validated(a.latitude, a.longitude)?;
        Position::validated(b.latitude, b.longitude)?;
        let bbox = Self::from_corners(a, b);
        if bbox.min == bbox.max {
            return Err(DomainError::InvalidBoundingBox {
                min: bbox.min,
                max: bbox.max,
            });
        }
        Ok(bbox)
    }

    pub fn contains(&self, p: &Position) -> bool {
        (self.min.latitude..=self.max.latitude).contains(&p.latitude)
            && (self.min.longitude..=self.max.longitude).contains(&p.longitude)
    }

    /// Uniformly sample a position inside the box.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Position {
        let lat = rng.gen_range(0.0..=1.0) * (self.max.latitude - self.min.latitude);
        let lon = rng.gen_range(0.0..=1.0) * (self.max.longitude - self.min.longitude);
        Position::new(self.min.latitude + lat, self.min.longitude + lon)
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Radio status code of a unit, serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum UnitStatus {
    /// Free and reachable on the radio, also used while returning
    AvailableOnRadio,
    /// Waiting at the home station
    AtStation,
    /// Dispatched and driving to an incident
    Responding,
    /// Arrived at the incident
    OnScene,
    /// Not in service
    #[default]
    OutOfService,
}

impl UnitStatus {
    pub const fn code(self) -> u8 {
        match self {
            Self::AvailableOnRadio => 1,
            Self::AtStation => 2,
            Self::Responding => 3,
            Self::OnScene => 4,
            Self::OutOfService => 6,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AvailableOnRadio => "AVAILABLE_ON_RADIO",
            Self::AtStation => "AT_STATION",
            Self::Responding => "RESPONDING",
            Self::OnScene => "ON_SCENE",
            Self::OutOfService => "OUT_OF_SERVICE",
        }
    }
}

impl From<UnitStatus> for u8 {
    fn from(status: UnitStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for UnitStatus {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::AvailableOnRadio),
            2 => Ok(Self::AtStation),
            3 => Ok(Self::Responding),
            4 => Ok(Self::OnScene),
            6 => Ok(Self::OutOfService),
            other => Err(DomainError::UnknownStatus(other)),
        }
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Change notification published by a simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatorEvent {
    Position(TimedPosition),
    Status(UnitStatus),
    Route(Route),
    RouteFinished,
    Error(String),
}

impl Notification for SimulatorEvent {
    fn kind(&self) -> NotificationKind {
        match self {
            Self::Position(_) => NotificationKind::Position,
            Self::Status(_) => NotificationKind::Status,
            Self::Route(_) => NotificationKind::Route,
            Self::RouteFinished => NotificationKind::RouteFinished,
            Self::Error(_) => NotificationKind::Error,
        }
    }
}

/// A simulator notification re-published under an entity's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    pub entity_id: Uuid,
    pub event: SimulatorEvent,
}

impl Notification for EntityEvent {
    fn kind(&self) -> NotificationKind {
        self.event.kind()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Unknown unit status code: {0}")]
    UnknownStatus(u8),

    #[error("Degenerate bounding box: {min:?} .. {max:?}")]
    InvalidBoundingBox { min: Position, max: Position },
}
