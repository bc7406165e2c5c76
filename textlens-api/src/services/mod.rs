//! Artifact and user services.
//!
//! The protocols every route runs through: read-through lookup, idempotent
//! create, update and delete for artifacts, and account management for
//! users. Routes stay thin and map results to HTTP.

pub mod artifact_service;
pub mod single_flight;
pub mod user_service;

pub use artifact_service::{ArtifactService, CreateOutcome, EphemeralResult};
pub use single_flight::{FlightGuard, SingleFlight};
pub use user_service::UserService;
