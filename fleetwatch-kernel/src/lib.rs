//! FLEETWATCH KERNEL - live mirror of a remote fleet tree.
//!
//! Keeps a local copy (`FleetStore`) of the remote tree, derives the Device
//! (Online/Offline) and Audit views from it, and records user actions.
//!
//! Flow: `RemoteGateway` (MQTT or memory) -> `FleetStore` (watch) -> projections -> REST API.

pub mod audit;
pub mod commands;
pub mod config;
pub mod gateway;
pub mod health;
pub mod http;
pub mod models;
pub mod monitor;
pub mod projections;
pub mod state;
pub mod store;

pub use audit::AuditRecorder;
pub use commands::{CommandError, FleetCommands};
pub use gateway::{GatewayError, RemoteGateway, SharedGateway};
pub use models::{AuditEntry, DeviceStatus, DeviceView, FleetState};
pub use store::{FleetStore, StoreError};
