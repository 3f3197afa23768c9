//! Actor-based station core
//!
//! Each stateful component runs as an independent task that owns its state and
//! is driven through an mpsc command channel. Results of commands come back on
//! oneshot channels; everything observers should see is published once to the
//! [`BroadcastHub`](crate::hub::BroadcastHub).
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌────────────────────┐
//!                 │  station-hub main  │
//!                 └─────────┬──────────┘
//!                           │ spawns
//!         ┌─────────────────┼──────────────────┐
//!         │                 │                  │
//! ┌───────▼───────┐ ┌───────▼───────┐ ┌────────▼────────┐
//! │ DeviceActor   │ │ DeviceActor   │ │ HealthMonitor   │
//! │ (measurement) │ │ (position)    │ │ Actor           │
//! └───────┬───────┘ └───────┬───────┘ └────────┬────────┘
//!         │                 │                  │
//!         └─────────────────┼──────────────────┘
//!                           │ emit
//!                 ┌─────────▼──────────┐
//!                 │   BroadcastHub     │──► observers (websocket)
//!                 └────────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **DeviceActor**: connection state of one serial peripheral, single-flight
//!   connects, bounded reconnection
//! - **HealthMonitorActor**: samples the host and classifies it against the
//!   platform profile

pub mod device;
pub mod health;
pub mod messages;
