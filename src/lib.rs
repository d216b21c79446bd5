//! # hermes
//!
//! Fate-driven labor tracking for fleets of hosts.
//!
//! Hosts report events. A rulebook of fates says which events open a labor
//! and which later event closes it, possibly chaining through several stages.
//! Quests group labors and complete when the last one does. Every committed
//! change is announced on a notice stream for external delivery.

pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod model;
pub mod notice;
pub mod registry;
pub mod telemetry;
