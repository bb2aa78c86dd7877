//! Herdwatch - farm-scoped cattle health monitoring.
//!
//! # Overview
//!
//! Each farm tracks a set of cattle. Every health reading (body temperature,
//! heart rate, sleeping and lying-down duration) is labelled healthy or at
//! risk by an external prediction service, counted against the animal, and
//! folded into a rolling status. Farms carry derived healthy/at-risk counts
//! that are recomputed after every change.
//!
//! # Modules
//!
//! - [`model`]: Records, request bodies, and the reading tally
//! - [`storage`]: SQLite record store
//! - [`classifier`]: Prediction service client and fallback policy
//! - [`aggregation`]: Per-animal health aggregation and farm reconciliation
//! - [`cache`]: Bounded latest-prediction cache
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment configuration
//! - [`error`]: Error types

pub mod aggregation;
pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
