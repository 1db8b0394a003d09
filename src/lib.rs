//! # siteclock
//!
//! Attendance tracking for field crews. Field workers clock in by photo: the
//! photo goes through an asynchronous protective-equipment check, and the
//! clock-in only exists once the check passes. Office staff and admins clock
//! in directly. Every clock-in and project change leaves an address snapshot
//! in the history tables.
//!
//! The library is laid out bottom-up:
//!
//! - pure rules: [`clockin`], [`project`], [`history`], [`hours`], [`auth`]
//! - storage: [`db`] (PostgreSQL), [`ephemeral`] (job store), [`photos`]
//! - the detection pipeline: [`detection`]
//! - runtime: [`scheduler`], [`server`], [`prom_metrics`], [`config`]

pub mod auth;
pub mod clockin;
pub mod config;
pub mod db;
pub mod detection;
pub mod ephemeral;
pub mod error;
pub mod history;
pub mod hours;
pub mod models;
pub mod photos;
pub mod project;
pub mod prom_metrics;
pub mod scheduler;
pub mod server;

pub use error::{Result, WorkflowError};
