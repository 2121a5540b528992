//! Temporada Backend Library
//!
//! Vacation-rental marketplace where cotistas (timeshare owners) publish
//! their weeks and customers book and pay for them. This library exports the
//! reservation lifecycle and the HTTP surface used by the server binary and
//! the integration tests.

pub mod admin;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod cotista;
pub mod db;
pub mod documents;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod payment;
pub mod reservation;
pub mod routes;
pub mod state;
pub mod storage;
pub mod store;
pub mod voucher;
pub mod websocket;
