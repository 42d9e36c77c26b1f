//! Asynchronous content moderation pipeline
//!
//! Submissions are accepted synchronously over HTTP, fanned out to a durable
//! dispatch queue, and evaluated by a pool of workers that call an external
//! moderation classifier and store an idempotent verdict per content id.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
