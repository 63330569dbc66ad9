//! HTTP handlers for disaster-service.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod health;
pub mod metrics;
pub mod reports;
pub mod subscriptions;
