pub mod alert_service;
pub mod alerts;
pub mod auth;
pub mod chat;
pub mod error;
pub mod store;
pub mod users;
