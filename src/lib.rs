//! HexTask — a two-person task board and document library over a hosted
//! Postgres/REST backend.

pub mod auth;
pub mod cli;
pub mod config;
pub mod documents;
pub mod error;
pub mod store;
pub mod tasks;
pub mod users;
