//! Manga Sync Server Library
//!
//! Keeps one manga library consistent across the devices of an account.
//! The main server binary is in main.rs.
//!
//! # Modules
//!
//! - `library`: library snapshot model and the last-writer-wins merge
//! - `sync`: sync coordinator, advisory locks and ETag blob storage
//! - `notify`: best-effort lifecycle notifications
//! - `routes`: the HTTP surface

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod notify;
pub mod routes;
pub mod state;
pub mod sync;
