//! `SQLite` persistence for Quill

mod connection;
mod migrations;

pub use connection::SqliteStore;
