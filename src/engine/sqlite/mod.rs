// SQLite engine - rusqlite-backed implementation of the engine seam
//
// - config: engine options and the `Engine` impl that opens connections
// - connection: blocking connection with interrupt, timeout and statement cache
// - params: conversion from dispatcher values to rusqlite values
// - query: statement binding and result extraction

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{SqliteEngine, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
