//! Formwork Kernel Library
//!
//! Form lifecycle, managed files and the HTTP integration. The `formwork`
//! binary serves the routes defined here.

pub mod config;
pub mod error;
pub mod file;
pub mod form;
pub mod routes;
pub mod session;
pub mod state;
