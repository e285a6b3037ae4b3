//! Database module
//!
//! This module provides database management functionality including:
//! - Database connection pool management
//! - Database migrations for the addon status table

pub mod manager;
pub mod migrations;

pub use manager::DatabaseManager;
