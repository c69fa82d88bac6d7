//! Building blocks for marketing-data ETL jobs: spreadsheet tabs, warehouse
//! schema coercion, browser sessions for scraping, alert mail and a few
//! filesystem helpers. Remote calls that are safe to repeat go through a
//! fixed-delay [`RetryPolicy`].

pub mod auth;
pub mod browser;
pub mod config;
pub mod error;
pub mod logging;
pub mod mail;
pub mod processing;
pub mod retry;
pub mod sheets;
pub mod system;
pub mod table;
pub mod warehouse;

pub use config::Config;
pub use error::{QuatiError, Result};
pub use retry::RetryPolicy;
pub use table::{Cell, Column, Keep, Table};
