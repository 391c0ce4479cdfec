pub mod db;
pub mod error;
pub mod mealie;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod service;

pub use error::{Error, Result};
