//! Core types shared by every colonnade crate: the flexible value, the
//! error enum, and the runtime-mutable configuration registry.

pub mod config;
pub mod error;
pub mod value;

pub use config::{Config, ConfigValues};
pub use error::{ColonnadeError, ColonnadeResult};
pub use value::{CsvFormat, DateTimeValue, ImageData, ImageFormat, Value, ValueType};
