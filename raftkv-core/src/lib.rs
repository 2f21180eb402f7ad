#[macro_use]
extern crate slog;

pub mod error;
pub mod logger;
