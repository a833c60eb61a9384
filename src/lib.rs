pub mod config;
pub mod controller;
pub mod domain;
pub mod forecast;
pub mod health;
pub mod ml;
pub mod optimizer;
pub mod stats;
pub mod telemetry;
