mod gemini;
mod ort_service;
mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;
pub mod disease;
pub mod image_utils;
pub mod model_service;
pub mod recommendation;
pub mod report;

pub use app::start_app;
