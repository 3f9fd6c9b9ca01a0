mod routes;

pub mod class_mapper;
pub mod config;
pub mod detection;
pub mod frame;
pub mod gateway;
pub mod inference_service;
pub mod message;
pub mod model_service;
pub mod ort_service;
pub mod server;
pub mod session;
pub mod telemetry;

pub use server::start_server;
