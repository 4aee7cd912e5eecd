//! SML to MQTT bridge library
//!
//! Polls a smart meter's local HTTP endpoint for SML frames, decodes the OBIS
//! registers, and republishes the scaled readings as retained MQTT messages.
//! A liveness endpoint reports whether publishing is still making progress.

pub mod config;
pub mod dedup_gate;
pub mod frame_transformer;
pub mod health_server;
pub mod liveness;
pub mod meter_client;
pub mod mqtt_bus;
pub mod observability;
pub mod poll_loop;
pub mod publisher;
pub mod register;
pub mod sml_decoder;
pub mod sml_frame;

// Re-export commonly used types for easier access
pub use config::BridgeConfig;
pub use liveness::{LivenessStatus, LivenessTracker};
pub use meter_client::MeterClient;
pub use mqtt_bus::MqttBus;
pub use poll_loop::{CycleError, CycleOutcome, PollLoop};
pub use publisher::{MessageBus, SamplePublisher};
pub use register::Register;
pub use sml_decoder::{FrameDecoder, SmlDecoder};
