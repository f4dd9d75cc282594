pub mod commands;
pub mod config;
pub mod controller;
pub mod elapsed;
pub mod error;
pub mod irrigation;
pub mod light;
pub mod output;
pub mod store;
pub mod topics;
pub mod types;
pub mod ventilation;

pub use config::{
    ChannelPin, IrrigationConfig, LightConfig, NetworkConfig, OutputConfig, RuntimeConfig,
};
pub use controller::{Controller, ControllerState};
pub use elapsed::{ElapsedHours, ONE_HOUR_MS};
pub use error::{ControlError, DecodeError, StoreError};
pub use output::{execute_actions, Channel, EngineAction, OutputDriver};
pub use store::{ByteStore, MemoryStore, SettingsStore};
pub use topics::*;
pub use types::{ControllerStatus, InboundMessage, LightModel, LightProfile, OutboundMessage};
