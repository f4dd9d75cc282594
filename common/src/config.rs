use serde::{Deserialize, Serialize};

use crate::{
    output::Channel,
    types::{LightModel, LightProfile},
};

/// Irrigation settings mirrored in the persisted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrrigationConfig {
    pub interval_days: u8,
    pub duration_seconds: u8,
    pub auto_irrigate: bool,
}

impl Default for IrrigationConfig {
    fn default() -> Self {
        Self {
            interval_days: 5,
            duration_seconds: 15,
            auto_irrigate: false,
        }
    }
}

impl IrrigationConfig {
    pub fn interval_hours(&self) -> u32 {
        u32::from(self.interval_days) * 24
    }

    pub fn duration_ms(&self) -> u64 {
        u64::from(self.duration_seconds) * 1_000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightConfig {
    pub model: LightModel,
    pub profile: LightProfile,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            model: LightModel::FourStage,
            profile: LightProfile::Vegetative,
        }
    }
}

/// One GPIO line driving a relay or MOSFET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPin {
    pub gpio: i32,
    pub active_low: bool,
}

impl ChannelPin {
    /// Electrical level (true = high) that realises the logical state.
    pub fn level(&self, on: bool) -> bool {
        on != self.active_low
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub light_led: ChannelPin,
    pub light_full_spectrum: ChannelPin,
    pub irrigation_pump: ChannelPin,
    pub ventilation: ChannelPin,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            light_led: ChannelPin {
                gpio: 27,
                active_low: true,
            },
            light_full_spectrum: ChannelPin {
                gpio: 25,
                active_low: false,
            },
            irrigation_pump: ChannelPin {
                gpio: 26,
                active_low: true,
            },
            ventilation: ChannelPin {
                gpio: 33,
                active_low: false,
            },
        }
    }
}

impl OutputConfig {
    pub fn pin(&self, channel: Channel) -> ChannelPin {
        match channel {
            Channel::LightLed => self.light_led,
            Channel::LightFullSpectrum => self.light_full_spectrum,
            Channel::IrrigationPump => self.irrigation_pump,
            Channel::Ventilation => self.ventilation,
        }
    }

    pub fn level(&self, channel: Channel, on: bool) -> bool {
        self.pin(channel).level(on)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Chat identity whose commands are obeyed and who receives notifications.
    pub owner_id: String,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub outputs: OutputConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    pub poll_interval_ms: u64,
    pub state_publish_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            owner_id: String::new(),
            light: LightConfig::default(),
            outputs: OutputConfig::default(),
            network: NetworkConfig::default(),
            poll_interval_ms: 200,
            state_publish_interval_ms: 10_000,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.owner_id = self.owner_id.trim().to_string();
        self.poll_interval_ms = self.poll_interval_ms.clamp(50, 5_000);
        self.state_publish_interval_ms = self.state_publish_interval_ms.clamp(1_000, 600_000);
    }
}
