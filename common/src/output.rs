//! Output vocabulary shared by every engine.
//!
//! Engines never touch pins or the network. They return [`EngineAction`]s and
//! the target executes them in order through an [`OutputDriver`].

use serde::{Deserialize, Serialize};

use crate::types::OutboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    LightLed,
    LightFullSpectrum,
    IrrigationPump,
    Ventilation,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Self::LightLed,
        Self::LightFullSpectrum,
        Self::IrrigationPump,
        Self::Ventilation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LightLed => "light-led",
            Self::LightFullSpectrum => "light-full-spectrum",
            Self::IrrigationPump => "irrigation-pump",
            Self::Ventilation => "ventilation",
        }
    }
}

/// Rows of command buttons rendered as a chat keyboard.
pub type Keyboard = Vec<Vec<&'static str>>;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Output { channel: Channel, on: bool },
    /// Blocks the control loop for the given number of milliseconds.
    Delay(u64),
    Notify(String),
    Menu { text: String, buttons: Keyboard },
    Reply { recipient: String, text: String },
}

impl EngineAction {
    pub fn output(channel: Channel, on: bool) -> Self {
        Self::Output { channel, on }
    }

    pub fn notify(text: impl Into<String>) -> Self {
        Self::Notify(text.into())
    }
}

/// Capability the controller needs from the board: switch a logical channel
/// and block the loop.
pub trait OutputDriver {
    fn set_channel(&mut self, channel: Channel, on: bool);

    fn block_for(&mut self, duration_ms: u64);
}

/// Runs actions in order and returns the messages that should go out to the
/// messaging endpoint. `Notify` and `Menu` are addressed to `owner_id`.
pub fn execute_actions<D: OutputDriver + ?Sized>(
    actions: Vec<EngineAction>,
    driver: &mut D,
    owner_id: &str,
) -> Vec<OutboundMessage> {
    let mut outbound = Vec::new();

    for action in actions {
        match action {
            EngineAction::Output { channel, on } => driver.set_channel(channel, on),
            EngineAction::Delay(ms) => driver.block_for(ms),
            EngineAction::Notify(text) => outbound.push(OutboundMessage::text(owner_id, text)),
            EngineAction::Menu { text, buttons } => {
                outbound.push(OutboundMessage::with_keyboard(owner_id, text, &buttons));
            }
            EngineAction::Reply { recipient, text } => {
                outbound.push(OutboundMessage::text(recipient, text));
            }
        }
    }

    outbound
}
