use thiserror::Error;

/// Failure reported by a [`ByteStore`](crate::store::ByteStore) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Why an inbound chat payload was dropped before reaching the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload of {0} bytes exceeds the inbound limit")]
    Oversized(usize),
    #[error("malformed chat message: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("unknown light cycle `{0}`")]
    InvalidProfile(String),
    #[error("invalid value for {setting}")]
    InvalidValue {
        setting: &'static str,
        usage: &'static str,
    },
    #[error("settings could not be saved: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("messaging endpoint unavailable")]
    EndpointUnavailable,
}

impl ControlError {
    /// Text sent back to the chat user when a command is rejected.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidProfile(name) => format!(
                "Unknown light cycle `{name}`. Use /ger (16/8), /veg (18/6) or /flor (12/12)."
            ),
            Self::InvalidValue { usage, .. } => format!("Invalid value. Usage: {usage}"),
            Self::StoreUnavailable(_) => {
                "Settings could not be saved; nothing was changed.".to_string()
            }
            Self::EndpointUnavailable => "Messaging endpoint unavailable.".to_string(),
        }
    }
}
