use serde::{Deserialize, Serialize};

use crate::{
    error::{ControlError, DecodeError},
    topics::MAX_INBOUND_PAYLOAD,
};

/// Photoperiod preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightProfile {
    Germination,
    Vegetative,
    Flowering,
}

impl LightProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Germination => "germination",
            Self::Vegetative => "vegetative",
            Self::Flowering => "flowering",
        }
    }

    /// Hours of light per 24h day.
    pub fn light_hours(self) -> u32 {
        match self {
            Self::Germination => 16,
            Self::Vegetative => 18,
            Self::Flowering => 12,
        }
    }

    pub fn label(self) -> String {
        format!(
            "{} ({}/{})",
            self.as_str(),
            self.light_hours(),
            24 - self.light_hours()
        )
    }

    /// Accepts the full name or the chat shorthand (`ger`, `veg`, `flor`).
    pub fn from_name(name: &str) -> Result<Self, ControlError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "germination" | "ger" => Ok(Self::Germination),
            "vegetative" | "veg" => Ok(Self::Vegetative),
            "flowering" | "flor" => Ok(Self::Flowering),
            _ => Err(ControlError::InvalidProfile(name.trim().to_string())),
        }
    }
}

/// Number of stages the light cycle runs through per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LightModel {
    /// ON, OFF.
    TwoPhase,
    /// LED only, LED + full spectrum, LED only, all off.
    FourStage,
}

impl LightModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TwoPhase => "two-phase",
            Self::FourStage => "four-stage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
}

impl InboundMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() > MAX_INBOUND_PAYLOAD {
            return Err(DecodeError::Oversized(payload.len()));
        }
        serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Vec<Vec<String>>>,
}

impl OutboundMessage {
    pub fn text(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(
        recipient: impl Into<String>,
        text: impl Into<String>,
        buttons: &[Vec<&'static str>],
    ) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            keyboard: Some(
                buttons
                    .iter()
                    .map(|row| row.iter().map(|button| (*button).to_string()).collect())
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "lightProfile")]
    pub light_profile: &'static str,
    #[serde(rename = "lightModel")]
    pub light_model: &'static str,
    #[serde(rename = "lightStage")]
    pub light_stage: usize,
    #[serde(rename = "lightStageName")]
    pub light_stage_name: &'static str,
    #[serde(rename = "lightOn")]
    pub light_on: bool,
    #[serde(rename = "stageDurations")]
    pub stage_durations: Vec<u32>,
    #[serde(rename = "hoursSinceLightChange")]
    pub hours_since_light_change: u32,
    #[serde(rename = "hoursUntilLightChange")]
    pub hours_until_light_change: u32,
    #[serde(rename = "hoursSinceIrrigation")]
    pub hours_since_irrigation: u32,
    #[serde(rename = "hoursUntilIrrigation")]
    pub hours_until_irrigation: u32,
    #[serde(rename = "irrigationIntervalDays")]
    pub irrigation_interval_days: u8,
    #[serde(rename = "irrigationDurationSeconds")]
    pub irrigation_duration_seconds: u8,
    #[serde(rename = "autoIrrigate")]
    pub auto_irrigate: bool,
    #[serde(rename = "reminderSent")]
    pub reminder_sent: bool,
    #[serde(rename = "ventilationOn")]
    pub ventilation_on: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_shorthands() {
        assert_eq!(
            LightProfile::from_name("Flowering").unwrap(),
            LightProfile::Flowering
        );
        assert_eq!(LightProfile::from_name("ger").unwrap(), LightProfile::Germination);
        assert_eq!(LightProfile::from_name(" VEG ").unwrap(), LightProfile::Vegetative);
    }

    #[test]
    fn rejects_unknown_profile() {
        assert_eq!(
            LightProfile::from_name("autoflower"),
            Err(ControlError::InvalidProfile("autoflower".to_string()))
        );
    }

    #[test]
    fn decodes_inbound_chat_payload() {
        let message = InboundMessage::decode(br#"{"sender":"7","text":"/status"}"#).unwrap();
        assert_eq!(message.sender, "7");
        assert_eq!(message.text, "/status");

        assert!(matches!(
            InboundMessage::decode(b"not json"),
            Err(DecodeError::Malformed(_))
        ));

        let oversized = vec![b' '; MAX_INBOUND_PAYLOAD + 1];
        assert_eq!(
            InboundMessage::decode(&oversized),
            Err(DecodeError::Oversized(MAX_INBOUND_PAYLOAD + 1))
        );
    }

    #[test]
    fn outbound_without_keyboard_omits_field() {
        let json = serde_json::to_string(&OutboundMessage::text("1", "hi")).unwrap();
        assert_eq!(json, r#"{"recipient":"1","text":"hi"}"#);
    }
}
