//! Interval-based irrigation: pulses the pump in auto mode, otherwise sends a
//! single reminder per due period.

use crate::{
    commands,
    config::IrrigationConfig,
    elapsed::ElapsedHours,
    error::ControlError,
    output::{Channel, EngineAction},
    store::{ByteStore, Setting, SettingsStore},
};

pub const INTERVAL_USAGE: &str = "/intervaloirrigacao N (days between irrigations, 1-255)";
pub const DURATION_USAGE: &str = "/tempoirrigacao N (pump seconds per irrigation, 1-255)";

#[derive(Debug, Clone)]
pub struct IrrigationScheduler {
    config: IrrigationConfig,
    reminder_sent: bool,
}

impl IrrigationScheduler {
    pub fn new(config: IrrigationConfig) -> Self {
        Self {
            config,
            reminder_sent: false,
        }
    }

    pub fn config(&self) -> &IrrigationConfig {
        &self.config
    }

    pub fn reminder_sent(&self) -> bool {
        self.reminder_sent
    }

    pub fn is_due(&self, elapsed: &ElapsedHours) -> bool {
        elapsed.hours_since_irrigation() >= self.config.interval_hours()
    }

    pub fn hours_until_due(&self, elapsed: &ElapsedHours) -> u32 {
        self.config
            .interval_hours()
            .saturating_sub(elapsed.hours_since_irrigation())
    }

    pub fn check_and_irrigate(&mut self, elapsed: &mut ElapsedHours) -> Vec<EngineAction> {
        if !self.is_due(elapsed) {
            return Vec::new();
        }

        if self.config.auto_irrigate {
            return self.manual_irrigate(elapsed);
        }

        if self.reminder_sent {
            return Vec::new();
        }

        self.reminder_sent = true;
        vec![
            EngineAction::notify(format!(
                "Irrigation due. {}",
                last_irrigation_text(elapsed.hours_since_irrigation())
            )),
            EngineAction::Menu {
                text: "Irrigation options".to_string(),
                buttons: commands::irrigation_keyboard(self.config.auto_irrigate),
            },
        ]
    }

    /// Runs one pump pulse. The `Delay` blocks the whole control loop for the
    /// configured duration; nothing else is processed meanwhile.
    pub fn manual_irrigate(&mut self, elapsed: &mut ElapsedHours) -> Vec<EngineAction> {
        elapsed.reset_irrigation();
        self.reminder_sent = false;

        vec![
            EngineAction::output(Channel::IrrigationPump, true),
            EngineAction::Delay(self.config.duration_ms()),
            EngineAction::output(Channel::IrrigationPump, false),
            EngineAction::notify(format!(
                "Irrigation done ({} s).",
                self.config.duration_seconds
            )),
        ]
    }

    /// Records an irrigation done by hand, without driving the pump.
    pub fn acknowledge_irrigation(&mut self, elapsed: &mut ElapsedHours) -> Vec<EngineAction> {
        elapsed.reset_irrigation();
        self.reminder_sent = false;
        vec![EngineAction::notify("Irrigation recorded.")]
    }

    pub fn set_interval<S: ByteStore>(
        &mut self,
        days: i64,
        store: &mut SettingsStore<S>,
    ) -> Result<Vec<EngineAction>, ControlError> {
        let days = to_slot_value(days, "irrigation interval", INTERVAL_USAGE)?;
        store.write(Setting::IrrigationInterval, days)?;
        self.config.interval_days = days;
        Ok(vec![EngineAction::notify(format!(
            "Irrigation interval set to {days} days."
        ))])
    }

    pub fn set_duration<S: ByteStore>(
        &mut self,
        seconds: i64,
        store: &mut SettingsStore<S>,
    ) -> Result<Vec<EngineAction>, ControlError> {
        let seconds = to_slot_value(seconds, "irrigation duration", DURATION_USAGE)?;
        store.write(Setting::IrrigationDuration, seconds)?;
        self.config.duration_seconds = seconds;
        Ok(vec![EngineAction::notify(format!(
            "Irrigation duration set to {seconds} seconds."
        ))])
    }

    pub fn set_auto_irrigate<S: ByteStore>(
        &mut self,
        enabled: bool,
        store: &mut SettingsStore<S>,
    ) -> Result<Vec<EngineAction>, ControlError> {
        store.write(Setting::AutoIrrigate, u8::from(enabled))?;
        self.config.auto_irrigate = enabled;
        Ok(vec![EngineAction::notify(if enabled {
            "Auto-irrigation enabled."
        } else {
            "Auto-irrigation disabled."
        })])
    }
}

fn to_slot_value(
    value: i64,
    setting: &'static str,
    usage: &'static str,
) -> Result<u8, ControlError> {
    match u8::try_from(value) {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ControlError::InvalidValue { setting, usage }),
    }
}

/// Extracts `N` from `<prefix> N`.
///
/// The text must be strictly longer than `prefix + " "`, contain that exact
/// substring (case-insensitively) and end in a positive integer.
pub fn parse_numeric_argument(
    text: &str,
    prefix: &str,
    setting: &'static str,
    usage: &'static str,
) -> Result<i64, ControlError> {
    let invalid = || ControlError::InvalidValue { setting, usage };

    let needle = format!("{} ", prefix.to_ascii_lowercase());
    let lower = text.to_ascii_lowercase();
    if lower.len() <= needle.len() {
        return Err(invalid());
    }

    let start = lower.find(&needle).ok_or_else(invalid)?;
    let value: i64 = text[start + needle.len()..]
        .trim()
        .parse()
        .map_err(|_| invalid())?;

    if value <= 0 {
        return Err(invalid());
    }
    Ok(value)
}

pub fn last_irrigation_text(hours: u32) -> String {
    format!(
        "Last irrigation {} days and {} hours ago.",
        hours / 24,
        hours % 24
    )
}
