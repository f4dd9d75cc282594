//! Chat command vocabulary, keyboards and status texts.

use crate::{
    controller::ControllerState,
    error::ControlError,
    irrigation::{self, DURATION_USAGE, INTERVAL_USAGE},
    output::Keyboard,
    types::LightProfile,
};

pub const CMD_SET_INTERVAL: &str = "/intervaloirrigacao";
pub const CMD_SET_DURATION: &str = "/tempoirrigacao";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Menu,
    Commands,
    Status,
    LightMenu,
    LightCycle,
    LightOn,
    LightOff,
    SelectProfile(LightProfile),
    IrrigationMenu,
    Irrigate,
    Irrigated,
    AutoIrrigateOn,
    AutoIrrigateOff,
    SetInterval(i64),
    SetDuration(i64),
    VentilationMenu,
    VentilationOn,
    VentilationOff,
    Unknown,
}

impl Command {
    /// Verbs match case-insensitively. Only the numeric setters can fail; a
    /// bad argument yields `InvalidValue` carrying the usage hint.
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        let trimmed = text.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower.starts_with(CMD_SET_INTERVAL) {
            return irrigation::parse_numeric_argument(
                trimmed,
                CMD_SET_INTERVAL,
                "irrigation interval",
                INTERVAL_USAGE,
            )
            .map(Self::SetInterval);
        }
        if lower.starts_with(CMD_SET_DURATION) {
            return irrigation::parse_numeric_argument(
                trimmed,
                CMD_SET_DURATION,
                "irrigation duration",
                DURATION_USAGE,
            )
            .map(Self::SetDuration);
        }

        Ok(match lower.as_str() {
            "/menu" | "/start" => Self::Menu,
            "/comandos" => Self::Commands,
            "/status" => Self::Status,
            "/luz" => Self::LightMenu,
            "/ciclo" => Self::LightCycle,
            "/ligaluz" => Self::LightOn,
            "/desligaluz" => Self::LightOff,
            "/ger" => Self::SelectProfile(LightProfile::Germination),
            "/veg" => Self::SelectProfile(LightProfile::Vegetative),
            "/flor" => Self::SelectProfile(LightProfile::Flowering),
            "/irrigacao" => Self::IrrigationMenu,
            "/irrigar" => Self::Irrigate,
            "/irrigado" => Self::Irrigated,
            "/ligaautoirrigacao" => Self::AutoIrrigateOn,
            "/desligaautoirrigacao" => Self::AutoIrrigateOff,
            "/coolers" => Self::VentilationMenu,
            "/ligacoolers" => Self::VentilationOn,
            "/desligacoolers" => Self::VentilationOff,
            _ => Self::Unknown,
        })
    }
}

pub const COMMAND_HELP: &str = "\
/menu - main menu
/status - full status report
/luz - light menu
/ligaluz - turn the light on
/desligaluz - turn the light off
/ciclo - current light cycle
/ger - germination (16/8)
/veg - vegetative (18/6)
/flor - flowering (12/12)
/irrigacao - irrigation menu
/irrigar - irrigate now
/irrigado - record a manual irrigation
/ligaautoirrigacao - enable auto-irrigation
/desligaautoirrigacao - disable auto-irrigation
/intervaloirrigacao N - days between irrigations
/tempoirrigacao N - pump seconds per irrigation
/coolers - ventilation menu
/ligacoolers - ventilation on
/desligacoolers - ventilation off";

pub fn main_keyboard() -> Keyboard {
    vec![
        vec!["/status"],
        vec!["/luz"],
        vec!["/irrigacao"],
        vec!["/coolers"],
        vec!["/comandos"],
    ]
}

pub fn fallback_keyboard() -> Keyboard {
    vec![vec!["/menu"], vec!["/comandos"]]
}

pub fn light_keyboard(light_on: bool) -> Keyboard {
    vec![
        vec![if light_on { "/desligaluz" } else { "/ligaluz" }],
        vec!["/ciclo"],
        vec!["/ger", "/veg", "/flor"],
        vec!["/menu"],
    ]
}

pub fn irrigation_keyboard(auto_irrigate: bool) -> Keyboard {
    vec![
        vec!["/irrigado"],
        vec!["/irrigar"],
        vec![if auto_irrigate {
            "/desligaautoirrigacao"
        } else {
            "/ligaautoirrigacao"
        }],
        vec!["/menu"],
    ]
}

pub fn ventilation_keyboard(on: bool) -> Keyboard {
    vec![
        vec![if on { "/desligacoolers" } else { "/ligacoolers" }],
        vec!["/menu"],
    ]
}

pub fn light_status_text(state: &ControllerState) -> String {
    let light = &state.light;
    format!(
        "Light {} ({}) for {} hours\n{} hours until the next change",
        if light.is_light_on() { "on" } else { "off" },
        light.stage().name,
        state.elapsed.hours_since_light_change(),
        light.hours_until_change(&state.elapsed)
    )
}

pub fn irrigation_status_text(state: &ControllerState, include_next: bool) -> String {
    let irrigation = &state.irrigation;
    let config = irrigation.config();
    let mut text = irrigation::last_irrigation_text(state.elapsed.hours_since_irrigation());

    if include_next {
        let remaining = irrigation.hours_until_due(&state.elapsed);
        text.push_str(&format!(
            "\n{} days and {} hours until the next irrigation.",
            remaining / 24,
            remaining % 24
        ));
    }

    text.push_str(&format!(
        "\nInterval {} days, pump {} s, auto-irrigation {}.",
        config.interval_days,
        config.duration_seconds,
        if config.auto_irrigate { "on" } else { "off" }
    ));
    text
}

pub fn status_report(state: &ControllerState) -> String {
    format!(
        "Cycle: {}\n{}\n{}\n{}",
        state.light.profile().label(),
        light_status_text(state),
        irrigation_status_text(state, true),
        state.ventilation.status_text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(Command::parse("/LigaLuz").unwrap(), Command::LightOn);
        assert_eq!(
            Command::parse(" /FLOR ").unwrap(),
            Command::SelectProfile(LightProfile::Flowering)
        );
        assert_eq!(
            Command::parse("/ligaAutoIrrigacao").unwrap(),
            Command::AutoIrrigateOn
        );
        assert_eq!(Command::parse("hello").unwrap(), Command::Unknown);
    }

    #[test]
    fn numeric_setters_carry_usage_hint() {
        assert_eq!(
            Command::parse("/intervaloirrigacao 3").unwrap(),
            Command::SetInterval(3)
        );
        assert_eq!(
            Command::parse("/TempoIrrigacao 20").unwrap(),
            Command::SetDuration(20)
        );

        let err = Command::parse("/intervaloirrigacao abc").unwrap_err();
        assert_eq!(
            err,
            ControlError::InvalidValue {
                setting: "irrigation interval",
                usage: INTERVAL_USAGE,
            }
        );
        assert!(err.user_message().contains("/intervaloirrigacao N"));

        assert!(Command::parse("/tempoirrigacao").is_err());
    }

    #[test]
    fn keyboards_offer_the_opposite_action() {
        assert_eq!(light_keyboard(true)[0], vec!["/desligaluz"]);
        assert_eq!(irrigation_keyboard(false)[2], vec!["/ligaautoirrigacao"]);
        assert_eq!(ventilation_keyboard(true)[0], vec!["/desligacoolers"]);
    }
}
