use crate::output::{Channel, EngineAction};

#[derive(Debug, Clone, Default)]
pub struct Ventilation {
    on: bool,
}

impl Ventilation {
    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn startup_actions(&self) -> Vec<EngineAction> {
        vec![EngineAction::output(Channel::Ventilation, self.on)]
    }

    pub fn turn_on(&mut self) -> Vec<EngineAction> {
        self.on = true;
        vec![
            EngineAction::output(Channel::Ventilation, true),
            EngineAction::notify("Ventilation on."),
        ]
    }

    pub fn turn_off(&mut self) -> Vec<EngineAction> {
        self.on = false;
        vec![
            EngineAction::output(Channel::Ventilation, false),
            EngineAction::notify("Ventilation off."),
        ]
    }

    pub fn status_text(&self) -> &'static str {
        if self.on {
            "Ventilation is on."
        } else {
            "Ventilation is off."
        }
    }
}
