//! The control-loop aggregate.
//!
//! One [`Controller`] owns every counter and flag. A loop pass is
//! `handle_message` for each queued inbound command followed by one `poll`.

use crate::{
    commands::{self, Command},
    config::{IrrigationConfig, LightConfig},
    elapsed::ElapsedHours,
    error::{ControlError, StoreError},
    irrigation::IrrigationScheduler,
    light::LightCycle,
    output::{Channel, EngineAction},
    store::{ByteStore, SettingsStore},
    types::ControllerStatus,
    ventilation::Ventilation,
};

pub const NOT_AUTHORISED_REPLY: &str = "This grow box only answers its owner.";

/// Light state is not persisted: a reboot always restarts at stage 0.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub elapsed: ElapsedHours,
    pub light: LightCycle,
    pub irrigation: IrrigationScheduler,
    pub ventilation: Ventilation,
}

impl ControllerState {
    pub fn new(light: LightConfig, irrigation: IrrigationConfig, now_ms: u64) -> Self {
        Self {
            elapsed: ElapsedHours::new(now_ms),
            light: LightCycle::new(light.model, light.profile),
            irrigation: IrrigationScheduler::new(irrigation),
            ventilation: Ventilation::default(),
        }
    }
}

pub struct Controller<S> {
    state: ControllerState,
    store: SettingsStore<S>,
    owner_id: String,
    greeted: bool,
}

impl<S: ByteStore> Controller<S> {
    /// Heals the settings store and loads the irrigation config from it.
    pub fn boot(
        light: LightConfig,
        owner_id: impl Into<String>,
        backend: S,
        now_ms: u64,
    ) -> Result<Self, StoreError> {
        let mut store = SettingsStore::new(backend);
        let irrigation = store.init_defaults()?;
        Ok(Self::new(light, owner_id, store, irrigation, now_ms))
    }

    pub fn new(
        light: LightConfig,
        owner_id: impl Into<String>,
        store: SettingsStore<S>,
        irrigation: IrrigationConfig,
        now_ms: u64,
    ) -> Self {
        Self {
            state: ControllerState::new(light, irrigation, now_ms),
            store,
            owner_id: owner_id.into(),
            greeted: false,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn store(&self) -> &SettingsStore<S> {
        &self.store
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn into_store(self) -> SettingsStore<S> {
        self.store
    }

    /// Output pattern applied once at boot: stage 0 lights, pump and
    /// ventilation off.
    pub fn startup_actions(&self) -> Vec<EngineAction> {
        let mut actions = self.state.light.startup_actions();
        actions.push(EngineAction::output(Channel::IrrigationPump, false));
        actions.extend(self.state.ventilation.startup_actions());
        actions
    }

    /// Called whenever the messaging endpoint (re)connects.
    pub fn endpoint_connected(&mut self) -> Vec<EngineAction> {
        if self.greeted {
            return vec![EngineAction::notify("Connection restored.")];
        }

        self.greeted = true;
        vec![
            EngineAction::notify("--- GrowBox active ---"),
            EngineAction::Menu {
                text: "Choose an option".to_string(),
                buttons: commands::main_keyboard(),
            },
        ]
    }

    /// Light plan refresh, hour tick, light check, irrigation check.
    pub fn poll(&mut self, now_ms: u64) -> Vec<EngineAction> {
        let state = &mut self.state;

        state.light.recompute_plan();
        state.elapsed.tick(now_ms);

        let mut actions = state.light.check(&mut state.elapsed);
        actions.extend(state.irrigation.check_and_irrigate(&mut state.elapsed));
        actions
    }

    pub fn handle_message(&mut self, sender: &str, text: &str) -> Vec<EngineAction> {
        if sender != self.owner_id {
            return vec![EngineAction::Reply {
                recipient: sender.to_string(),
                text: NOT_AUTHORISED_REPLY.to_string(),
            }];
        }

        match Command::parse(text).and_then(|command| self.dispatch(command)) {
            Ok(actions) => actions,
            Err(err) => vec![EngineAction::Notify(err.user_message())],
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let state = &self.state;
        let light = &state.light;
        let config = state.irrigation.config();

        ControllerStatus {
            light_profile: light.profile().as_str(),
            light_model: light.model().as_str(),
            light_stage: light.current_stage(),
            light_stage_name: light.stage().name,
            light_on: light.is_light_on(),
            stage_durations: light.plan().durations().to_vec(),
            hours_since_light_change: state.elapsed.hours_since_light_change(),
            hours_until_light_change: light.hours_until_change(&state.elapsed),
            hours_since_irrigation: state.elapsed.hours_since_irrigation(),
            hours_until_irrigation: state.irrigation.hours_until_due(&state.elapsed),
            irrigation_interval_days: config.interval_days,
            irrigation_duration_seconds: config.duration_seconds,
            auto_irrigate: config.auto_irrigate,
            reminder_sent: state.irrigation.reminder_sent(),
            ventilation_on: state.ventilation.is_on(),
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<Vec<EngineAction>, ControlError> {
        let state = &mut self.state;

        let actions = match command {
            Command::Menu => vec![EngineAction::Menu {
                text: "Choose an option".to_string(),
                buttons: commands::main_keyboard(),
            }],
            Command::Commands => vec![EngineAction::notify(commands::COMMAND_HELP)],
            Command::Status => vec![EngineAction::Notify(commands::status_report(state))],
            Command::LightMenu => self.light_menu(true),
            Command::LightCycle => vec![EngineAction::Notify(state.light.profile().label())],
            Command::LightOn if !state.light.is_light_on() => {
                let mut actions = state.light.force_state(true, &mut state.elapsed);
                actions.extend(self.light_menu(false));
                actions
            }
            Command::LightOff if state.light.is_light_on() => {
                let mut actions = state.light.force_state(false, &mut state.elapsed);
                actions.extend(self.light_menu(false));
                actions
            }
            Command::SelectProfile(profile) if profile != state.light.profile() => {
                let mut actions = state.light.select_profile(profile);
                actions.extend(self.light_menu(true));
                actions
            }
            Command::IrrigationMenu => {
                let include_next = state.irrigation.config().auto_irrigate;
                self.irrigation_menu(true, include_next)
            }
            Command::Irrigate => {
                let mut actions = state.irrigation.manual_irrigate(&mut state.elapsed);
                actions.extend(self.irrigation_menu(false, false));
                actions
            }
            Command::Irrigated => {
                let mut actions = state.irrigation.acknowledge_irrigation(&mut state.elapsed);
                actions.extend(self.irrigation_menu(false, false));
                actions
            }
            Command::AutoIrrigateOn if !state.irrigation.config().auto_irrigate => {
                let mut actions = state.irrigation.set_auto_irrigate(true, &mut self.store)?;
                actions.extend(self.irrigation_menu(true, true));
                actions
            }
            Command::AutoIrrigateOff if state.irrigation.config().auto_irrigate => {
                let mut actions = state.irrigation.set_auto_irrigate(false, &mut self.store)?;
                actions.extend(self.irrigation_menu(true, false));
                actions
            }
            Command::SetInterval(days) => state.irrigation.set_interval(days, &mut self.store)?,
            Command::SetDuration(seconds) => {
                state.irrigation.set_duration(seconds, &mut self.store)?
            }
            Command::VentilationMenu => self.ventilation_menu(),
            Command::VentilationOn if !state.ventilation.is_on() => {
                let mut actions = state.ventilation.turn_on();
                actions.extend(self.ventilation_menu());
                actions
            }
            Command::VentilationOff if state.ventilation.is_on() => {
                let mut actions = state.ventilation.turn_off();
                actions.extend(self.ventilation_menu());
                actions
            }
            // Unknown text and redundant state changes.
            _ => vec![EngineAction::Menu {
                text: "Choose one of the options".to_string(),
                buttons: commands::fallback_keyboard(),
            }],
        };

        Ok(actions)
    }

    fn light_menu(&self, with_status: bool) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if with_status {
            actions.push(EngineAction::Notify(commands::light_status_text(&self.state)));
        }
        actions.push(EngineAction::Menu {
            text: "Light options".to_string(),
            buttons: commands::light_keyboard(self.state.light.is_light_on()),
        });
        actions
    }

    fn irrigation_menu(&self, with_status: bool, include_next: bool) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if with_status {
            actions.push(EngineAction::Notify(commands::irrigation_status_text(
                &self.state,
                include_next,
            )));
        }
        actions.push(EngineAction::Menu {
            text: "Irrigation options".to_string(),
            buttons: commands::irrigation_keyboard(self.state.irrigation.config().auto_irrigate),
        });
        actions
    }

    fn ventilation_menu(&self) -> Vec<EngineAction> {
        vec![
            EngineAction::notify(self.state.ventilation.status_text()),
            EngineAction::Menu {
                text: "Ventilation options".to_string(),
                buttons: commands::ventilation_keyboard(self.state.ventilation.is_on()),
            },
        ]
    }
}
