use growbox_common::{
    execute_actions, ByteStore, Channel, Controller, EngineAction, IrrigationConfig, LightConfig,
    LightModel, LightProfile, MemoryStore, OutboundMessage, OutputDriver, SettingsStore,
    ONE_HOUR_MS,
};
use pretty_assertions::assert_eq;

const OWNER: &str = "424242";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Set(Channel, bool),
    Block(u64),
}

#[derive(Default)]
struct Recorder {
    calls: Vec<Call>,
}

impl OutputDriver for Recorder {
    fn set_channel(&mut self, channel: Channel, on: bool) {
        self.calls.push(Call::Set(channel, on));
    }

    fn block_for(&mut self, duration_ms: u64) {
        self.calls.push(Call::Block(duration_ms));
    }
}

fn boot(light: LightConfig, backend: MemoryStore) -> Controller<MemoryStore> {
    Controller::boot(light, OWNER, backend, 0).unwrap()
}

fn texts(outbound: &[OutboundMessage]) -> Vec<&str> {
    outbound.iter().map(|message| message.text.as_str()).collect()
}

#[test]
fn empty_store_boots_with_defaults() {
    let controller = boot(LightConfig::default(), MemoryStore::new());
    let status = controller.status();

    assert_eq!(status.irrigation_interval_days, 5);
    assert_eq!(status.irrigation_duration_seconds, 15);
    assert!(!status.auto_irrigate);
    assert_eq!(status.light_stage, 0);
    assert!(status.light_on);
    assert_eq!(status.stage_durations, vec![6, 6, 6, 6]);
}

#[test]
fn interval_survives_reboot_and_rejects_garbage() {
    let mut controller = boot(LightConfig::default(), MemoryStore::new());
    let mut driver = Recorder::default();

    let actions = controller.handle_message(OWNER, "/intervaloirrigacao 3");
    let outbound = execute_actions(actions, &mut driver, OWNER);
    assert_eq!(texts(&outbound), vec!["Irrigation interval set to 3 days."]);

    let backend = controller.into_store().into_inner();
    let mut controller = boot(LightConfig::default(), backend);
    assert_eq!(controller.status().irrigation_interval_days, 3);

    let actions = controller.handle_message(OWNER, "/intervaloirrigacao abc");
    let outbound = execute_actions(actions, &mut driver, OWNER);
    assert_eq!(outbound.len(), 1);
    assert!(outbound[0].text.contains("/intervaloirrigacao N"));
    assert_eq!(controller.status().irrigation_interval_days, 3);
    assert!(driver.calls.is_empty());
}

#[test]
fn confirmed_interval_is_what_reboot_loads() {
    let controller = boot(LightConfig::default(), MemoryStore::new());
    let mut backend = controller.into_store().into_inner();
    backend.set_fail_key(Some("irr_int_ok"));
    let mut controller = boot(LightConfig::default(), backend);

    let actions = controller.handle_message(OWNER, "/intervaloirrigacao 9");

    assert_eq!(
        actions,
        vec![EngineAction::notify("Irrigation interval set to 9 days.")]
    );
    let backend = controller.into_store().into_inner();
    assert_eq!(boot(LightConfig::default(), backend).status().irrigation_interval_days, 9);
}

#[test]
fn rejected_interval_never_reaches_the_next_boot() {
    let controller = boot(LightConfig::default(), MemoryStore::new());
    let mut backend = controller.into_store().into_inner();
    backend.write_u8("irr_int_ok", 0xFF).unwrap();
    backend.set_fail_key(Some("irr_int_ok"));
    let mut controller = Controller::new(
        LightConfig::default(),
        OWNER,
        SettingsStore::new(backend),
        IrrigationConfig::default(),
        0,
    );

    let actions = controller.handle_message(OWNER, "/intervaloirrigacao 9");

    assert_eq!(
        actions,
        vec![EngineAction::notify(
            "Settings could not be saved; nothing was changed."
        )]
    );
    assert_eq!(controller.status().irrigation_interval_days, 5);

    let mut backend = controller.into_store().into_inner();
    backend.set_fail_key(None);
    assert_eq!(backend.raw("irr_int"), Some(5));
    assert_eq!(boot(LightConfig::default(), backend).status().irrigation_interval_days, 5);
}

#[test]
fn two_phase_germination_follows_sixteen_eight() {
    let light = LightConfig {
        model: LightModel::TwoPhase,
        profile: LightProfile::Germination,
    };
    let mut controller = boot(light, MemoryStore::new());
    let mut driver = Recorder::default();

    execute_actions(controller.startup_actions(), &mut driver, OWNER);
    driver.calls.clear();

    for hour in 1..=15 {
        let actions = controller.poll(hour * ONE_HOUR_MS);
        assert!(actions.is_empty(), "unexpected change at hour {hour}");
    }

    let outbound = execute_actions(controller.poll(16 * ONE_HOUR_MS), &mut driver, OWNER);
    assert!(!controller.status().light_on);
    assert_eq!(texts(&outbound), vec!["Light stage 1 (off) after 16 hours"]);
    assert_eq!(
        driver.calls,
        vec![
            Call::Set(Channel::LightLed, false),
            Call::Set(Channel::LightFullSpectrum, false),
        ]
    );

    for hour in 17..24 {
        assert!(controller.poll(hour * ONE_HOUR_MS).is_empty());
    }

    controller.poll(24 * ONE_HOUR_MS);
    let status = controller.status();
    assert!(status.light_on);
    assert_eq!(status.light_stage, 0);
    assert_eq!(status.hours_since_light_change, 0);
}

#[test]
fn sub_hour_polls_do_not_credit_time() {
    let mut controller = boot(LightConfig::default(), MemoryStore::new());

    for step in 1..=100 {
        controller.poll(step * 200);
    }

    assert_eq!(controller.status().hours_since_light_change, 0);
    assert_eq!(controller.status().hours_since_irrigation, 0);
}

#[test]
fn reminder_is_sent_once_per_due_period() {
    let mut controller = boot(LightConfig::default(), MemoryStore::new());
    let mut driver = Recorder::default();
    let mut reminders = 0;

    for hour in 1..=130 {
        let outbound = execute_actions(controller.poll(hour * ONE_HOUR_MS), &mut driver, OWNER);
        reminders += outbound
            .iter()
            .filter(|message| message.text.starts_with("Irrigation due."))
            .count();
    }

    assert_eq!(reminders, 1);
    assert!(controller.status().reminder_sent);
    assert!(!driver.calls.contains(&Call::Set(Channel::IrrigationPump, true)));

    controller.handle_message(OWNER, "/irrigado");
    let status = controller.status();
    assert!(!status.reminder_sent);
    assert_eq!(status.hours_since_irrigation, 0);
    assert_eq!(status.hours_until_irrigation, 120);
}

#[test]
fn manual_irrigation_pulses_for_configured_duration() {
    let mut controller = boot(LightConfig::default(), MemoryStore::new());
    let mut driver = Recorder::default();

    let actions = controller.handle_message(OWNER, "/tempoirrigacao 4");
    execute_actions(actions, &mut driver, OWNER);

    let actions = controller.handle_message(OWNER, "/irrigar");
    let outbound = execute_actions(actions, &mut driver, OWNER);

    assert_eq!(
        driver.calls,
        vec![
            Call::Set(Channel::IrrigationPump, true),
            Call::Block(4_000),
            Call::Set(Channel::IrrigationPump, false),
        ]
    );
    assert_eq!(outbound[0].text, "Irrigation done (4 s).");
    assert!(outbound[1].keyboard.is_some());
}

#[test]
fn other_senders_cannot_drive_outputs() {
    let mut controller = boot(LightConfig::default(), MemoryStore::new());
    let mut driver = Recorder::default();

    let actions = controller.handle_message("999", "/ligacoolers");
    let outbound = execute_actions(actions, &mut driver, OWNER);

    assert!(driver.calls.is_empty());
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].recipient, "999");
    assert!(!controller.status().ventilation_on);
}

#[test]
fn ventilation_toggles_and_reports() {
    let mut controller = boot(LightConfig::default(), MemoryStore::new());
    let mut driver = Recorder::default();

    let actions = controller.handle_message(OWNER, "/ligacoolers");
    let outbound = execute_actions(actions, &mut driver, OWNER);

    assert_eq!(driver.calls, vec![Call::Set(Channel::Ventilation, true)]);
    assert_eq!(
        texts(&outbound),
        vec!["Ventilation on.", "Ventilation is on.", "Ventilation options"]
    );

    let again = controller.handle_message(OWNER, "/ligacoolers");
    assert!(!again.contains(&EngineAction::output(Channel::Ventilation, true)));
}
