//! Photoperiod state machine.
//!
//! Stages run cyclically; a stage ends once the hours since the last light
//! change reach its planned duration. Changing the profile recomputes the
//! plan but never moves the current stage: the new durations apply from the
//! next natural boundary on.

use crate::{
    elapsed::ElapsedHours,
    error::ControlError,
    output::{Channel, EngineAction},
    types::{LightModel, LightProfile},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightStage {
    pub name: &'static str,
    pub led: bool,
    pub full_spectrum: bool,
}

impl LightStage {
    pub fn is_lit(&self) -> bool {
        self.led || self.full_spectrum
    }

    fn actions(&self) -> [EngineAction; 2] {
        [
            EngineAction::output(Channel::LightLed, self.led),
            EngineAction::output(Channel::LightFullSpectrum, self.full_spectrum),
        ]
    }
}

const TWO_PHASE_STAGES: [LightStage; 2] = [
    LightStage {
        name: "on",
        led: true,
        full_spectrum: true,
    },
    LightStage {
        name: "off",
        led: false,
        full_spectrum: false,
    },
];

const FOUR_STAGE_STAGES: [LightStage; 4] = [
    LightStage {
        name: "led only",
        led: true,
        full_spectrum: false,
    },
    LightStage {
        name: "led + full spectrum",
        led: true,
        full_spectrum: true,
    },
    LightStage {
        name: "led only",
        led: true,
        full_spectrum: false,
    },
    LightStage {
        name: "all off",
        led: false,
        full_spectrum: false,
    },
];

pub fn stages(model: LightModel) -> &'static [LightStage] {
    match model {
        LightModel::TwoPhase => &TWO_PHASE_STAGES,
        LightModel::FourStage => &FOUR_STAGE_STAGES,
    }
}

/// Planned hours per stage, always summing to 24.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    hours: [u32; 4],
    len: usize,
}

impl StagePlan {
    pub fn compute(model: LightModel, profile: LightProfile) -> Self {
        let on = profile.light_hours();
        let off = 24 - on;
        match model {
            LightModel::TwoPhase => Self {
                hours: [on, off, 0, 0],
                len: 2,
            },
            LightModel::FourStage => {
                let bracket = on / 3;
                Self {
                    hours: [bracket, on - 2 * bracket, bracket, off],
                    len: 4,
                }
            }
        }
    }

    pub fn durations(&self) -> &[u32] {
        &self.hours[..self.len]
    }

    pub fn duration(&self, stage: usize) -> u32 {
        self.durations().get(stage).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.durations().iter().sum()
    }
}

#[derive(Debug, Clone)]
pub struct LightCycle {
    model: LightModel,
    profile: LightProfile,
    plan: StagePlan,
    current_stage: usize,
    light_on: bool,
}

impl LightCycle {
    pub fn new(model: LightModel, profile: LightProfile) -> Self {
        Self {
            model,
            profile,
            plan: StagePlan::compute(model, profile),
            current_stage: 0,
            light_on: stages(model)[0].is_lit(),
        }
    }

    pub fn model(&self) -> LightModel {
        self.model
    }

    pub fn profile(&self) -> LightProfile {
        self.profile
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    pub fn stage(&self) -> &'static LightStage {
        &stages(self.model)[self.current_stage]
    }

    pub fn is_light_on(&self) -> bool {
        self.light_on
    }

    fn stage_count(&self) -> usize {
        stages(self.model).len()
    }

    fn off_stage(&self) -> usize {
        self.stage_count() - 1
    }

    /// Drives the outputs to the current stage's pattern; used at boot.
    pub fn startup_actions(&self) -> Vec<EngineAction> {
        self.stage().actions().to_vec()
    }

    pub fn recompute_plan(&mut self) {
        self.plan = StagePlan::compute(self.model, self.profile);
    }

    pub fn hours_until_change(&self, elapsed: &ElapsedHours) -> u32 {
        self.plan
            .duration(self.current_stage)
            .saturating_sub(elapsed.hours_since_light_change())
    }

    pub fn set_profile(&mut self, name: &str) -> Result<Vec<EngineAction>, ControlError> {
        let profile = LightProfile::from_name(name)?;
        Ok(self.select_profile(profile))
    }

    pub fn select_profile(&mut self, profile: LightProfile) -> Vec<EngineAction> {
        self.profile = profile;
        self.recompute_plan();
        vec![EngineAction::notify(format!(
            "Light cycle: {}",
            profile.label()
        ))]
    }

    pub fn check(&mut self, elapsed: &mut ElapsedHours) -> Vec<EngineAction> {
        let hours = elapsed.hours_since_light_change();
        if hours < self.plan.duration(self.current_stage) {
            return Vec::new();
        }

        self.current_stage = (self.current_stage + 1) % self.stage_count();
        elapsed.reset_light();

        let stage = self.stage();
        self.light_on = stage.is_lit();

        let mut actions = stage.actions().to_vec();
        actions.push(EngineAction::notify(format!(
            "Light stage {} ({}) after {hours} hours",
            self.current_stage, stage.name
        )));
        actions
    }

    pub fn force_state(&mut self, on: bool, elapsed: &mut ElapsedHours) -> Vec<EngineAction> {
        self.current_stage = if on { 0 } else { self.off_stage() };
        self.light_on = on;
        elapsed.reset_light();

        let mut actions = self.stage().actions().to_vec();
        actions.push(EngineAction::notify(if on {
            "Light turned on."
        } else {
            "Light turned off."
        }));
        actions
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn flowering_plan_sums_to_a_day() {
        let plan = StagePlan::compute(LightModel::FourStage, LightProfile::Flowering);

        assert_eq!(plan.durations(), &[4, 4, 4, 12]);
        assert_eq!(plan.total(), 24);
        assert_eq!(plan.durations()[..3].iter().sum::<u32>(), 12);
    }

    #[test]
    fn four_stage_vegetative_runs_a_full_day() {
        let mut light = LightCycle::new(LightModel::FourStage, LightProfile::Vegetative);
        let mut elapsed = ElapsedHours::new(0);

        let mut transitions = Vec::new();
        for hour in 1..=24u64 {
            elapsed.tick(hour * crate::elapsed::ONE_HOUR_MS);
            let actions = light.check(&mut elapsed);
            if !actions.is_empty() {
                transitions.push((hour, actions, light.is_light_on()));
            }
        }

        let stage = |led: bool, full_spectrum: bool, text: &str, lit: bool| {
            (
                vec![
                    EngineAction::output(Channel::LightLed, led),
                    EngineAction::output(Channel::LightFullSpectrum, full_spectrum),
                    EngineAction::notify(text),
                ],
                lit,
            )
        };
        let expected = [
            (6, stage(true, true, "Light stage 1 (led + full spectrum) after 6 hours", true)),
            (12, stage(true, false, "Light stage 2 (led only) after 6 hours", true)),
            (18, stage(false, false, "Light stage 3 (all off) after 6 hours", false)),
            (24, stage(true, false, "Light stage 0 (led only) after 6 hours", true)),
        ]
        .into_iter()
        .map(|(hour, (actions, lit))| (hour, actions, lit))
        .collect::<Vec<_>>();

        assert_eq!(transitions, expected);
        assert_eq!(light.current_stage(), 0);
    }

    #[test]
    fn germination_remainder_goes_to_middle_stage() {
        let plan = StagePlan::compute(LightModel::FourStage, LightProfile::Germination);
        assert_eq!(plan.durations(), &[5, 6, 5, 8]);

        let plan = StagePlan::compute(LightModel::TwoPhase, LightProfile::Vegetative);
        assert_eq!(plan.durations(), &[18, 6]);
    }

    #[test]
    fn two_phase_germination_cycles() {
        let mut light = LightCycle::new(LightModel::TwoPhase, LightProfile::Germination);
        let mut elapsed = ElapsedHours::with_hours(15, 0);

        assert!(light.check(&mut elapsed).is_empty());
        assert!(light.is_light_on());

        let mut elapsed = ElapsedHours::with_hours(16, 16);
        let actions = light.check(&mut elapsed);
        assert_eq!(light.current_stage(), 1);
        assert!(!light.is_light_on());
        assert_eq!(elapsed.hours_since_light_change(), 0);
        assert_eq!(elapsed.hours_since_irrigation(), 16);
        assert_eq!(
            actions,
            vec![
                EngineAction::output(Channel::LightLed, false),
                EngineAction::output(Channel::LightFullSpectrum, false),
                EngineAction::notify("Light stage 1 (off) after 16 hours"),
            ]
        );

        let mut elapsed = ElapsedHours::with_hours(8, 0);
        light.check(&mut elapsed);
        assert_eq!(light.current_stage(), 0);
        assert!(light.is_light_on());
    }

    #[test]
    fn profile_change_keeps_current_stage() {
        let mut light = LightCycle::new(LightModel::FourStage, LightProfile::Vegetative);
        let mut elapsed = ElapsedHours::with_hours(6, 0);
        light.check(&mut elapsed);
        assert_eq!(light.current_stage(), 1);

        let actions = light.set_profile("flor").unwrap();

        assert_eq!(light.current_stage(), 1);
        assert_eq!(light.plan().durations(), &[4, 4, 4, 12]);
        assert_eq!(
            actions,
            vec![EngineAction::notify("Light cycle: flowering (12/12)")]
        );
    }

    #[test]
    fn invalid_profile_leaves_plan_alone() {
        let mut light = LightCycle::new(LightModel::FourStage, LightProfile::Vegetative);

        assert!(matches!(
            light.set_profile("summer"),
            Err(ControlError::InvalidProfile(_))
        ));
        assert_eq!(light.profile(), LightProfile::Vegetative);
    }

    #[test]
    fn force_off_jumps_to_last_stage() {
        let mut light = LightCycle::new(LightModel::FourStage, LightProfile::Vegetative);
        let mut elapsed = ElapsedHours::with_hours(3, 3);

        let actions = light.force_state(false, &mut elapsed);

        assert_eq!(light.current_stage(), 3);
        assert!(!light.is_light_on());
        assert_eq!(elapsed.hours_since_light_change(), 0);
        assert_eq!(actions.last(), Some(&EngineAction::notify("Light turned off.")));

        light.force_state(true, &mut elapsed);
        assert_eq!(light.current_stage(), 0);
        assert!(light.is_light_on());
    }
}
