//! Envelope generators.
//!
//! [`Egadsr`] drives amplitude (EG1) and filter cutoff (EG2):
//! pre-attack -> attack -> hold -> decay1 -> decay2 -> sustain ->
//! release -> end, with a cancel-release transition that snaps back to
//! the pre-release segment. [`PitchEg`] (EG3) is a plain decay in
//! cents. Both produce one level per sub-fragment.

/// Level below which an exponential segment counts as finished.
const EG_MIN_LEVEL: f32 = 1e-3;

/// Current envelope segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgStage {
    Attack,
    Hold,
    Decay1,
    Decay2,
    Sustain,
    Release,
    End,
}

/// Envelope parameters, durations in seconds, levels 0..=1. The caller
/// applies controller influences to the durations before triggering.
#[derive(Debug, Clone, Copy)]
pub struct EgTrigger {
    pub pre_attack: f32,
    pub attack_s: f32,
    pub hold_s: f32,
    pub decay1_s: f32,
    pub decay2_s: f32,
    pub infinite_sustain: bool,
    pub sustain: f32,
    pub release_s: f32,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    stage: EgStage,
    level: f32,
    coef: f32,
    step: f32,
    remaining: u32,
}

/// ADSR envelope with split decay and exponential attack/release.
#[derive(Debug, Clone)]
pub struct Egadsr {
    stage: EgStage,
    level: f32,
    /// Exponential approach coefficient for the running segment.
    coef: f32,
    /// Linear increment for decay1.
    step: f32,
    remaining: u32,
    sustain: f32,
    infinite_sustain: bool,
    decay2_steps: u32,
    release_steps: u32,
    /// Lengths of the segments queued up behind the attack.
    pending_hold: u32,
    pending_decay1: u32,
    /// Segment state at the moment release began, for cancel-release.
    snapshot: Option<Segment>,
}

impl Default for Egadsr {
    fn default() -> Self {
        Self {
            stage: EgStage::End,
            level: 0.0,
            coef: 0.0,
            step: 0.0,
            remaining: 0,
            sustain: 0.0,
            infinite_sustain: true,
            decay2_steps: 0,
            release_steps: 0,
            pending_hold: 0,
            pending_decay1: 0,
            snapshot: None,
        }
    }
}

impl Egadsr {
    /// Arms the envelope at note-on. `rate` is sub-fragments per second
    /// (`sample_rate / subfragment_size`).
    pub fn trigger(&mut self, p: &EgTrigger, rate: f32) {
        let steps = |seconds: f32| (seconds.max(0.0) * rate).round() as u32;

        self.sustain = p.sustain.clamp(0.0, 1.0);
        self.infinite_sustain = p.infinite_sustain;
        self.decay2_steps = steps(p.decay2_s);
        self.release_steps = steps(p.release_s);
        self.snapshot = None;

        self.level = p.pre_attack.clamp(0.0, 1.0);
        self.enter_attack(steps(p.attack_s), steps(p.hold_s), steps(p.decay1_s));
    }

    pub fn stage(&self) -> EgStage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == EgStage::End
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Returns the level for the current sub-fragment, then advances.
    pub fn process(&mut self) -> f32 {
        let out = self.level;
        match self.stage {
            EgStage::Attack => {
                self.level = 1.0 + (self.level - 1.0) * self.coef;
                self.count_down(|eg| {
                    eg.level = 1.0;
                    eg.enter_hold();
                });
            }
            EgStage::Hold => {
                self.count_down(|eg| eg.enter_decay1());
            }
            EgStage::Decay1 => {
                self.level += self.step;
                self.count_down(|eg| {
                    eg.level = eg.sustain;
                    eg.enter_decay2();
                });
            }
            EgStage::Decay2 => {
                self.level *= self.coef;
                if self.level <= EG_MIN_LEVEL {
                    self.finish();
                } else {
                    self.count_down(|eg| eg.finish());
                }
            }
            EgStage::Sustain => {}
            EgStage::Release => {
                self.level *= self.coef;
                if self.level <= EG_MIN_LEVEL {
                    self.finish();
                } else {
                    self.count_down(|eg| eg.finish());
                }
            }
            EgStage::End => {}
        }
        out
    }

    /// Begins the release segment from the current level, remembering
    /// where it came from so a cancel-release can go back.
    pub fn release(&mut self) {
        if matches!(self.stage, EgStage::Release | EgStage::End) {
            return;
        }
        self.snapshot = Some(Segment {
            stage: self.stage,
            level: self.level,
            coef: self.coef,
            step: self.step,
            remaining: self.remaining,
        });
        if self.level <= EG_MIN_LEVEL || self.release_steps == 0 {
            self.finish();
            return;
        }
        self.stage = EgStage::Release;
        self.coef = exp_coef(self.level, 0.0, self.release_steps);
        self.remaining = self.release_steps;
    }

    /// Undoes a pending release: snaps back to the segment and level
    /// the envelope was in before [`release`](Self::release).
    pub fn cancel_release(&mut self) {
        if self.stage != EgStage::Release {
            return;
        }
        if let Some(s) = self.snapshot.take() {
            self.stage = s.stage;
            self.level = s.level;
            self.coef = s.coef;
            self.step = s.step;
            self.remaining = s.remaining;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn enter_attack(&mut self, attack_steps: u32, hold_steps: u32, decay1_steps: u32) {
        self.pending_hold = hold_steps;
        self.pending_decay1 = decay1_steps;
        if attack_steps == 0 || self.level >= 1.0 - EG_MIN_LEVEL {
            self.level = 1.0;
            self.enter_hold();
            return;
        }
        self.stage = EgStage::Attack;
        self.coef = exp_coef(1.0 - self.level, 0.0, attack_steps);
        self.remaining = attack_steps;
    }

    fn enter_hold(&mut self) {
        if self.pending_hold == 0 {
            self.enter_decay1();
            return;
        }
        self.stage = EgStage::Hold;
        self.remaining = self.pending_hold;
    }

    fn enter_decay1(&mut self) {
        if self.pending_decay1 == 0 || (self.level - self.sustain).abs() <= EG_MIN_LEVEL {
            self.level = self.level.min(1.0);
            self.enter_decay2();
            return;
        }
        self.stage = EgStage::Decay1;
        self.step = (self.sustain - self.level) / self.pending_decay1 as f32;
        self.remaining = self.pending_decay1;
    }

    fn enter_decay2(&mut self) {
        self.level = self.sustain;
        if self.infinite_sustain {
            self.stage = EgStage::Sustain;
            return;
        }
        if self.decay2_steps == 0 || self.level <= EG_MIN_LEVEL {
            self.finish();
            return;
        }
        self.stage = EgStage::Decay2;
        self.coef = exp_coef(self.level, 0.0, self.decay2_steps);
        self.remaining = self.decay2_steps;
    }

    fn finish(&mut self) {
        self.stage = EgStage::End;
        self.level = 0.0;
    }

    #[inline]
    fn count_down(&mut self, on_done: impl FnOnce(&mut Self)) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            on_done(self);
        }
    }
}

/// Coefficient for an exponential run from a distance of `from` down to
/// (within [`EG_MIN_LEVEL`] of) `to` in `steps` steps.
fn exp_coef(from: f32, to: f32, steps: u32) -> f32 {
    let distance = (from - to).abs().max(EG_MIN_LEVEL);
    (EG_MIN_LEVEL / distance).powf(1.0 / steps.max(1) as f32)
}

/// Pitch envelope (EG3): starts `depth` cents off and decays toward
/// zero.
#[derive(Debug, Clone, Default)]
pub struct PitchEg {
    cents: f32,
    coef: f32,
}

impl PitchEg {
    pub fn trigger(&mut self, depth_cents: f32, decay_s: f32, rate: f32) {
        self.cents = depth_cents;
        let steps = (decay_s.max(0.0) * rate).round() as u32;
        if depth_cents.abs() < 1.0 || steps == 0 {
            self.cents = 0.0;
            self.coef = 0.0;
            return;
        }
        // Decay until the offset is inaudible (under one cent).
        self.coef = (1.0 / depth_cents.abs()).powf(1.0 / steps as f32);
    }

    /// Cents offset for the current sub-fragment.
    pub fn process(&mut self) -> f32 {
        let out = self.cents;
        self.cents *= self.coef;
        if self.cents.abs() < 1.0 {
            self.cents = 0.0;
        }
        out
    }

    pub fn reset(&mut self) {
        self.cents = 0.0;
        self.coef = 0.0;
    }
}
