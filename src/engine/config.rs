// Fight balancing: start values, timings, phase thresholds, the damage table
// and reward tiers. Defaults match the live bot; every value can be overridden
// from a JSON file.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const BOSS_START_HP: i64 = 10000;
pub const PLAYER_START_HP: i64 = 100;

pub const TURN_TIME_MS: u64 = 5000;
pub const START_DELAY_MS: u64 = 2000;
pub const ROUND_PAUSE_MS: u64 = 1000;

pub const CRIT_HIT_CHANCE: f64 = 0.45;
pub const CRIT_MIN_PHASE: u8 = 4;

pub const SPEEDRUN_TRIVIA_QUESTIONS: usize = 10;
pub const SOLO_TRIVIA_TAG_COUNT: usize = 10;
pub const TYPING_ROUNDS: usize = 30;

/// Every source of random damage in a fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DamageKind {
    /// One registered turn hit.
    Hit,
    /// Boss counter-attack after a turn, shared by all alive players.
    Retaliation,
    /// Landed critical hit.
    Critical,
    /// Per correct speedrun answer.
    SpeedrunCorrect,
    /// Per player when no speedrun question was answered.
    SpeedrunEnrage,
    /// Tagged player answered their solo question.
    SoloSuccess,
    /// Tagged player failed their solo question.
    SoloFailure,
    /// Per player who missed a typing round.
    TypingFailure,
    /// Per correct typist in the final phase.
    FinalTypingSuccess,
    /// Per player when nobody typed the final-phase word.
    FinalTypingFailure,
    /// First correct final-phase trivia answer.
    FinalTriviaSuccess,
    /// Per player when nobody answered the final-phase question.
    FinalTriviaFailure,
}

/// Inclusive damage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRange {
    pub min: i64,
    pub max: i64,
}

impl DamageRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min >= 0 && self.min <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageTable {
    pub hit: DamageRange,
    pub retaliation: DamageRange,
    pub critical: DamageRange,
    pub speedrun_correct: DamageRange,
    pub speedrun_enrage: DamageRange,
    pub solo_success: DamageRange,
    pub solo_failure: DamageRange,
    pub typing_failure: DamageRange,
    pub final_typing_success: DamageRange,
    pub final_typing_failure: DamageRange,
    pub final_trivia_success: DamageRange,
    pub final_trivia_failure: DamageRange,
}

impl Default for DamageTable {
    fn default() -> Self {
        Self {
            hit: DamageRange::new(80, 180),
            retaliation: DamageRange::new(10, 30),
            critical: DamageRange::new(400, 900),
            speedrun_correct: DamageRange::new(200, 500),
            speedrun_enrage: DamageRange::new(400, 800),
            solo_success: DamageRange::new(800, 1400),
            solo_failure: DamageRange::new(800, 1500),
            typing_failure: DamageRange::new(400, 900),
            final_typing_success: DamageRange::new(200, 400),
            final_typing_failure: DamageRange::new(600, 1200),
            final_trivia_success: DamageRange::new(600, 1200),
            final_trivia_failure: DamageRange::new(700, 1300),
        }
    }
}

impl DamageTable {
    pub fn range(&self, kind: DamageKind) -> DamageRange {
        match kind {
            DamageKind::Hit => self.hit,
            DamageKind::Retaliation => self.retaliation,
            DamageKind::Critical => self.critical,
            DamageKind::SpeedrunCorrect => self.speedrun_correct,
            DamageKind::SpeedrunEnrage => self.speedrun_enrage,
            DamageKind::SoloSuccess => self.solo_success,
            DamageKind::SoloFailure => self.solo_failure,
            DamageKind::TypingFailure => self.typing_failure,
            DamageKind::FinalTypingSuccess => self.final_typing_success,
            DamageKind::FinalTypingFailure => self.final_typing_failure,
            DamageKind::FinalTriviaSuccess => self.final_trivia_success,
            DamageKind::FinalTriviaFailure => self.final_trivia_failure,
        }
    }

    fn all(&self) -> [(&'static str, DamageRange); 12] {
        [
            ("hit", self.hit),
            ("retaliation", self.retaliation),
            ("critical", self.critical),
            ("speedrun_correct", self.speedrun_correct),
            ("speedrun_enrage", self.speedrun_enrage),
            ("solo_success", self.solo_success),
            ("solo_failure", self.solo_failure),
            ("typing_failure", self.typing_failure),
            ("final_typing_success", self.final_typing_success),
            ("final_typing_failure", self.final_typing_failure),
            ("final_trivia_success", self.final_trivia_success),
            ("final_trivia_failure", self.final_trivia_failure),
        ]
    }
}

/// Draw one damage value of the given kind.
pub fn draw_damage<R: Rng + ?Sized>(table: &DamageTable, kind: DamageKind, rng: &mut R) -> i64 {
    let range = table.range(kind);
    if range.min >= range.max {
        return range.min;
    }
    rng.gen_range(range.min..=range.max)
}

/// Boss hp at or below which each phase transition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseThresholds {
    pub speedrun: i64,
    pub solo: i64,
    pub typing: i64,
    pub final_phase: i64,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            speedrun: 7500,
            solo: 5000,
            typing: 2500,
            final_phase: 500,
        }
    }
}

/// Points paid out at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTable {
    /// Alive when the fight ended.
    pub survivor: i64,
    /// Died in phase 1.
    pub phase_one: i64,
    /// Died in phase 2.
    pub phase_two: i64,
    /// Died in phase 3 or later.
    pub late: i64,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            survivor: 10000,
            phase_one: 7500,
            phase_two: 5000,
            late: 2500,
        }
    }
}

impl RewardTable {
    /// Reward tier for a player who died in `phase`.
    pub fn for_death_phase(&self, phase: u8) -> i64 {
        match phase {
            0 | 1 => self.phase_one,
            2 => self.phase_two,
            _ => self.late,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FightConfigError {
    #[error("failed to read fight config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse fight config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid fight config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FightConfig {
    pub boss_start_hp: i64,
    pub player_start_hp: i64,

    pub turn_time_ms: u64,
    pub start_delay_ms: u64,
    pub round_pause_ms: u64,

    pub crit_chance: f64,
    pub crit_min_phase: u8,

    pub speedrun_questions: usize,
    pub speedrun_answer_ms: u64,
    pub solo_tag_count: usize,
    pub solo_answer_ms: u64,
    pub typing_rounds: usize,
    pub typing_window_ms: u64,
    pub final_typing_window_ms: u64,
    pub final_trivia_answer_ms: u64,

    pub thresholds: PhaseThresholds,
    pub damage: DamageTable,
    pub rewards: RewardTable,

    /// Fixed RNG seed; entropy when unset.
    pub rng_seed: Option<u64>,
}

impl Default for FightConfig {
    fn default() -> Self {
        Self {
            boss_start_hp: BOSS_START_HP,
            player_start_hp: PLAYER_START_HP,
            turn_time_ms: TURN_TIME_MS,
            start_delay_ms: START_DELAY_MS,
            round_pause_ms: ROUND_PAUSE_MS,
            crit_chance: CRIT_HIT_CHANCE,
            crit_min_phase: CRIT_MIN_PHASE,
            speedrun_questions: SPEEDRUN_TRIVIA_QUESTIONS,
            speedrun_answer_ms: 8000,
            solo_tag_count: SOLO_TRIVIA_TAG_COUNT,
            solo_answer_ms: 10000,
            typing_rounds: TYPING_ROUNDS,
            typing_window_ms: 6000,
            final_typing_window_ms: 5000,
            final_trivia_answer_ms: 6000,
            thresholds: PhaseThresholds::default(),
            damage: DamageTable::default(),
            rewards: RewardTable::default(),
            rng_seed: None,
        }
    }
}

impl FightConfig {
    /// Load overrides from a JSON file; absent fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, FightConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, FightConfigError> {
        let config: FightConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FightConfigError> {
        if self.boss_start_hp <= 0 || self.player_start_hp <= 0 {
            return Err(FightConfigError::Invalid(
                "start hp must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.crit_chance) {
            return Err(FightConfigError::Invalid(format!(
                "crit_chance {} outside [0, 1]",
                self.crit_chance
            )));
        }
        for (name, range) in self.damage.all() {
            if !range.is_valid() {
                return Err(FightConfigError::Invalid(format!(
                    "damage range '{name}' is {}..{}",
                    range.min, range.max
                )));
            }
        }
        Ok(())
    }

    pub fn turn_time(&self) -> Duration {
        Duration::from_millis(self.turn_time_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn round_pause(&self) -> Duration {
        Duration::from_millis(self.round_pause_ms)
    }

    pub fn speedrun_answer_time(&self) -> Duration {
        Duration::from_millis(self.speedrun_answer_ms)
    }

    pub fn solo_answer_time(&self) -> Duration {
        Duration::from_millis(self.solo_answer_ms)
    }

    pub fn typing_window(&self) -> Duration {
        Duration::from_millis(self.typing_window_ms)
    }

    pub fn final_typing_window(&self) -> Duration {
        Duration::from_millis(self.final_typing_window_ms)
    }

    pub fn final_trivia_answer_time(&self) -> Duration {
        Duration::from_millis(self.final_trivia_answer_ms)
    }
}
