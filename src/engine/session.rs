// Session state for one boss fight, plus the pure state transitions the turn
// engine and interludes apply to it.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use super::config::{draw_damage, DamageKind, FightConfig, PhaseThresholds};
use super::FightError;
use crate::chat::{ChannelId, UserId};

/// Per-player combat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    pub hp: i64,
    /// Phase in which hp first dropped to 0 or below.
    pub phase_death: Option<u8>,
}

impl PlayerState {
    pub fn new(hp: i64) -> Self {
        Self {
            hp,
            phase_death: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    /// Apply damage. Returns true if this blow took the player from alive to dead.
    pub fn take_damage(&mut self, amount: i64, phase: u8) -> bool {
        let was_alive = self.is_alive();
        self.hp -= amount.max(0);
        let died = was_alive && !self.is_alive();
        if died && self.phase_death.is_none() {
            self.phase_death = Some(phase);
        }
        died
    }
}

/// One-shot interludes already triggered this fight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OneTimeEvents {
    pub speedrun: bool,
    pub solo: bool,
    pub typing: bool,
}

/// Phase-triggered mini-games.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interlude {
    Speedrun,
    SoloTrivia,
    Typing,
    FinalPhase,
}

impl Interlude {
    pub fn label(self) -> &'static str {
        match self {
            Interlude::Speedrun => "speedrun",
            Interlude::SoloTrivia => "solo",
            Interlude::Typing => "typing",
            Interlude::FinalPhase => "final",
        }
    }
}

/// Result of a "hit" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    Recorded,
    EventLocked,
    NotAlive,
    AlreadyHit,
}

/// What happened when a turn was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub hits: usize,
    pub total_damage: i64,
    pub boss_hp: i64,
    /// Shared counter-attack, if the boss survived and anyone was alive.
    pub retaliation: Option<i64>,
    /// Players who died to the retaliation.
    pub fallen: Vec<UserId>,
    /// Interlude whose threshold was crossed this turn.
    pub interlude: Option<Interlude>,
}

/// Read-only view for status commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub active: bool,
    pub fight_id: Option<Uuid>,
    pub channel_id: Option<ChannelId>,
    pub boss_hp: i64,
    pub phase: u8,
    pub registered: usize,
    pub alive: usize,
    pub event_lock: bool,
    pub final_mode: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub fight_id: Uuid,
    pub active: bool,
    pub boss_hp: i64,
    pub phase: u8,
    pub players: BTreeMap<UserId, PlayerState>,
    pub turn_hits: HashSet<UserId>,
    pub channel_id: Option<ChannelId>,
    pub event_lock: bool,
    pub one_time_done: OneTimeEvents,
    pub solo_tagged: Vec<UserId>,
    pub final_mode: bool,
    /// Set once settlement has been claimed for this fight.
    pub settled: bool,
    /// Send permission is currently denied on the fight channel.
    pub channel_locked: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::idle()
    }
}

impl Session {
    /// An inactive session bound to no channel.
    pub fn idle() -> Self {
        Self {
            fight_id: Uuid::nil(),
            active: false,
            boss_hp: 0,
            phase: 1,
            players: BTreeMap::new(),
            turn_hits: HashSet::new(),
            channel_id: None,
            event_lock: false,
            one_time_done: OneTimeEvents::default(),
            solo_tagged: Vec::new(),
            final_mode: false,
            settled: false,
            channel_locked: false,
            started_at: None,
        }
    }

    /// Reset to a fresh fight in `channel`. Returns the new fight id.
    pub fn begin(&mut self, channel: ChannelId, boss_hp: i64) -> Uuid {
        *self = Session {
            fight_id: Uuid::new_v4(),
            active: true,
            boss_hp,
            channel_id: Some(channel),
            started_at: Some(Utc::now()),
            ..Session::idle()
        };
        self.fight_id
    }

    /// Whether `fight_id` names the live fight.
    pub fn is_fight(&self, fight_id: Uuid) -> bool {
        self.active && self.fight_id == fight_id
    }

    /// Whether a live fight is bound to `channel`.
    pub fn in_channel(&self, channel: ChannelId) -> bool {
        self.active && self.channel_id == Some(channel)
    }

    pub fn register(&mut self, channel: ChannelId, user: UserId, hp: i64) -> Result<(), FightError> {
        if !self.in_channel(channel) {
            return Err(FightError::NoActiveSession);
        }
        if self.players.contains_key(&user) {
            return Err(FightError::AlreadyRegistered);
        }
        self.players.insert(user, PlayerState::new(hp));
        Ok(())
    }

    pub fn is_alive(&self, user: UserId) -> bool {
        self.players.get(&user).is_some_and(PlayerState::is_alive)
    }

    pub fn alive_ids(&self) -> Vec<UserId> {
        self.players
            .iter()
            .filter(|(_, p)| p.is_alive())
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.is_alive()).count()
    }

    pub fn record_hit(&mut self, user: UserId) -> HitOutcome {
        if self.event_lock {
            return HitOutcome::EventLocked;
        }
        if !self.is_alive(user) {
            return HitOutcome::NotAlive;
        }
        if !self.turn_hits.insert(user) {
            return HitOutcome::AlreadyHit;
        }
        HitOutcome::Recorded
    }

    /// Subtract from boss hp, flooring at 0. Returns the new hp.
    pub fn damage_boss(&mut self, amount: i64) -> i64 {
        self.boss_hp = (self.boss_hp - amount.max(0)).max(0);
        self.boss_hp
    }

    /// Damage one player in the current phase. Returns true if they died.
    pub fn damage_player(&mut self, user: UserId, amount: i64) -> bool {
        let phase = self.phase;
        self.players
            .get_mut(&user)
            .is_some_and(|p| p.take_damage(amount, phase))
    }

    /// Damage each of `users` by a fresh `draw()`. Returns those who died.
    pub fn damage_each<F: FnMut() -> i64>(&mut self, users: &[UserId], mut draw: F) -> Vec<UserId> {
        users
            .iter()
            .copied()
            .filter(|&user| {
                let amount = draw();
                self.damage_player(user, amount)
            })
            .collect()
    }

    /// Resolve the hits collected this turn, apply the boss counter-attack and
    /// check phase thresholds. Leaves `turn_hits` empty.
    pub fn resolve_turn<R: Rng + ?Sized>(&mut self, config: &FightConfig, rng: &mut R) -> TurnReport {
        let mut hitters: Vec<UserId> = std::mem::take(&mut self.turn_hits)
            .into_iter()
            .filter(|u| self.is_alive(*u))
            .collect();
        hitters.sort_unstable();

        let total_damage: i64 = hitters
            .iter()
            .map(|_| draw_damage(&config.damage, DamageKind::Hit, rng))
            .sum();
        if !hitters.is_empty() {
            self.damage_boss(total_damage);
        }

        let mut retaliation = None;
        let mut fallen = Vec::new();
        if self.boss_hp > 0 {
            let alive = self.alive_ids();
            if !alive.is_empty() {
                let amount = draw_damage(&config.damage, DamageKind::Retaliation, rng);
                fallen = self.damage_each(&alive, || amount);
                retaliation = Some(amount);
            }
        }

        let interlude = if self.boss_hp > 0 {
            self.advance_phase(&config.thresholds)
        } else {
            None
        };

        TurnReport {
            hits: hitters.len(),
            total_damage,
            boss_hp: self.boss_hp,
            retaliation,
            fallen,
            interlude,
        }
    }

    /// Advance at most one phase if its threshold has been crossed and its
    /// interlude has not run yet.
    pub fn advance_phase(&mut self, thresholds: &PhaseThresholds) -> Option<Interlude> {
        match self.phase {
            1 if self.boss_hp <= thresholds.speedrun && !self.one_time_done.speedrun => {
                self.phase = 2;
                self.one_time_done.speedrun = true;
                Some(Interlude::Speedrun)
            }
            2 if self.boss_hp <= thresholds.solo && !self.one_time_done.solo => {
                self.phase = 3;
                self.one_time_done.solo = true;
                Some(Interlude::SoloTrivia)
            }
            3 if self.boss_hp <= thresholds.typing && !self.one_time_done.typing => {
                self.phase = 4;
                self.one_time_done.typing = true;
                Some(Interlude::Typing)
            }
            4 if self.boss_hp <= thresholds.final_phase && !self.final_mode => {
                self.phase = 5;
                self.final_mode = true;
                Some(Interlude::FinalPhase)
            }
            _ => None,
        }
    }

    /// Claim the right to settle `fight_id`. Succeeds once per fight.
    pub fn claim_settlement(&mut self, fight_id: Uuid) -> bool {
        if self.is_fight(fight_id) && !self.settled {
            self.settled = true;
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            active: self.active,
            fight_id: self.active.then_some(self.fight_id),
            channel_id: self.channel_id,
            boss_hp: self.boss_hp,
            phase: self.phase,
            registered: self.players.len(),
            alive: self.alive_count(),
            event_lock: self.event_lock,
            final_mode: self.final_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::DamageRange;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const CHANNEL: ChannelId = 100;

    fn fixed_config(hit: i64, retaliation: i64) -> FightConfig {
        let mut config = FightConfig::default();
        config.damage.hit = DamageRange::new(hit, hit);
        config.damage.retaliation = DamageRange::new(retaliation, retaliation);
        config
    }

    fn session_with_players(players: &[UserId]) -> Session {
        let mut s = Session::idle();
        s.begin(CHANNEL, 10000);
        for &p in players {
            s.register(CHANNEL, p, 100).unwrap();
        }
        s
    }

    #[test]
    fn test_register_requires_active_session() {
        let mut s = Session::idle();
        assert!(matches!(
            s.register(CHANNEL, 1, 100),
            Err(FightError::NoActiveSession)
        ));
    }

    #[test]
    fn test_register_rejects_wrong_channel_and_duplicates() {
        let mut s = session_with_players(&[1]);
        assert!(matches!(
            s.register(CHANNEL + 1, 2, 100),
            Err(FightError::NoActiveSession)
        ));
        assert!(matches!(
            s.register(CHANNEL, 1, 100),
            Err(FightError::AlreadyRegistered)
        ));
        assert_eq!(s.players.len(), 1);
        assert_eq!(s.players[&1], PlayerState::new(100));
    }

    #[test]
    fn test_record_hit_rules() {
        let mut s = session_with_players(&[1, 2]);
        assert_eq!(s.record_hit(1), HitOutcome::Recorded);
        assert_eq!(s.record_hit(1), HitOutcome::AlreadyHit);
        assert_eq!(s.record_hit(3), HitOutcome::NotAlive);

        s.players.get_mut(&2).unwrap().hp = 0;
        assert_eq!(s.record_hit(2), HitOutcome::NotAlive);

        s.event_lock = true;
        s.turn_hits.clear();
        assert_eq!(s.record_hit(1), HitOutcome::EventLocked);
        assert!(s.turn_hits.is_empty());
    }

    #[test]
    fn test_resolve_turn_sums_hits_then_retaliates() {
        let mut s = session_with_players(&[1, 2, 3, 4]);
        for p in [1, 2, 3] {
            assert_eq!(s.record_hit(p), HitOutcome::Recorded);
        }
        let mut rng = StdRng::seed_from_u64(0);
        let report = s.resolve_turn(&fixed_config(150, 20), &mut rng);

        assert_eq!(report.hits, 3);
        assert_eq!(report.total_damage, 450);
        assert_eq!(report.boss_hp, 9550);
        assert_eq!(s.boss_hp, 9550);
        assert_eq!(report.retaliation, Some(20));
        assert!(report.fallen.is_empty());
        assert!(s.turn_hits.is_empty());
        for p in s.players.values() {
            assert_eq!(p.hp, 80);
        }
    }

    #[test]
    fn test_dead_hitters_do_not_count() {
        let mut s = session_with_players(&[1, 2]);
        s.record_hit(1);
        s.record_hit(2);
        s.players.get_mut(&2).unwrap().hp = -5;
        let mut rng = StdRng::seed_from_u64(0);
        let report = s.resolve_turn(&fixed_config(100, 10), &mut rng);
        assert_eq!(report.hits, 1);
        assert_eq!(report.total_damage, 100);
    }

    #[test]
    fn test_no_hits_still_retaliates() {
        let mut s = session_with_players(&[1]);
        let mut rng = StdRng::seed_from_u64(0);
        let report = s.resolve_turn(&fixed_config(100, 60), &mut rng);
        assert_eq!(report.hits, 0);
        assert_eq!(report.boss_hp, 10000);
        assert_eq!(s.players[&1].hp, 40);

        let report = s.resolve_turn(&fixed_config(100, 60), &mut rng);
        assert_eq!(report.fallen, vec![1]);
        assert_eq!(s.players[&1].phase_death, Some(1));
    }

    #[test]
    fn test_boss_hp_floors_at_zero_and_skips_retaliation() {
        let mut s = session_with_players(&[1]);
        s.boss_hp = 50;
        s.record_hit(1);
        let mut rng = StdRng::seed_from_u64(0);
        let report = s.resolve_turn(&fixed_config(150, 20), &mut rng);
        assert_eq!(report.boss_hp, 0);
        assert_eq!(report.retaliation, None);
        assert_eq!(report.interlude, None);
        assert_eq!(s.players[&1].hp, 100);
        assert_eq!(s.damage_boss(500), 0);
    }

    #[test]
    fn test_phase_death_set_once() {
        let mut p = PlayerState::new(100);
        assert!(!p.take_damage(60, 1));
        assert!(p.take_damage(60, 2));
        assert_eq!(p.phase_death, Some(2));
        assert!(!p.take_damage(500, 4));
        assert_eq!(p.phase_death, Some(2));
        assert_eq!(p.hp, -520);
    }

    #[test]
    fn test_speedrun_gate_fires_exactly_once() {
        let mut s = session_with_players(&[1]);
        let thresholds = PhaseThresholds::default();
        s.boss_hp = 7500;
        assert_eq!(s.advance_phase(&thresholds), Some(Interlude::Speedrun));
        assert_eq!(s.phase, 2);
        assert!(s.one_time_done.speedrun);
        // Still above the solo threshold: nothing else fires
        assert_eq!(s.advance_phase(&thresholds), None);
        assert_eq!(s.phase, 2);
    }

    #[test]
    fn test_phase_gates_advance_one_per_check_in_order() {
        let mut s = session_with_players(&[1]);
        let thresholds = PhaseThresholds::default();
        s.boss_hp = 100;
        assert_eq!(s.advance_phase(&thresholds), Some(Interlude::Speedrun));
        assert_eq!(s.advance_phase(&thresholds), Some(Interlude::SoloTrivia));
        assert_eq!(s.advance_phase(&thresholds), Some(Interlude::Typing));
        assert_eq!(s.advance_phase(&thresholds), Some(Interlude::FinalPhase));
        assert!(s.final_mode);
        assert_eq!(s.phase, 5);
        assert_eq!(s.advance_phase(&thresholds), None);
    }

    #[test]
    fn test_gate_does_not_refire_after_flag() {
        let mut s = session_with_players(&[1]);
        s.one_time_done.speedrun = true;
        s.boss_hp = 7000;
        assert_eq!(s.advance_phase(&PhaseThresholds::default()), None);
        assert_eq!(s.phase, 1);
    }

    #[test]
    fn test_settlement_claimed_once() {
        let mut s = session_with_players(&[1]);
        let id = s.fight_id;
        assert!(s.claim_settlement(id));
        assert!(!s.claim_settlement(id));
        assert!(!s.claim_settlement(Uuid::new_v4()));
    }

    #[test]
    fn test_snapshot() {
        let s = session_with_players(&[1, 2]);
        let snap = s.snapshot();
        assert!(snap.active);
        assert_eq!(snap.boss_hp, 10000);
        assert_eq!(snap.registered, 2);
        assert_eq!(snap.alive, 2);
        assert_eq!(snap.phase, 1);

        let idle = Session::idle().snapshot();
        assert!(!idle.active);
        assert!(idle.fight_id.is_none());
    }
}
