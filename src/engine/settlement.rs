// Settlement: reward computation, the results summary and session teardown.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::chat::{ChatPlatform, Embed, UserId, COLOR_RESULTS};
use crate::db::{DocumentStore, StoreError};
use crate::metrics;
use crate::points::PointChange;

use super::config::RewardTable;
use super::server::{BossFightServer, FightContext};
use super::session::{PlayerState, Session};

/// Who gets what at the end of a fight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub awards: BTreeMap<UserId, i64>,
    pub survivors: Vec<UserId>,
    /// Dead players with the phase they fell in.
    pub fallen: Vec<(UserId, u8)>,
}

/// Survivors earn the top reward; the dead earn the tier of the phase they
/// fell in. A dead player without a recorded phase counts as phase 1.
pub fn compute_awards(players: &BTreeMap<UserId, PlayerState>, rewards: &RewardTable) -> SettlementReport {
    let mut report = SettlementReport::default();
    for (&user, player) in players {
        if player.is_alive() {
            report.survivors.push(user);
            report.awards.insert(user, rewards.survivor);
        } else {
            let phase = player.phase_death.unwrap_or(1);
            report.fallen.push((user, phase));
            report.awards.insert(user, rewards.for_death_phase(phase));
        }
    }
    report
}

impl<C: ChatPlatform, S: DocumentStore> BossFightServer<C, S> {
    /// Award points, post the summary and reset the session. Only the first
    /// call for a fight does anything.
    pub(super) async fn settle(&self, ctx: &FightContext) {
        let claimed = {
            let mut state = self.state();
            if state.claim_settlement(ctx.fight_id) {
                Some((state.players.clone(), state.boss_hp, state.started_at))
            } else {
                None
            }
        };
        let Some((players, boss_hp, started_at)) = claimed else {
            tracing::debug!(fight_id = %ctx.fight_id, "Settlement already claimed");
            return;
        };

        let report = compute_awards(&players, &self.config.rewards);
        let outcome = if boss_hp <= 0 { "victory" } else { "wipe" };
        tracing::info!(
            fight_id = %ctx.fight_id,
            outcome,
            survivors = report.survivors.len(),
            fallen = report.fallen.len(),
            "Settling bossfight"
        );

        let changes = if report.awards.is_empty() {
            Ok(BTreeMap::new())
        } else {
            self.ledger.award_points(&report.awards).await
        };
        if let Err(e) = &changes {
            tracing::error!(fight_id = %ctx.fight_id, "Failed to save boss points: {e}");
        }

        let summary = self.summary_embed(boss_hp, &report, &changes);
        self.announce(ctx.channel, summary).await;

        {
            let mut state = self.state();
            if state.fight_id == ctx.fight_id {
                *state = Session::idle();
            }
        }

        metrics::FIGHTS_FINISHED_TOTAL
            .with_label_values(&[outcome])
            .inc();
        metrics::ACTIVE_FIGHTS.set(0);
        metrics::REGISTERED_PLAYERS.set(0);
        metrics::BOSS_HP.set(0);
        if let Some(started_at) = started_at {
            let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
            metrics::FIGHT_DURATION_SECONDS.observe(elapsed);
        }
    }

    fn summary_embed(
        &self,
        boss_hp: i64,
        report: &SettlementReport,
        changes: &Result<BTreeMap<UserId, PointChange>, StoreError>,
    ) -> Embed {
        let mut embed = Embed::simple("🏆 Bossfight Results", "")
            .with_color(COLOR_RESULTS)
            .field("Boss HP", boss_hp.to_string(), false);

        if !report.survivors.is_empty() {
            let names: Vec<String> = report.survivors.iter().map(|&u| self.mention(u)).collect();
            embed = embed.field("Survivors", names.join(", "), false);
        }
        if !report.fallen.is_empty() {
            let lines: Vec<String> = report
                .fallen
                .iter()
                .map(|&(u, phase)| format!("{}: died at phase {phase}", self.mention(u)))
                .collect();
            embed = embed.field("Fallen", lines.join("\n"), false);
        }

        match changes {
            Ok(changes) if !changes.is_empty() => {
                let lines: Vec<String> = changes
                    .iter()
                    .map(|(&u, c)| format!("{}: {} → {}", self.mention(u), c.old, c.new))
                    .collect();
                embed = embed.field("Points Awarded", lines.join("\n"), false);
            }
            Ok(_) => {}
            Err(_) => {
                embed = embed.field("Points Awarded", "Points could not be saved this time.", false);
            }
        }
        embed
    }
}
