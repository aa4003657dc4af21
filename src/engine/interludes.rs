// Phase interludes: speedrun trivia, solo tagged trivia, the typing challenge
// and the final phase. Each runs on its own task while holding the floor.

use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;

use crate::chat::{ChatPlatform, Embed, InboundMessage, UserId};
use crate::db::DocumentStore;
use crate::metrics;
use crate::normalize::normalize;

use super::config::{draw_damage, DamageKind};
use super::server::{Accept, BossFightServer, FightContext, FloorGuard};
use super::session::{Interlude, Session};
use super::FightError;

/// Outcome of one final-phase round.
enum RoundOutcome {
    BossHit { hitters: usize, damage: i64, boss_hp: i64 },
    GroupHit { fallen: Vec<UserId> },
    /// The boss fell while the round was open; nobody takes damage.
    BossDown,
}

/// Alive players whose message normalizes to `target`.
fn typed_correctly(state: &Session, messages: &[InboundMessage], target: &str) -> BTreeSet<UserId> {
    messages
        .iter()
        .filter(|m| state.is_alive(m.author_id) && normalize(&m.content) == target)
        .map(|m| m.author_id)
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<C: ChatPlatform, S: DocumentStore> BossFightServer<C, S> {
    /// Launch an interlude on its own task. The floor is released when the
    /// task ends, whether the interlude finished, bailed out or panicked.
    pub(super) fn spawn_interlude(
        self: &Arc<Self>,
        kind: Interlude,
        ctx: FightContext,
        floor: FloorGuard,
    ) -> JoinHandle<()> {
        let server = Arc::clone(self);
        metrics::INTERLUDES_TOTAL
            .with_label_values(&[kind.label()])
            .inc();

        tokio::spawn(async move {
            let _floor = floor;
            let outcome = AssertUnwindSafe(server.run_interlude(kind, &ctx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {
                    tracing::info!(fight_id = %ctx.fight_id, interlude = kind.label(), "Interlude finished");
                }
                Ok(Err(FightError::Cancelled)) => {
                    tracing::info!(
                        fight_id = %ctx.fight_id,
                        interlude = kind.label(),
                        "Interlude stopped, fight no longer running"
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!(fight_id = %ctx.fight_id, interlude = kind.label(), "Interlude failed: {e}");
                    metrics::INTERLUDES_FAILED_TOTAL
                        .with_label_values(&[kind.label()])
                        .inc();
                }
                Err(panic) => {
                    tracing::error!(
                        fight_id = %ctx.fight_id,
                        interlude = kind.label(),
                        "Interlude panicked: {}",
                        panic_message(&*panic)
                    );
                    metrics::INTERLUDES_FAILED_TOTAL
                        .with_label_values(&[kind.label()])
                        .inc();
                }
            }
        })
    }

    async fn run_interlude(&self, kind: Interlude, ctx: &FightContext) -> Result<(), FightError> {
        match kind {
            Interlude::Speedrun => self.speedrun_trivia(ctx).await,
            Interlude::SoloTrivia => self.solo_trivia(ctx).await,
            Interlude::Typing => self.typing_challenge(ctx).await,
            Interlude::FinalPhase => self.final_phase(ctx).await,
        }
    }

    fn boss_defeated(&self, ctx: &FightContext) -> Result<bool, FightError> {
        self.with_fight(ctx, |s, _| s.boss_hp <= 0)
    }

    async fn announce_boss_down(&self, ctx: &FightContext) {
        self.announce(ctx.channel, "The boss has fallen! The round ends early.")
            .await;
    }

    // ── Speedrun trivia ───────────────────────────────────────────────

    /// Ask questions back to back. Every correct answer damages the boss at
    /// the end; no correct answers at all enrages the boss against every
    /// registered player.
    pub(super) async fn speedrun_trivia(&self, ctx: &FightContext) -> Result<(), FightError> {
        let questions = self.with_fight(ctx, |_, rng| {
            self.content
                .draw_questions(self.config.speedrun_questions, &mut *rng)
        })?;

        self.announce(
            ctx.channel,
            Embed::simple(
                "⚡ Speedrun Trivia Event!",
                format!(
                    "{} questions. Every correct answer damages the boss.\nAnswer in the channel as normal.",
                    questions.len()
                ),
            ),
        )
        .await;

        let mut correct = 0usize;
        for question in &questions {
            if self.boss_defeated(ctx)? {
                break;
            }
            let mut rx = self.listen();
            self.announce(ctx.channel, Embed::simple("Question", &question.prompt))
                .await;

            let answer = self
                .wait_for_message(
                    ctx,
                    &mut rx,
                    self.config.speedrun_answer_time(),
                    Accept::CorrectAnswer(question),
                )
                .await?;
            match answer {
                Some(msg) => {
                    correct += 1;
                    self.announce(
                        ctx.channel,
                        format!("✅ {} answered correctly!", self.mention(msg.author_id)),
                    )
                    .await;
                }
                None => {
                    self.announce(ctx.channel, "No correct answers for that question.")
                        .await;
                }
            }
        }

        if correct > 0 {
            let (total, boss_hp) = self.with_fight(ctx, |s, rng| {
                let total: i64 = (0..correct)
                    .map(|_| draw_damage(&self.config.damage, DamageKind::SpeedrunCorrect, &mut *rng))
                    .sum();
                (total, s.damage_boss(total))
            })?;
            metrics::BOSS_HP.set(boss_hp);
            self.announce(
                ctx.channel,
                Embed::simple(
                    "💥 Speedrun Result",
                    format!("{correct} correct answers hit the boss for {total} damage!\nBoss HP: {boss_hp}"),
                ),
            )
            .await;
        } else {
            let fallen = self.with_fight(ctx, |s, rng| {
                let everyone: Vec<UserId> = s.players.keys().copied().collect();
                s.damage_each(&everyone, || {
                    draw_damage(&self.config.damage, DamageKind::SpeedrunEnrage, &mut *rng)
                })
            })?;
            self.announce(
                ctx.channel,
                Embed::simple(
                    "❌ No correct answers",
                    format!(
                        "The boss enrages and lands a critical attack on every registered player!{}",
                        self.fallen_suffix(&fallen)
                    ),
                ),
            )
            .await;
        }
        Ok(())
    }

    // ── Solo tagged trivia ────────────────────────────────────────────

    /// Tag players one at a time. Only the tagged player's reply counts and
    /// the channel is locked while they answer.
    pub(super) async fn solo_trivia(&self, ctx: &FightContext) -> Result<(), FightError> {
        let questions = self.with_fight(ctx, |_, rng| self.content.shuffled_questions(&mut *rng))?;
        let alive = self.with_fight(ctx, |s, _| s.alive_count())?;
        if alive == 0 || questions.is_empty() {
            self.announce(ctx.channel, "No available players for solo trivia.")
                .await;
            return Ok(());
        }

        let tag_count = self.config.solo_tag_count;
        let answer_secs = self.config.solo_answer_time().as_secs();
        self.announce(
            ctx.channel,
            Embed::simple(
                "🎯 Solo Trivia",
                format!(
                    "The boss will tag {tag_count} players for solo questions. Only the tagged player may answer."
                ),
            ),
        )
        .await;

        let mut tagged: HashSet<UserId> = HashSet::new();
        for round in 0..tag_count {
            if self.boss_defeated(ctx)? {
                break;
            }
            let pick = self.with_fight(ctx, |s, rng| {
                let alive = s.alive_ids();
                let fresh: Vec<UserId> = alive
                    .iter()
                    .copied()
                    .filter(|u| !tagged.contains(u))
                    .collect();
                // Everyone alive has been tagged once: start over
                let pool = if fresh.is_empty() { &alive } else { &fresh };
                let pick = pool.choose(&mut *rng).copied();
                if let Some(user) = pick {
                    s.solo_tagged.push(user);
                }
                pick
            })?;
            let Some(user) = pick else {
                break;
            };
            tagged.insert(user);
            let question = &questions[round % questions.len()];
            let who = self.mention(user);

            self.announce(
                ctx.channel,
                format!(
                    "🔔 {who} has been tagged for a solo question. Only they may answer for {answer_secs} seconds."
                ),
            )
            .await;
            self.set_channel_locked(ctx.channel, true).await;

            let mut rx = self.listen();
            self.announce(ctx.channel, Embed::simple("Solo Question", &question.prompt))
                .await;
            let reply = self
                .wait_for_message(ctx, &mut rx, self.config.solo_answer_time(), Accept::From(user))
                .await;

            // Unlock whatever happened, including cancellation
            self.set_channel_locked(ctx.channel, false).await;

            let answered = reply?.is_some_and(|m| question.accepts(&m.content));
            if answered {
                let (damage, boss_hp) = self.with_fight(ctx, |s, rng| {
                    let damage = draw_damage(&self.config.damage, DamageKind::SoloSuccess, &mut *rng);
                    (damage, s.damage_boss(damage))
                })?;
                metrics::BOSS_HP.set(boss_hp);
                self.announce(
                    ctx.channel,
                    Embed::simple(
                        "✅ Correct!",
                        format!("{who} answered correctly and dealt {damage} damage!\nBoss HP: {boss_hp}"),
                    ),
                )
                .await;
            } else {
                let (damage, died) = self.with_fight(ctx, |s, rng| {
                    let damage = draw_damage(&self.config.damage, DamageKind::SoloFailure, &mut *rng);
                    (damage, s.damage_player(user, damage))
                })?;
                let fallen = if died { vec![user] } else { Vec::new() };
                self.announce(
                    ctx.channel,
                    Embed::simple(
                        "❌ Failed",
                        format!(
                            "{who} failed to answer and took {damage} critical damage.{}",
                            self.fallen_suffix(&fallen)
                        ),
                    ),
                )
                .await;
            }
        }
        Ok(())
    }

    // ── Typing challenge ──────────────────────────────────────────────

    /// Show a word per round; every alive player who does not type it in
    /// time takes damage.
    pub(super) async fn typing_challenge(&self, ctx: &FightContext) -> Result<(), FightError> {
        let words = self.with_fight(ctx, |_, rng| {
            self.content.draw_words(self.config.typing_rounds, &mut *rng)
        })?;

        self.announce(
            ctx.channel,
            Embed::simple(
                "⌨️ Typing Challenge",
                format!("{} rounds. Type the word displayed!", words.len()),
            ),
        )
        .await;

        for word in &words {
            let (alive, boss_hp) = self.with_fight(ctx, |s, _| (s.alive_count(), s.boss_hp))?;
            if alive == 0 || boss_hp <= 0 {
                break;
            }

            let mut rx = self.listen();
            self.announce(ctx.channel, Embed::simple("Type this:", word))
                .await;
            let messages = self
                .collect_messages(ctx, &mut rx, self.config.typing_window())
                .await?;

            let target = normalize(word);
            let resolved = self.with_fight(ctx, |s, rng| {
                if s.boss_hp <= 0 {
                    return None;
                }
                let correct = typed_correctly(s, &messages, &target);
                let missed: Vec<UserId> = s
                    .alive_ids()
                    .into_iter()
                    .filter(|u| !correct.contains(u))
                    .collect();
                let fallen = s.damage_each(&missed, || {
                    draw_damage(&self.config.damage, DamageKind::TypingFailure, &mut *rng)
                });
                Some((correct.len(), fallen))
            })?;
            let Some((correct, fallen)) = resolved else {
                self.announce_boss_down(ctx).await;
                break;
            };

            self.announce(
                ctx.channel,
                format!(
                    "Round complete: {correct} players typed the word correctly.{}",
                    self.fallen_suffix(&fallen)
                ),
            )
            .await;
            self.pause(ctx, self.config.round_pause()).await?;
        }
        Ok(())
    }

    // ── Final phase ───────────────────────────────────────────────────

    /// Alternate quick typing and trivia rounds until the boss or the party
    /// falls. A wipe here settles the fight directly.
    pub(super) async fn final_phase(&self, ctx: &FightContext) -> Result<(), FightError> {
        self.announce(
            ctx.channel,
            Embed::simple(
                "💀 Final Phase",
                "The boss is enraged! Typing and trivia rounds alternate until the end.",
            ),
        )
        .await;

        loop {
            let (alive, boss_hp, typing) =
                self.with_fight(ctx, |s, rng| (s.alive_count(), s.boss_hp, rng.gen_bool(0.5)))?;
            if alive == 0 || boss_hp <= 0 {
                break;
            }
            if typing {
                self.final_typing_round(ctx).await?;
            } else {
                self.final_trivia_round(ctx).await?;
            }
            self.pause(ctx, self.config.round_pause()).await?;
        }

        let wiped = self.with_fight(ctx, |s, _| s.alive_count() == 0 && s.boss_hp > 0)?;
        if wiped {
            self.announce(
                ctx.channel,
                Embed::simple("Fight Over", "All players have fallen. The boss remains victorious."),
            )
            .await;
            self.settle(ctx).await;
        }
        Ok(())
    }

    async fn final_typing_round(&self, ctx: &FightContext) -> Result<(), FightError> {
        let word = self.with_fight(ctx, |_, rng| self.content.random_word(&mut *rng))?;
        let mut rx = self.listen();
        self.announce(ctx.channel, Embed::simple("Final Typing", &word))
            .await;
        let messages = self
            .collect_messages(ctx, &mut rx, self.config.final_typing_window())
            .await?;

        let target = normalize(&word);
        let outcome = self.with_fight(ctx, |s, rng| {
            if s.boss_hp <= 0 {
                return RoundOutcome::BossDown;
            }
            let correct = typed_correctly(s, &messages, &target);
            if correct.is_empty() {
                let alive = s.alive_ids();
                let fallen = s.damage_each(&alive, || {
                    draw_damage(&self.config.damage, DamageKind::FinalTypingFailure, &mut *rng)
                });
                RoundOutcome::GroupHit { fallen }
            } else {
                let damage: i64 = correct
                    .iter()
                    .map(|_| draw_damage(&self.config.damage, DamageKind::FinalTypingSuccess, &mut *rng))
                    .sum();
                RoundOutcome::BossHit {
                    hitters: correct.len(),
                    damage,
                    boss_hp: s.damage_boss(damage),
                }
            }
        })?;

        match outcome {
            RoundOutcome::BossHit {
                hitters,
                damage,
                boss_hp,
            } => {
                metrics::BOSS_HP.set(boss_hp);
                self.announce(
                    ctx.channel,
                    format!("Final typing: {hitters} players hit the boss for {damage} damage. Boss HP: {boss_hp}"),
                )
                .await;
            }
            RoundOutcome::GroupHit { fallen } => {
                self.announce(
                    ctx.channel,
                    format!(
                        "No correct answers. The boss lands a massive attack on everyone!{}",
                        self.fallen_suffix(&fallen)
                    ),
                )
                .await;
            }
            RoundOutcome::BossDown => self.announce_boss_down(ctx).await,
        }
        Ok(())
    }

    async fn final_trivia_round(&self, ctx: &FightContext) -> Result<(), FightError> {
        let question = self.with_fight(ctx, |_, rng| self.content.random_question(&mut *rng))?;
        let mut rx = self.listen();
        self.announce(ctx.channel, Embed::simple("Final Trivia", &question.prompt))
            .await;
        let answer = self
            .wait_for_message(
                ctx,
                &mut rx,
                self.config.final_trivia_answer_time(),
                Accept::CorrectAnswer(&question),
            )
            .await?;

        let outcome = self.with_fight(ctx, |s, rng| {
            if s.boss_hp <= 0 {
                return RoundOutcome::BossDown;
            }
            if answer.is_some() {
                let damage = draw_damage(&self.config.damage, DamageKind::FinalTriviaSuccess, &mut *rng);
                RoundOutcome::BossHit {
                    hitters: 1,
                    damage,
                    boss_hp: s.damage_boss(damage),
                }
            } else {
                let alive = s.alive_ids();
                let fallen = s.damage_each(&alive, || {
                    draw_damage(&self.config.damage, DamageKind::FinalTriviaFailure, &mut *rng)
                });
                RoundOutcome::GroupHit { fallen }
            }
        })?;

        match (outcome, answer) {
            (RoundOutcome::BossHit { damage, boss_hp, .. }, Some(msg)) => {
                metrics::BOSS_HP.set(boss_hp);
                self.announce(
                    ctx.channel,
                    format!(
                        "✅ {} got it and dealt {damage} damage! Boss HP: {boss_hp}",
                        self.mention(msg.author_id)
                    ),
                )
                .await;
            }
            (RoundOutcome::GroupHit { fallen }, _) => {
                self.announce(
                    ctx.channel,
                    format!(
                        "No correct answers. The boss slams everyone with force!{}",
                        self.fallen_suffix(&fallen)
                    ),
                )
                .await;
            }
            _ => self.announce_boss_down(ctx).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::OutgoingMessage;
    use crate::engine::config::FightConfig;
    use crate::engine::test_support::{description, fixed, message, test_server, CHANNEL};

    #[tokio::test(start_paused = true)]
    async fn test_speedrun_without_answers_enrages_every_registered_player() {
        let mut config = FightConfig::default();
        config.speedrun_questions = 2;
        config.damage.speedrun_enrage = fixed(450);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1, 2]);
        {
            let mut state = server.state();
            state.phase = 2;
            let dead = state.players.get_mut(&2).unwrap();
            dead.hp = -10;
            dead.phase_death = Some(1);
        }

        server.speedrun_trivia(&ctx).await.unwrap();

        let state = server.state();
        assert_eq!(state.boss_hp, 10000);
        assert_eq!(state.players[&1].hp, -350);
        assert_eq!(state.players[&1].phase_death, Some(2));
        // Already dead: still hit, death phase unchanged
        assert_eq!(state.players[&2].hp, -460);
        assert_eq!(state.players[&2].phase_death, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speedrun_correct_answers_damage_boss() {
        let mut config = FightConfig::default();
        config.speedrun_questions = 3;
        config.damage.speedrun_correct = fixed(300);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1]);
        let mut out = server.chat().subscribe();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.speedrun_trivia(&ctx).await });

        let mut asked = 0;
        while let Ok(msg) = out.recv().await {
            if msg.headline() == "Question" {
                asked += 1;
                // Unregistered users cannot answer
                server.handle_message(&message(1, CHANNEL, 99, "spica")).await;
                server.handle_message(&message(2, CHANNEL, 1, "  SPICA")).await;
            }
            if msg.headline() == "💥 Speedrun Result" {
                break;
            }
        }
        task.await.unwrap().unwrap();

        // The test pool holds a single question
        assert_eq!(asked, 1);
        assert_eq!(server.state().boss_hp, 9700);
        assert_eq!(server.state().players[&1].hp, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_solo_failure_unlocks_channel_and_damages_player() {
        let mut config = FightConfig::default();
        config.solo_tag_count = 1;
        config.damage.solo_failure = fixed(900);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1]);
        server.state().phase = 3;

        server.solo_trivia(&ctx).await.unwrap();

        assert_eq!(
            server.chat().permissions(),
            vec![(CHANNEL, false), (CHANNEL, true)]
        );
        let state = server.state();
        assert!(!state.channel_locked);
        assert_eq!(state.solo_tagged, vec![1]);
        assert_eq!(state.players[&1].hp, -800);
        assert_eq!(state.players[&1].phase_death, Some(3));
        assert_eq!(state.boss_hp, 10000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_solo_only_tagged_player_counts() {
        let mut config = FightConfig::default();
        config.solo_tag_count = 1;
        config.damage.solo_success = fixed(1000);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1]);
        let mut out = server.chat().subscribe();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.solo_trivia(&ctx).await });

        while let Ok(msg) = out.recv().await {
            if msg.headline() == "Solo Question" {
                server.handle_message(&message(1, CHANNEL, 99, "spica")).await;
                server.handle_message(&message(2, CHANNEL, 1, "Spica")).await;
                break;
            }
        }
        task.await.unwrap().unwrap();

        assert_eq!(server.state().boss_hp, 9000);
        assert_eq!(server.state().players[&1].hp, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_solo_continues_without_permission() {
        let mut config = FightConfig::default();
        config.solo_tag_count = 2;
        config.damage.solo_failure = fixed(10);
        let server = test_server(config).await;
        server.chat().deny_permissions();
        let ctx = server.open_fight(CHANNEL, &[1, 2]);

        server.solo_trivia(&ctx).await.unwrap();

        let state = server.state();
        assert!(server.chat().permissions().is_empty());
        assert!(!state.channel_locked);
        // Two tags, two different players
        assert_eq!(state.solo_tagged.len(), 2);
        assert_ne!(state.solo_tagged[0], state.solo_tagged[1]);
        assert_eq!(state.players[&1].hp, 90);
        assert_eq!(state.players[&2].hp, 90);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_challenge_spares_correct_typists() {
        let mut config = FightConfig::default();
        config.typing_rounds = 1;
        config.damage.typing_failure = fixed(500);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1, 2]);
        server.state().phase = 4;
        let mut out = server.chat().subscribe();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.typing_challenge(&ctx).await });

        while let Ok(msg) = out.recv().await {
            if msg.headline() == "Type this:" {
                let word = description(&msg).to_uppercase();
                server.handle_message(&message(1, CHANNEL, 1, &word)).await;
                server.handle_message(&message(2, CHANNEL, 2, "wrong")).await;
                break;
            }
        }
        task.await.unwrap().unwrap();

        let state = server.state();
        assert_eq!(state.players[&1].hp, 100);
        assert_eq!(state.players[&2].hp, -400);
        assert_eq!(state.players[&2].phase_death, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_phase_ends_when_boss_falls() {
        let mut config = FightConfig::default();
        config.damage.final_typing_success = fixed(400);
        config.damage.final_trivia_success = fixed(600);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1]);
        {
            let mut state = server.state();
            state.phase = 5;
            state.final_mode = true;
            state.boss_hp = 300;
        }
        let mut out = server.chat().subscribe();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.final_phase(&ctx).await });

        while let Ok(msg) = out.recv().await {
            match msg.headline() {
                "Final Typing" => {
                    let word = description(&msg).to_string();
                    server.handle_message(&message(1, CHANNEL, 1, &word)).await;
                    break;
                }
                "Final Trivia" => {
                    server.handle_message(&message(1, CHANNEL, 1, "spica")).await;
                    break;
                }
                _ => {}
            }
        }
        task.await.unwrap().unwrap();

        // The boss died; settlement is left to the turn engine
        let state = server.state();
        assert_eq!(state.boss_hp, 0);
        assert!(state.active);
        assert!(!state.settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_phase_wipe_settles() {
        let mut config = FightConfig::default();
        config.damage.final_typing_failure = fixed(150);
        config.damage.final_trivia_failure = fixed(150);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1]);
        {
            let mut state = server.state();
            state.phase = 5;
            state.final_mode = true;
            state.boss_hp = 400;
        }

        server.final_phase(&ctx).await.unwrap();

        assert!(!server.status().active);
        assert_eq!(server.ledger().balance(1).await.unwrap(), 2500);
        let headlines = server.chat().headlines();
        assert!(headlines.iter().any(|h| h == "Fight Over"));
        assert!(headlines.iter().any(|h| h == "🏆 Bossfight Results"));
    }

    fn crit_config() -> FightConfig {
        let mut config = FightConfig::default();
        config.crit_chance = 1.0;
        config.damage.critical = fixed(600);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_round_open_when_boss_falls_spares_players() {
        let mut config = crit_config();
        config.damage.final_typing_failure = fixed(150);
        config.damage.final_trivia_failure = fixed(150);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1]);
        {
            let mut state = server.state();
            state.phase = 5;
            state.final_mode = true;
            state.boss_hp = 300;
        }
        let mut out = server.chat().subscribe();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.final_phase(&ctx).await });

        while let Ok(msg) = out.recv().await {
            if msg.headline() == "Final Typing" || msg.headline() == "Final Trivia" {
                server.handle_message(&message(1, CHANNEL, 1, "critical hit")).await;
                break;
            }
        }
        task.await.unwrap().unwrap();

        let state = server.state();
        assert_eq!(state.boss_hp, 0);
        assert_eq!(state.players[&1].hp, 100);
        assert_eq!(state.players[&1].phase_death, None);
        assert!(!state.settled);
        drop(state);
        assert!(server
            .chat()
            .headlines()
            .iter()
            .any(|h| h == "The boss has fallen! The round ends early."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_round_open_when_boss_falls_spares_players() {
        let mut config = crit_config();
        config.typing_rounds = 3;
        config.damage.typing_failure = fixed(500);
        let server = test_server(config).await;
        let ctx = server.open_fight(CHANNEL, &[1, 2]);
        {
            let mut state = server.state();
            state.phase = 4;
            state.boss_hp = 300;
        }
        let mut out = server.chat().subscribe();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.typing_challenge(&ctx).await });

        while let Ok(msg) = out.recv().await {
            if msg.headline() == "Type this:" {
                server.handle_message(&message(1, CHANNEL, 1, "critical hit")).await;
                break;
            }
        }
        task.await.unwrap().unwrap();

        let state = server.state();
        assert_eq!(state.boss_hp, 0);
        assert_eq!(state.players[&1].hp, 100);
        assert_eq!(state.players[&2].hp, 100);
        drop(state);
        let headlines = server.chat().headlines();
        assert_eq!(headlines.iter().filter(|h| h.as_str() == "Type this:").count(), 1);
        assert!(!headlines.iter().any(|h| h.starts_with("Round complete")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interlude_panic_releases_floor() {
        let mut config = FightConfig::default();
        config.damage.speedrun_enrage = fixed(450);
        let server = test_server(config).await;
        server.chat().panic_on("Question");
        let ctx = server.open_fight(CHANNEL, &[1]);
        let failed_before = metrics::INTERLUDES_FAILED_TOTAL
            .with_label_values(&["speedrun"])
            .get();

        let floor = {
            let mut state = server.state();
            FloorGuard::acquire(&server.session, &mut *state)
        };
        assert!(server.state().event_lock);

        server
            .spawn_interlude(Interlude::Speedrun, ctx, floor)
            .await
            .unwrap();

        let state = server.state();
        assert!(!state.event_lock);
        assert!(state.active);
        // The rest of the interlude was skipped: no enrage, no boss damage
        assert_eq!(state.players[&1].hp, 100);
        assert_eq!(state.boss_hp, 10000);
        drop(state);
        assert!(
            metrics::INTERLUDES_FAILED_TOTAL
                .with_label_values(&["speedrun"])
                .get()
                > failed_before
        );
        assert!(server.chat().headlines().contains(&"⚡ Speedrun Trivia Event!".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_interlude() {
        let server = test_server(FightConfig::default()).await;
        let ctx = server.open_fight(CHANNEL, &[1]);
        let mut out = server.chat().subscribe();

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.speedrun_trivia(&ctx).await });

        while let Ok(msg) = out.recv().await {
            if matches!(msg, OutgoingMessage::Embed { .. }) && msg.headline() == "Question" {
                break;
            }
        }
        server.cancel().await.unwrap();

        assert!(matches!(task.await.unwrap(), Err(FightError::Cancelled)));
        assert_eq!(server.state().players.len(), 0);
    }
}
