// Bossfight server: owns the live session, runs the turn engine on a tokio
// task and routes chat messages from the fight channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::chat::{ChannelId, ChatError, ChatPlatform, Embed, InboundMessage, OutgoingMessage, UserId};
use crate::db::DocumentStore;
use crate::metrics;
use crate::normalize::normalize;
use crate::points::PointLedger;

use super::config::{draw_damage, DamageKind, FightConfig};
use super::content::{ContentPool, Question};
use super::session::{HitOutcome, Session, SessionSnapshot};
use super::FightError;

const HIT_REACTION: &str = "⚔️";

/// Handle carried by every task that belongs to one fight.
#[derive(Clone)]
pub(crate) struct FightContext {
    pub(super) fight_id: Uuid,
    pub(super) channel: ChannelId,
    pub(super) cancel: watch::Receiver<bool>,
}

impl FightContext {
    /// Resolves once the fight is cancelled or replaced by a newer one.
    pub(super) async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        // A closed channel means the sender was replaced by a newer fight.
        let _ = cancel.wait_for(|c| *c).await;
    }
}

/// Holds the floor for an interlude. Dropping it clears `event_lock` unless
/// the session has moved on to another fight.
pub(crate) struct FloorGuard {
    session: Arc<Mutex<Session>>,
    fight_id: Uuid,
}

impl FloorGuard {
    /// Take the floor. `state` must be the locked contents of `session`.
    pub(super) fn acquire(session: &Arc<Mutex<Session>>, state: &mut Session) -> Self {
        state.event_lock = true;
        Self {
            session: Arc::clone(session),
            fight_id: state.fight_id,
        }
    }
}

impl Drop for FloorGuard {
    fn drop(&mut self) {
        let mut state = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fight_id == self.fight_id {
            state.event_lock = false;
        }
    }
}

/// Which replies an interlude is waiting for.
#[derive(Clone, Copy)]
pub(super) enum Accept<'a> {
    /// A correct answer from any alive player.
    CorrectAnswer(&'a Question),
    /// Any message from one player.
    From(UserId),
}

enum CriticalAttempt {
    Locked,
    Landed { damage: i64, boss_hp: i64 },
    Missed,
}

pub struct BossFightServer<C, S> {
    pub(super) chat: Arc<C>,
    pub(super) ledger: Arc<PointLedger<S>>,
    pub(super) config: FightConfig,
    pub(super) content: ContentPool,
    command_prefix: String,
    pub(super) session: Arc<Mutex<Session>>,
    rng: Mutex<StdRng>,
    /// Messages from the fight channel, fanned out to waiting interludes.
    inbound: broadcast::Sender<InboundMessage>,
    pub(super) cancel_tx: Mutex<Option<watch::Sender<bool>>>,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ChatPlatform, S: DocumentStore> BossFightServer<C, S> {
    pub fn new(
        chat: Arc<C>,
        ledger: Arc<PointLedger<S>>,
        config: FightConfig,
        content: ContentPool,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (inbound, _) = broadcast::channel(256);
        Self {
            chat,
            ledger,
            config,
            content,
            command_prefix: "b!".to_string(),
            session: Arc::new(Mutex::new(Session::idle())),
            rng: Mutex::new(rng),
            inbound,
            cancel_tx: Mutex::new(None),
            engine: Mutex::new(None),
        }
    }

    /// Prefix used when announcements mention a command.
    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    pub fn chat(&self) -> &Arc<C> {
        &self.chat
    }

    pub fn ledger(&self) -> &Arc<PointLedger<S>> {
        &self.ledger
    }

    pub fn config(&self) -> &FightConfig {
        &self.config
    }

    pub(super) fn state(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the session, provided it still belongs to `ctx`'s fight.
    pub(super) fn with_fight<T>(
        &self,
        ctx: &FightContext,
        f: impl FnOnce(&mut Session, &mut StdRng) -> T,
    ) -> Result<T, FightError> {
        let mut state = self.state();
        if !state.is_fight(ctx.fight_id) {
            return Err(FightError::Cancelled);
        }
        let mut rng = self.rng();
        Ok(f(&mut *state, &mut *rng))
    }

    pub(super) fn ensure_current(&self, ctx: &FightContext) -> Result<(), FightError> {
        if self.state().is_fight(ctx.fight_id) {
            Ok(())
        } else {
            Err(FightError::Cancelled)
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Open a fight in `channel` and launch its turn engine.
    pub async fn start(self: &Arc<Self>, channel: ChannelId) -> Result<Uuid, FightError> {
        let ctx = {
            let mut state = self.state();
            if state.active {
                return Err(FightError::AlreadyActive);
            }
            let fight_id = state.begin(channel, self.config.boss_start_hp);
            let (cancel_tx, cancel_rx) = watch::channel(false);
            *self.cancel_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel_tx);
            FightContext {
                fight_id,
                channel,
                cancel: cancel_rx,
            }
        };

        metrics::FIGHTS_STARTED_TOTAL.inc();
        metrics::ACTIVE_FIGHTS.set(1);
        metrics::BOSS_HP.set(self.config.boss_start_hp);
        metrics::REGISTERED_PLAYERS.set(0);
        tracing::info!(fight_id = %ctx.fight_id, channel_id = channel, "Bossfight started");

        self.announce(
            channel,
            Embed::simple(
                "🔥 Bossfight Started!",
                format!(
                    "Register with `{}bossjoin`. Each registrant gets {} HP.\nType `hit` during turns to attack.",
                    self.command_prefix, self.config.player_start_hp
                ),
            ),
        )
        .await;

        let fight_id = ctx.fight_id;
        let handle = tokio::spawn(Arc::clone(self).run_turns(ctx));
        *self.engine.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(fight_id)
    }

    /// Register `user` for the fight bound to `channel`.
    pub async fn register(&self, channel: ChannelId, user: UserId) -> Result<(), FightError> {
        let registered = {
            let mut state = self.state();
            state.register(channel, user, self.config.player_start_hp)?;
            state.players.len()
        };
        metrics::REGISTERED_PLAYERS.set(registered as i64);
        tracing::info!(user_id = user, channel_id = channel, "Player registered");

        self.announce(
            channel,
            Embed::simple(
                "✅ Registered",
                format!(
                    "{} joined the bossfight with {} HP.",
                    self.mention(user),
                    self.config.player_start_hp
                ),
            ),
        )
        .await;
        Ok(())
    }

    pub fn status(&self) -> SessionSnapshot {
        self.state().snapshot()
    }

    /// Abort the running fight without settlement.
    pub async fn cancel(&self) -> Result<(), FightError> {
        let (channel, was_locked, fight_id) = {
            let mut state = self.state();
            if !state.active {
                return Err(FightError::NoActiveSession);
            }
            let cancelled = (state.channel_id, state.channel_locked, state.fight_id);
            *state = Session::idle();
            if let Some(tx) = self
                .cancel_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                let _ = tx.send(true);
            }
            cancelled
        };

        metrics::FIGHTS_CANCELLED_TOTAL.inc();
        metrics::ACTIVE_FIGHTS.set(0);
        metrics::REGISTERED_PLAYERS.set(0);
        metrics::BOSS_HP.set(0);
        tracing::info!(%fight_id, "Bossfight cancelled");

        if let Some(channel) = channel {
            if was_locked {
                if let Err(e) = self.chat.set_send_permission(channel, true).await {
                    tracing::warn!(channel_id = channel, "Failed to unlock channel on cancel: {e}");
                }
            }
            self.announce(channel, "Bossfight cancelled by an admin.").await;
        }
        Ok(())
    }

    /// Wait for the most recently started turn engine to finish.
    pub async fn join(&self) {
        let handle = self
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Turn engine task failed: {e}");
            }
        }
    }

    // ── Turn engine ───────────────────────────────────────────────────

    async fn run_turns(self: Arc<Self>, ctx: FightContext) {
        match self.turn_loop(&ctx).await {
            Ok(()) => tracing::info!(fight_id = %ctx.fight_id, "Turn engine finished"),
            Err(FightError::Cancelled) => {
                tracing::info!(fight_id = %ctx.fight_id, "Turn engine stopped, fight no longer running")
            }
            Err(e) => tracing::error!(fight_id = %ctx.fight_id, "Turn engine failed: {e}"),
        }
    }

    async fn turn_loop(self: &Arc<Self>, ctx: &FightContext) -> Result<(), FightError> {
        self.pause(ctx, self.config.start_delay()).await?;
        let mut interlude: Option<JoinHandle<()>> = None;

        loop {
            // An interlude owns the floor until its task ends.
            if let Some(handle) = interlude.take() {
                if let Err(e) = handle.await {
                    tracing::error!(fight_id = %ctx.fight_id, "Interlude task failed: {e}");
                }
            }

            let (boss_hp, alive) = self.with_fight(ctx, |s, _| (s.boss_hp, s.alive_count()))?;
            if boss_hp <= 0 {
                break;
            }
            if alive == 0 {
                self.announce(
                    ctx.channel,
                    Embed::simple("Fight ended", "No players remain. The bossfight is over."),
                )
                .await;
                self.settle(ctx).await;
                return Ok(());
            }

            self.with_fight(ctx, |s, _| s.turn_hits.clear())?;
            self.announce(
                ctx.channel,
                Embed::simple(
                    format!("Turn - Boss HP: {boss_hp}"),
                    format!(
                        "Type `hit` (once) within the next {} seconds to attack!",
                        self.config.turn_time().as_secs()
                    ),
                ),
            )
            .await;

            self.pause(ctx, self.config.turn_time()).await?;

            let (report, floor) = {
                let mut state = self.state();
                if !state.is_fight(ctx.fight_id) {
                    return Err(FightError::Cancelled);
                }
                let report = state.resolve_turn(&self.config, &mut *self.rng());
                let floor = report
                    .interlude
                    .map(|_| FloorGuard::acquire(&self.session, &mut *state));
                (report, floor)
            };
            metrics::TURN_DAMAGE.observe(report.total_damage as f64);
            metrics::BOSS_HP.set(report.boss_hp);

            if report.hits > 0 {
                self.announce(
                    ctx.channel,
                    Embed::simple(
                        "💥 Hits Resolved",
                        format!(
                            "{} players hit the boss this turn for a total of {} damage.\nBoss HP: {}",
                            report.hits, report.total_damage, report.boss_hp
                        ),
                    ),
                )
                .await;
            } else {
                self.announce(ctx.channel, "No hits this turn!").await;
            }

            if let Some(amount) = report.retaliation {
                self.announce(
                    ctx.channel,
                    format!(
                        "⚔️ Boss retaliates for {amount} damage to everyone still alive.{}",
                        self.fallen_suffix(&report.fallen)
                    ),
                )
                .await;
            }

            if let (Some(kind), Some(floor)) = (report.interlude, floor) {
                tracing::info!(
                    fight_id = %ctx.fight_id,
                    boss_hp = report.boss_hp,
                    interlude = kind.label(),
                    "Phase threshold crossed"
                );
                interlude = Some(self.spawn_interlude(kind, ctx.clone(), floor));
            }

            self.pause(ctx, self.config.round_pause()).await?;
        }

        self.settle(ctx).await;
        Ok(())
    }

    // ── Suspension points ─────────────────────────────────────────────

    /// Sleep for `duration` unless the fight ends first.
    pub(super) async fn pause(&self, ctx: &FightContext, duration: Duration) -> Result<(), FightError> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(FightError::Cancelled),
            _ = tokio::time::sleep(duration) => {}
        }
        self.ensure_current(ctx)
    }

    /// Subscribe to fight-channel messages. Subscribe before posting a prompt
    /// so that no reply can slip past.
    pub(super) fn listen(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    /// Wait up to `timeout` for the first message matching `accept`.
    /// `Ok(None)` means nobody matched in time.
    pub(super) async fn wait_for_message(
        &self,
        ctx: &FightContext,
        rx: &mut broadcast::Receiver<InboundMessage>,
        timeout: Duration,
        accept: Accept<'_>,
    ) -> Result<Option<InboundMessage>, FightError> {
        let deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(FightError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                received = rx.recv() => match received {
                    Ok(msg) if msg.channel_id == ctx.channel && self.accepts(accept, &msg) => {
                        return Ok(Some(msg));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(fight_id = %ctx.fight_id, "Interlude lagged, skipped {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                }
            }
        }
    }

    /// Gather every fight-channel message posted during `window`.
    pub(super) async fn collect_messages(
        &self,
        ctx: &FightContext,
        rx: &mut broadcast::Receiver<InboundMessage>,
        window: Duration,
    ) -> Result<Vec<InboundMessage>, FightError> {
        let deadline = Instant::now() + window;
        let mut collected = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(FightError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => break,
                received = rx.recv() => match received {
                    Ok(msg) if msg.channel_id == ctx.channel => collected.push(msg),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(fight_id = %ctx.fight_id, "Interlude lagged, skipped {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        self.ensure_current(ctx)?;
        Ok(collected)
    }

    fn accepts(&self, accept: Accept<'_>, msg: &InboundMessage) -> bool {
        match accept {
            Accept::CorrectAnswer(question) => {
                self.state().is_alive(msg.author_id) && question.accepts(&msg.content)
            }
            Accept::From(user) => msg.author_id == user,
        }
    }

    // ── Chat helpers ──────────────────────────────────────────────────

    /// Post to a channel. Failures are logged, never fatal to the fight.
    pub(super) async fn announce(&self, channel: ChannelId, message: impl Into<OutgoingMessage>) {
        if let Err(e) = self.chat.send(channel, message.into()).await {
            tracing::warn!(channel_id = channel, "Failed to send chat message: {e}");
        }
    }

    pub(super) fn mention(&self, user: UserId) -> String {
        self.chat
            .resolve_mention(user)
            .unwrap_or_else(|| format!("<@{user}>"))
    }

    /// " 💀 Fallen: a, b" for a non-empty list, empty otherwise.
    pub(super) fn fallen_suffix(&self, fallen: &[UserId]) -> String {
        if fallen.is_empty() {
            return String::new();
        }
        let names: Vec<String> = fallen.iter().map(|&u| self.mention(u)).collect();
        format!("\n💀 Fallen: {}", names.join(", "))
    }

    /// Deny (or restore) send permission on the fight channel. A missing
    /// permission is logged and the fight carries on without the lock.
    pub(super) async fn set_channel_locked(&self, channel: ChannelId, locked: bool) {
        match self.chat.set_send_permission(channel, !locked).await {
            Ok(()) => {
                let mut state = self.state();
                if state.in_channel(channel) {
                    state.channel_locked = locked;
                }
            }
            Err(ChatError::PermissionDenied) => {
                tracing::warn!(
                    channel_id = channel,
                    locked,
                    "Missing permission to change channel lock, continuing without it"
                );
            }
            Err(e) => tracing::warn!(channel_id = channel, locked, "Failed to change channel lock: {e}"),
        }
    }

    // ── Message router ────────────────────────────────────────────────

    /// Route a chat message. Only messages from the fight channel matter:
    /// they are handed to any waiting interlude, then checked for `hit` and
    /// `critical hit`.
    pub async fn handle_message(&self, msg: &InboundMessage) {
        if msg.is_bot {
            return;
        }
        let in_fight = self.state().in_channel(msg.channel_id);
        if !in_fight {
            return;
        }
        let _ = self.inbound.send(msg.clone());

        match normalize(&msg.content).as_str() {
            "hit" => self.route_hit(msg).await,
            "critical hit" => self.route_critical_hit(msg).await,
            _ => {}
        }
    }

    async fn route_hit(&self, msg: &InboundMessage) {
        let outcome = self.state().record_hit(msg.author_id);
        if outcome != HitOutcome::Recorded {
            tracing::debug!(user_id = msg.author_id, ?outcome, "Hit ignored");
            return;
        }
        metrics::HITS_TOTAL.inc();
        if let Err(e) = self
            .chat
            .react(msg.channel_id, msg.message_id, HIT_REACTION)
            .await
        {
            tracing::debug!(user_id = msg.author_id, "Failed to acknowledge hit: {e}");
        }
    }

    async fn route_critical_hit(&self, msg: &InboundMessage) {
        let user = msg.author_id;
        let attempt = {
            let mut state = self.state();
            if !state.in_channel(msg.channel_id) || !state.is_alive(user) || state.boss_hp <= 0 {
                return;
            }
            if state.phase < self.config.crit_min_phase {
                CriticalAttempt::Locked
            } else {
                let mut rng = self.rng();
                if rng.gen_bool(self.config.crit_chance.clamp(0.0, 1.0)) {
                    let damage = draw_damage(&self.config.damage, DamageKind::Critical, &mut *rng);
                    CriticalAttempt::Landed {
                        damage,
                        boss_hp: state.damage_boss(damage),
                    }
                } else {
                    CriticalAttempt::Missed
                }
            }
        };

        let who = self.mention(user);
        match attempt {
            CriticalAttempt::Locked => {
                self.announce(
                    msg.channel_id,
                    format!(
                        "{who}, critical hits are only available in Phase {}+.",
                        self.config.crit_min_phase
                    ),
                )
                .await;
            }
            CriticalAttempt::Landed { damage, boss_hp } => {
                metrics::CRITICAL_HITS_TOTAL.with_label_values(&["landed"]).inc();
                metrics::BOSS_HP.set(boss_hp);
                self.announce(
                    msg.channel_id,
                    Embed::simple(
                        "💥 Critical!",
                        format!("{who} landed a critical hit for {damage} damage! Boss HP: {boss_hp}"),
                    ),
                )
                .await;
            }
            CriticalAttempt::Missed => {
                metrics::CRITICAL_HITS_TOTAL.with_label_values(&["missed"]).inc();
                self.announce(
                    msg.channel_id,
                    Embed::simple("❌ Missed", format!("{who}'s critical hit missed!")),
                )
                .await;
            }
        }
    }
}
