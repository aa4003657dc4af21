// Boss-fight encounter engine: session state, turn loop, interludes and settlement.

pub mod config;
pub mod content;
mod interludes;
pub mod server;
pub mod session;
pub mod settlement;

#[cfg(test)]
pub(crate) mod test_support;

pub use server::BossFightServer;
pub use session::SessionSnapshot;

/// Errors surfaced by lifecycle calls. The display strings double as the
/// replies sent back to whoever invoked the command.
#[derive(Debug, thiserror::Error)]
pub enum FightError {
    #[error("A bossfight is already active in another channel.")]
    AlreadyActive,
    #[error("No active bossfight in this channel.")]
    NoActiveSession,
    #[error("You're already registered for this bossfight.")]
    AlreadyRegistered,
    #[error("Only server managers can do that.")]
    PermissionDenied,
    #[error("fight is no longer running")]
    Cancelled,
}
