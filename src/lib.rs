// Boss-fight mini-game for a community chat bot.

pub mod api;
pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod metrics;
pub mod normalize;
pub mod points;
