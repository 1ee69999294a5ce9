//! Platform adapters. Each module keeps its SDK (serenity, teloxide) to itself and exposes a
//! transport plus a `run_*_bot` entry point.

pub mod discord;
pub mod telegram;
