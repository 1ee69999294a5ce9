//! briefbot core: chat sessions, daily briefing scheduler, IM adapters, Gemini backend. No CLI.

pub mod ai;
pub mod app;
pub mod briefing;
pub mod config;
pub mod im;
