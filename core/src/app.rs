//! Application instance: owns config, AI backend and session store, wires the worker and the
//! briefing scheduler to a platform transport, and runs the configured platform.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::ai::{BackendError, ChatBackend, GeminiBackend};
use crate::briefing::{BriefingScheduler, SystemClock};
use crate::config::Config;
use crate::im::daemon::OutboundHub;
use crate::im::session::SessionStore;
use crate::im::spec::ImChannelKind;
use crate::im::transport::ImTransport;
use crate::im::worker::{run_worker, InboundMessage};
use crate::im::{discord, telegram};

const INBOUND_CAPACITY: usize = 64;

pub struct App {
    config: Config,
    backend: Arc<dyn ChatBackend>,
    store: Arc<SessionStore>,
}

impl App {
    /// Build the app with the Gemini backend from config.
    pub fn new(config: Config) -> Result<Self, BackendError> {
        let backend = GeminiBackend::new(&config.gemini)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            config,
            backend,
            store: Arc::new(SessionStore::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Spawn the send daemon hub, the worker and (when enabled) the briefing scheduler for a
    /// transport. Returns the inbound queue the platform receiver pushes into; dropping it stops
    /// the worker, and the scheduler at its next poll.
    pub fn start_pipeline<T>(&self, transport: Arc<T>) -> mpsc::Sender<InboundMessage>
    where
        T: ImTransport + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let outbound = OutboundHub::new(transport);

        tokio::spawn(run_worker(
            inbound_rx,
            Arc::clone(&outbound),
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
        ));

        if self.config.briefing.enabled {
            let scheduler = BriefingScheduler::new(
                &self.config.briefing,
                Arc::clone(&self.store),
                &inbound_tx,
                outbound,
            );
            tokio::spawn(scheduler.run(SystemClock));
        } else {
            tracing::info!("daily briefing disabled");
        }

        inbound_tx
    }

    /// Run the configured platform until its connection ends.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            platform = %self.config.platform,
            model = self.backend.model(),
            briefing_channel = %self.config.briefing.channel_id,
            "starting bot"
        );
        match self.config.platform {
            ImChannelKind::Discord => discord::run_discord_bot(self).await,
            ImChannelKind::Telegram => telegram::run_telegram_bot(self).await,
        }
    }
}
