//! Daily briefing: once a minute, check the clock in the briefing time zone; at the configured
//! hour and minute, and only once per local calendar date, feed the fixed prompt into the worker
//! as a scheduler message so the answer goes through the channel's normal session.
//!
//! There is no catch-up: a poll that misses the trigger minute (suspend, clock jump) skips that
//! day's briefing. The date guard lives in [`SessionStore`] and resets only on restart.
//!
//! The scheduler only holds a weak handle on the inbound queue: once the platform receiver drops
//! its sender the worker drains and stops, and the next poll stops the scheduler too.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::BriefingSettings;
use crate::im::daemon::{OutboundHub, OutboundMsg};
use crate::im::log::{channel_name, chat_id};
use crate::im::session::SessionStore;
use crate::im::transport::ImTransport;
use crate::im::worker::InboundMessage;

/// The daily investment-briefing request.
pub const BRIEFING_PROMPT: &str = "오늘의 투자 브리핑을 시작해줘. 어젯밤 미국 증시 마감 상황과 오늘 아침 나온 국내외 주요 증권사 리포트, 그리고 핵심 경제 뉴스를 종합적으로 분석해서, 오늘 내가 취해야 할 구체적인 투자 전략과 주목할 만한 섹터를 알려줘.";

pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Source of "now". Tests use a fixed or scripted clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Trigger time in a named zone.
#[derive(Debug, Clone, Copy)]
pub struct BriefingSchedule {
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
}

impl BriefingSchedule {
    /// Local date of `now` if `now` falls in the trigger minute, else None.
    pub fn matching_date(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let local = now.with_timezone(&self.timezone);
        (local.hour() == self.hour && local.minute() == self.minute).then(|| local.date_naive())
    }
}

impl From<&BriefingSettings> for BriefingSchedule {
    fn from(s: &BriefingSettings) -> Self {
        Self { hour: s.hour, minute: s.minute, timezone: s.timezone }
    }
}

pub struct BriefingScheduler<T> {
    schedule: BriefingSchedule,
    channel_id: String,
    echo_prompt: bool,
    store: Arc<SessionStore>,
    inbound_tx: mpsc::WeakSender<InboundMessage>,
    outbound: Arc<OutboundHub<T>>,
}

impl<T> BriefingScheduler<T>
where
    T: ImTransport + 'static,
{
    pub fn new(
        settings: &BriefingSettings,
        store: Arc<SessionStore>,
        inbound_tx: &mpsc::Sender<InboundMessage>,
        outbound: Arc<OutboundHub<T>>,
    ) -> Self {
        Self {
            schedule: BriefingSchedule::from(settings),
            channel_id: settings.channel_id.clone(),
            echo_prompt: settings.echo_prompt,
            store,
            inbound_tx: inbound_tx.downgrade(),
            outbound,
        }
    }

    /// The inbound queue, while the platform side still holds it open.
    fn inbound(&self) -> Option<mpsc::Sender<InboundMessage>> {
        self.inbound_tx.upgrade().filter(|tx| !tx.is_closed())
    }

    /// One check. Returns true when the briefing fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> bool {
        let Some(date) = self.schedule.matching_date(now) else {
            return false;
        };
        let Some(inbound_tx) = self.inbound() else {
            return false;
        };
        if !self.store.claim_briefing(date) {
            return false;
        }

        let local = now.with_timezone(&self.schedule.timezone);
        tracing::info!(
            channel = channel_name(&self.channel_id),
            chat_id = chat_id(&self.channel_id),
            local_time = %local.format("%Y-%m-%d %H:%M:%S %Z"),
            "daily briefing triggered"
        );

        if self.echo_prompt {
            self.outbound
                .send(&self.channel_id, OutboundMsg::Send(BRIEFING_PROMPT.to_string()))
                .await;
        }
        let msg = InboundMessage::from_scheduler(self.channel_id.clone(), BRIEFING_PROMPT.to_string());
        if inbound_tx.send(msg).await.is_err() {
            tracing::warn!("inbound queue closed, briefing dropped");
        }
        true
    }

    /// Poll until the inbound queue closes (the platform receiver is gone).
    pub async fn run(self, clock: impl Clock) {
        tracing::info!(
            channel = channel_name(&self.channel_id),
            chat_id = chat_id(&self.channel_id),
            hour = self.schedule.hour,
            minute = self.schedule.minute,
            timezone = %self.schedule.timezone,
            "briefing scheduler started"
        );
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.inbound().is_none() {
                break;
            }
            self.tick(clock.now()).await;
        }
        tracing::info!("briefing scheduler stopped");
    }
}
