use crate::prelude::*;

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(PartialEq, Debug, Clone)]
pub enum ChannelData {
    Connected,            // these three only ever go
    Disconnected(String), // device->coordinator
    Sample(DecodedSample),
    PollFailed(String),
    SetInterval(u64), // coordinator->device, milliseconds
    Shutdown,
}
pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

/// Background poller. Owns the one `Session` and runs one poll per tick, so
/// there is never more than one exchange in flight.
#[derive(Clone)]
pub struct Device {
    config: ConfigWrapper,
    channels: Channels,
}

impl Device {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let mut session = Session::new(self.config.device());
        let mut receiver = self.channels.to_device.subscribe();
        let mut interval = Self::interval(Instant::now(), self.config.poll().interval_ms());
        let mut reported = LinkState::Disconnected;

        info!("device poller starting, interval {}ms", self.config.poll().interval_ms());

        loop {
            tokio::select! {
                msg = receiver.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) => {
                            info!("device poller received shutdown signal");
                            break;
                        }
                        Ok(ChannelData::SetInterval(ms)) => {
                            if ms == 0 {
                                warn!("ignoring refresh interval of 0ms");
                                continue;
                            }
                            self.config.set_interval_ms(ms);
                            // next poll one full period from now, not straight away
                            interval = Self::interval(Instant::now() + Duration::from_millis(ms), ms);
                            info!("refresh interval changed to {}ms", ms);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => warn!("device poller missed {} messages", n),
                        Err(RecvError::Closed) => break,
                    }
                }

                _ = interval.tick() => {
                    self.tick(&mut session, &mut reported).await;
                }
            }
        }

        session.close();
        self.report_state(&session, &mut reported, "shutdown");

        info!("device poller exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_device.send(ChannelData::Shutdown);
    }

    fn interval(start: Instant, ms: u64) -> Interval {
        let mut interval = tokio::time::interval_at(start, Duration::from_millis(ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    async fn tick(&self, session: &mut Session, reported: &mut LinkState) {
        if !session.is_connected() {
            if let Err(e) = session.connect().await {
                warn!("{}", e);
                self.send(ChannelData::PollFailed(e.to_string()));
                return;
            }
            self.report_state(session, reported, "connected");
        }

        let reconnects = session.reconnects();
        let result = session.poll_once().await;

        if session.reconnects() != reconnects {
            // the link dropped mid-cycle, even if it came straight back
            *reported = LinkState::Disconnected;
            self.send(ChannelData::Disconnected("link failure during poll".to_string()));
        }
        self.report_state(session, reported, "reconnect failed");

        match result {
            Ok(sample) => self.send(ChannelData::Sample(sample)),
            Err(e) => self.send(ChannelData::PollFailed(e.to_string())),
        }
    }

    fn report_state(&self, session: &Session, reported: &mut LinkState, reason: &str) {
        let current = if session.is_connected() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        };

        if current == *reported {
            return;
        }
        *reported = current;

        match current {
            LinkState::Connected => self.send(ChannelData::Connected),
            _ => self.send(ChannelData::Disconnected(reason.to_string())),
        }
    }

    fn send(&self, data: ChannelData) {
        if self.channels.from_device.send(data).is_err() {
            debug!("no subscribers for device data");
        }
    }
}
