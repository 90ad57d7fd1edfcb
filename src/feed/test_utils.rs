//! Scripted `FeedTransport` for unit tests
//!
//! The test keeps a `ScriptedFeed` to push inbound messages, inject
//! failures and inspect what the manager asked the upstream for.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::core::types::PriceSample;
use crate::feed::errors::{FeedError, FeedResult};
use crate::feed::traits::{FeedMessage, FeedTransport};

enum Scripted {
    Message(FeedMessage),
    Error(FeedError),
}

#[derive(Default)]
struct Shared {
    connected: bool,
    connects: u32,
    disconnects: u32,
    fail_connects: u32,
    /// Subscribe calls that fail as if the socket died
    fail_subscribes: u32,
    refuse_subscribe: bool,
    subscribed: BTreeSet<String>,
    subscribe_calls: Vec<Vec<String>>,
}

pub(crate) struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
    inbound: mpsc::UnboundedReceiver<Scripted>,
}

pub(crate) struct ScriptedFeed {
    shared: Arc<Mutex<Shared>>,
    inbound_tx: mpsc::UnboundedSender<Scripted>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> (Self, ScriptedFeed) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        (
            Self {
                shared: shared.clone(),
                inbound,
            },
            ScriptedFeed { shared, inbound_tx },
        )
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn connect(&mut self) -> FeedResult<()> {
        let mut shared = self.shared.lock();
        shared.connects += 1;
        if shared.fail_connects > 0 {
            shared.fail_connects -= 1;
            return Err(FeedError::ConnectionFailed("scripted refusal".into()));
        }
        shared.connected = true;
        shared.subscribed.clear();
        Ok(())
    }

    async fn disconnect(&mut self) -> FeedResult<()> {
        let mut shared = self.shared.lock();
        shared.disconnects += 1;
        shared.connected = false;
        shared.subscribed.clear();
        Ok(())
    }

    async fn subscribe(&mut self, symbols: &[String]) -> FeedResult<()> {
        let mut shared = self.shared.lock();
        if !shared.connected {
            return Err(FeedError::NotConnected);
        }
        if shared.fail_subscribes > 0 {
            shared.fail_subscribes -= 1;
            return Err(FeedError::ConnectionFailed("scripted socket reset".into()));
        }
        if shared.refuse_subscribe {
            shared.refuse_subscribe = false;
            return Err(FeedError::SubscriptionFailed {
                symbols: symbols.join(","),
                reason: "scripted refusal".into(),
            });
        }
        shared.subscribe_calls.push(symbols.to_vec());
        shared.subscribed.extend(symbols.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[String]) -> FeedResult<()> {
        let mut shared = self.shared.lock();
        if !shared.connected {
            return Err(FeedError::NotConnected);
        }
        for s in symbols {
            shared.subscribed.remove(s);
        }
        Ok(())
    }

    async fn next_message(&mut self) -> FeedResult<FeedMessage> {
        match self.inbound.recv().await {
            Some(Scripted::Message(message)) => Ok(message),
            Some(Scripted::Error(e)) => Err(e),
            None => std::future::pending().await,
        }
    }

    fn feed_name(&self) -> &'static str {
        "scripted"
    }
}

impl ScriptedFeed {
    pub(crate) fn push_sample(&self, sample: PriceSample) {
        let _ = self
            .inbound_tx
            .send(Scripted::Message(FeedMessage::Ticks(vec![sample])));
    }

    pub(crate) fn push_tick(&self, symbol: &str, price: i64, ts_secs: i64) {
        let timestamp = Utc
            .timestamp_opt(1_700_000_000 + ts_secs, 0)
            .single()
            .unwrap_or_else(Utc::now);
        self.push_sample(PriceSample::new(symbol, Decimal::from(price), timestamp));
    }

    pub(crate) fn push_heartbeat(&self) {
        let _ = self.inbound_tx.send(Scripted::Message(FeedMessage::Heartbeat));
    }

    pub(crate) fn push_error(&self, error: FeedError) {
        let _ = self.inbound_tx.send(Scripted::Error(error));
    }

    /// Upstream closes the socket
    pub(crate) fn drop_connection(&self) {
        let _ = self.inbound_tx.send(Scripted::Message(FeedMessage::Closed));
    }

    pub(crate) fn fail_next_connects(&self, n: u32) {
        self.shared.lock().fail_connects = n;
    }

    pub(crate) fn fail_next_subscribes(&self, n: u32) {
        self.shared.lock().fail_subscribes = n;
    }

    pub(crate) fn refuse_next_subscribe(&self) {
        self.shared.lock().refuse_subscribe = true;
    }

    pub(crate) fn connects(&self) -> u32 {
        self.shared.lock().connects
    }

    pub(crate) fn disconnects(&self) -> u32 {
        self.shared.lock().disconnects
    }

    pub(crate) fn subscribed(&self) -> BTreeSet<String> {
        self.shared.lock().subscribed.clone()
    }

    pub(crate) fn last_subscribe(&self) -> Option<Vec<String>> {
        self.shared.lock().subscribe_calls.last().cloned()
    }

    pub(crate) async fn wait_for_subscribed(&self, symbol: &str) {
        let deadline = Duration::from_secs(30);
        tokio::time::timeout(deadline, async {
            while !self.shared.lock().subscribed.contains(symbol) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} was never subscribed upstream", symbol));
    }
}
