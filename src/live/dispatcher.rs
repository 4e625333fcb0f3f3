//! Tick fan-out over a streaming source.
//!
//! Owns subscription membership and reconnection so the pipeline only sees
//! a clean stream of ticks for symbols it still cares about. Single
//! consumer: one tick is handed out at a time, in stream-arrival order.

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::{ProviderError, Tick, TickSource};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Membership-aware wrapper around a [`TickSource`].
pub struct TickDispatcher<S: TickSource> {
    source: S,
    active: HashSet<String>,
    backoff: Duration,
}

impl<S: TickSource> TickDispatcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            active: HashSet::new(),
            backoff: INITIAL_BACKOFF,
        }
    }

    /// Connect the underlying stream and subscribe the initial set.
    pub async fn start(&mut self, symbols: &[String]) -> Result<(), ProviderError> {
        self.source.connect().await?;
        self.subscribe(symbols).await
    }

    /// Add symbols to the active set. Re-subscribing an already-active
    /// symbol is a no-op.
    pub async fn subscribe(&mut self, symbols: &[String]) -> Result<(), ProviderError> {
        let fresh: Vec<String> = symbols
            .iter()
            .filter(|s| !self.active.contains(*s))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.source.subscribe(&fresh).await?;
        for s in fresh {
            self.active.insert(s);
        }
        debug!(active = self.active.len(), "Subscription set grew");
        Ok(())
    }

    /// Drop symbols from the active set. The wire call is best effort;
    /// membership is updated regardless, so late ticks get filtered.
    pub async fn unsubscribe(&mut self, symbols: &[String]) {
        let dropped: Vec<String> = symbols
            .iter()
            .filter(|s| self.active.remove(*s))
            .cloned()
            .collect();
        if dropped.is_empty() {
            return;
        }
        if let Err(e) = self.source.unsubscribe(&dropped).await {
            warn!(error = %e, count = dropped.len(), "Unsubscribe failed, filtering locally");
        }
        debug!(active = self.active.len(), "Subscription set shrank");
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, symbol: &str) -> bool {
        self.active.contains(symbol)
    }

    /// Next tick for an active symbol. Late ticks for unsubscribed symbols
    /// are dropped here. Recoverable stream errors trigger reconnect with
    /// exponential backoff; `None` means the stream ended cleanly.
    pub async fn next(&mut self) -> Result<Option<Tick>, ProviderError> {
        loop {
            match self.source.next_tick().await {
                Ok(Some(tick)) => {
                    self.backoff = INITIAL_BACKOFF;
                    if !self.active.contains(&tick.symbol) {
                        debug!(symbol = %tick.symbol, "Dropping tick for unsubscribed symbol");
                        continue;
                    }
                    return Ok(Some(tick));
                }
                Ok(None) => return Ok(None),
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, backoff = ?self.backoff, "Stream error, reconnecting");
                    self.reconnect().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive the stream to completion, handing each tick to `handler`.
    pub async fn run(&mut self, mut handler: impl FnMut(Tick)) -> Result<(), ProviderError> {
        while let Some(tick) = self.next().await? {
            handler(tick);
        }
        Ok(())
    }

    /// Reconnect and re-subscribe only the currently-active set. Symbols
    /// unsubscribed before the drop stay unsubscribed.
    async fn reconnect(&mut self) -> Result<(), ProviderError> {
        loop {
            tokio::time::sleep(self.backoff).await;
            self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
            match self.source.connect().await {
                Ok(()) => break,
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, backoff = ?self.backoff, "Reconnect failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        let symbols: Vec<String> = self.active.iter().cloned().collect();
        if !symbols.is_empty() {
            self.source.subscribe(&symbols).await?;
        }
        info!(resubscribed = symbols.len(), "Stream reconnected");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;

    /// Scripted source: a queue of events plus call recording.
    #[derive(Default)]
    struct ScriptedSource {
        events: VecDeque<Result<Option<Tick>, ProviderError>>,
        subscribed: Vec<Vec<String>>,
        unsubscribed: Vec<Vec<String>>,
        connects: usize,
    }

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
            day_volume: None,
        }
    }

    #[async_trait]
    impl TickSource for ScriptedSource {
        async fn connect(&mut self) -> Result<(), ProviderError> {
            self.connects += 1;
            Ok(())
        }

        async fn subscribe(&mut self, symbols: &[String]) -> Result<(), ProviderError> {
            self.subscribed.push(symbols.to_vec());
            Ok(())
        }

        async fn unsubscribe(&mut self, symbols: &[String]) -> Result<(), ProviderError> {
            self.unsubscribed.push(symbols.to_vec());
            Ok(())
        }

        async fn next_tick(&mut self) -> Result<Option<Tick>, ProviderError> {
            self.events.pop_front().unwrap_or(Ok(None))
        }
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let mut d = TickDispatcher::new(ScriptedSource::default());
        d.start(&syms(&["TCS", "INFY"])).await.unwrap();
        d.subscribe(&syms(&["TCS"])).await.unwrap();
        d.subscribe(&syms(&["TCS", "SBIN"])).await.unwrap();

        assert_eq!(d.active_count(), 3);
        // second call sent nothing, third sent only the new symbol
        assert_eq!(d.source.subscribed.len(), 2);
        assert_eq!(d.source.subscribed[1], syms(&["SBIN"]));
    }

    #[tokio::test]
    async fn test_late_ticks_for_unsubscribed_are_dropped() {
        let mut source = ScriptedSource::default();
        source.events.push_back(Ok(Some(tick("TCS", 101.0))));
        source.events.push_back(Ok(Some(tick("INFY", 1500.0))));
        source.events.push_back(Ok(None));

        let mut d = TickDispatcher::new(source);
        d.start(&syms(&["TCS", "INFY"])).await.unwrap();
        d.unsubscribe(&syms(&["TCS"])).await;

        let first = d.next().await.unwrap().unwrap();
        assert_eq!(first.symbol, "INFY");
        assert!(d.next().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes_only_active_set() {
        let mut source = ScriptedSource::default();
        source
            .events
            .push_back(Err(ProviderError::Disconnected("reset".into())));
        source.events.push_back(Ok(Some(tick("INFY", 1500.0))));
        source.events.push_back(Ok(None));

        let mut d = TickDispatcher::new(source);
        d.start(&syms(&["TCS", "INFY"])).await.unwrap();
        d.unsubscribe(&syms(&["TCS"])).await;

        let t = d.next().await.unwrap().unwrap();
        assert_eq!(t.symbol, "INFY");
        assert_eq!(d.source.connects, 2);
        // the post-reconnect subscribe carries only the active symbol
        assert_eq!(d.source.subscribed.last().unwrap(), &syms(&["INFY"]));
    }

    #[tokio::test]
    async fn test_unrecoverable_error_bubbles() {
        let mut source = ScriptedSource::default();
        source
            .events
            .push_back(Err(ProviderError::Auth("expired".into())));
        let mut d = TickDispatcher::new(source);
        d.start(&syms(&["TCS"])).await.unwrap();
        assert!(d.next().await.is_err());
    }

    #[tokio::test]
    async fn test_run_drains_stream() {
        let mut source = ScriptedSource::default();
        source.events.push_back(Ok(Some(tick("TCS", 101.0))));
        source.events.push_back(Ok(Some(tick("TCS", 101.5))));
        source.events.push_back(Ok(None));

        let mut d = TickDispatcher::new(source);
        d.start(&syms(&["TCS"])).await.unwrap();
        let mut prices = Vec::new();
        d.run(|t| prices.push(t.price)).await.unwrap();
        assert_eq!(prices, vec![101.0, 101.5]);
    }
}
