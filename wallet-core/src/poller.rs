//! Recurring block-range event watcher.
//!
//! Each subscription owns one cursor. A cycle reads the chain head, scans the
//! blocks the cursor has not covered yet, filters the decoded events on the
//! client side and hands matches to the consumer. The cursor only moves after a
//! successful scan, so a failed window is scanned again on the next cycle.

use crate::blockchain::{BlockRange, LedgerEvent};
use crate::blockchain_client::LedgerClient;
use crate::contracts::{ContractBinding, ContractRegistry, ContractRole};
use crate::errors::{WalletError, WalletResult};
use ethers_core::abi::Token;
use ethers_core::types::{Address, U64};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    #[default]
    Idle,
    /// Scanning history up to the head seen at the first cycle.
    CatchingUp,
    /// Only new blocks are scanned.
    SteadyState,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollCursor {
    pub last_processed: Option<U64>,
    pub phase: PollPhase,
}

impl PollCursor {
    /// Blocks to scan when the head is at `head`, or `None` when caught up.
    pub fn next_window(&self, head: U64) -> Option<BlockRange> {
        match self.last_processed {
            None => BlockRange::new(U64::zero(), head).ok(),
            Some(last) if last < head => BlockRange::new(last + U64::one(), head).ok(),
            Some(_) => None,
        }
    }
}

/// Field-level equality constraints on an event's return values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPredicate {
    fields: BTreeMap<String, Token>,
}

impl FieldPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: Token) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn matches(&self, return_values: &BTreeMap<String, Token>) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| return_values.get(field) == Some(expected))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub role: ContractRole,
    pub event: String,
    pub predicate: FieldPredicate,
}

impl EventFilter {
    pub fn new(role: ContractRole, event: impl Into<String>) -> Self {
        Self {
            role,
            event: event.into(),
            predicate: FieldPredicate::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: Token) -> Self {
        self.predicate = self.predicate.with(field, value);
        self
    }

    /// Token transfers sent by `account`.
    pub fn transfers_from(account: Address) -> Self {
        Self::new(ContractRole::Token, "Transfer").with_field("from", Token::Address(account))
    }

    /// Token transfers received by `account`.
    pub fn transfers_to(account: Address) -> Self {
        Self::new(ContractRole::Token, "Transfer").with_field("to", Token::Address(account))
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        event.event == self.event && self.predicate.matches(&event.return_values)
    }
}

/// One delivery: matching events of a window, or the error that interrupted it.
#[derive(Debug, Clone)]
pub struct PollBatch {
    pub range: Option<BlockRange>,
    pub events: Vec<LedgerEvent>,
    pub error: Option<WalletError>,
}

impl PollBatch {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Single filtered query over an explicit range.
pub async fn fetch_events(
    client: &dyn LedgerClient,
    binding: &ContractBinding,
    filter: &EventFilter,
    range: BlockRange,
) -> WalletResult<Vec<LedgerEvent>> {
    let logs = client
        .logs(binding.address(), range)
        .await
        .map_err(|e| {
            WalletError::PollFetchError(format!(
                "{} logs for {} in {}: {}",
                binding.role(),
                filter.event,
                range,
                e
            ))
        })?;

    Ok(logs
        .iter()
        .filter_map(|log| binding.decode_log(log))
        .filter(|event| filter.matches(event))
        .collect())
}

pub struct EventPoller {
    client: Arc<dyn LedgerClient>,
    binding: ContractBinding,
    filter: EventFilter,
    cursor: Arc<Mutex<PollCursor>>,
    interval: Duration,
}

impl EventPoller {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        contracts: &ContractRegistry,
        filter: EventFilter,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            binding: contracts.binding(filter.role).clone(),
            filter,
            cursor: Arc::new(Mutex::new(PollCursor::default())),
            interval,
        }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn cursor(&self) -> PollCursor {
        *self.cursor.lock()
    }

    /// Run one cycle. Returns a batch only when something must be delivered.
    pub async fn poll_once(&self) -> Option<PollBatch> {
        {
            let mut cursor = self.cursor.lock();
            if cursor.phase == PollPhase::Idle {
                cursor.phase = PollPhase::CatchingUp;
            }
        }

        let head = match self.client.block_number().await {
            Ok(head) => head,
            Err(e) => {
                let error = WalletError::PollFetchError(format!("chain head: {}", e));
                log::warn!("{} poll skipped: {}", self.filter.event, error);
                return Some(PollBatch {
                    range: None,
                    events: Vec::new(),
                    error: Some(error),
                });
            }
        };

        let range = self.cursor.lock().next_window(head)?;

        match fetch_events(self.client.as_ref(), &self.binding, &self.filter, range).await {
            Ok(events) => {
                {
                    let mut cursor = self.cursor.lock();
                    cursor.last_processed = Some(head);
                    cursor.phase = PollPhase::SteadyState;
                }
                if events.is_empty() {
                    return None;
                }
                log::debug!("{} {} events in {}", events.len(), self.filter.event, range);
                Some(PollBatch {
                    range: Some(range),
                    events,
                    error: None,
                })
            }
            Err(error) => {
                log::warn!("{}; retrying next cycle", error);
                Some(PollBatch {
                    range: Some(range),
                    events: Vec::new(),
                    error: Some(error),
                })
            }
        }
    }

    /// Run cycles on a background task until the subscription is cancelled
    /// or dropped.
    pub fn spawn(self, capacity: usize) -> Subscription {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let cursor = Arc::clone(&self.cursor);
        cursor.lock().phase = PollPhase::CatchingUp;

        let handle = tokio::spawn(async move {
            log::debug!(
                "Polling {} {} every {:?}",
                self.filter.role,
                self.filter.event,
                self.interval
            );
            loop {
                let outcome = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    outcome = self.poll_once() => outcome,
                };

                if let Some(batch) = outcome {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        sent = sender.send(batch) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            self.cursor.lock().phase = PollPhase::Stopped;
            log::debug!("Stopped polling {} {}", self.filter.role, self.filter.event);
        });

        Subscription {
            receiver,
            shutdown,
            handle: Some(handle),
            cursor,
        }
    }
}

/// Consumer side of a running poller. Dropping it stops the poller.
pub struct Subscription {
    receiver: mpsc::Receiver<PollBatch>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    cursor: Arc<Mutex<PollCursor>>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<PollBatch> {
        self.receiver.recv().await
    }

    pub fn cursor(&self) -> PollCursor {
        *self.cursor.lock()
    }

    pub fn phase(&self) -> PollPhase {
        self.cursor.lock().phase
    }

    /// Signal the poller without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the poller and wait until its task has exited.
    pub async fn cancel(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("Poller task ended abnormally: {}", e);
            }
        }
    }
}

impl Stream for Subscription {
    type Item = PollBatch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
