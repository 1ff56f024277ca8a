//! Single-consumer engine loop.
//!
//! Channel adapters and quiet-period timers only send into one mpsc queue;
//! this loop is the sole consumer. Every mutation of the pending store, the
//! key rotator, and the scheduler handle table happens inside
//! `handle_event`, between awaits, so message arrivals and timer fires for
//! one owner are totally ordered and a fire can never interleave inside a
//! merge. The spawned dispatch tail only talks to the transport.

use crate::commands::{self, Command};
use crate::debounce::DebounceScheduler;
use crate::dispatch::Dispatcher;
use crate::rotator::KeyRotator;
use crate::store::{PendingStore, RequestId};
use anyhow::Result;
use fold_channels::{ChannelAdapter, InboundMessage, OutboundMessage, SenderId};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum EngineEvent {
    Inbound(InboundMessage),
    Fire {
        owner: SenderId,
        request_id: RequestId,
    },
}

pub struct Engine {
    store: PendingStore,
    rotator: KeyRotator,
    scheduler: DebounceScheduler,
    dispatcher: Dispatcher,
    channel: Arc<dyn ChannelAdapter>,
    events_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EngineEvent>>>,
}

impl Engine {
    pub fn new(
        store: PendingStore,
        rotator: KeyRotator,
        scheduler: DebounceScheduler,
        dispatcher: Dispatcher,
        channel: Arc<dyn ChannelAdapter>,
        events_rx: mpsc::Receiver<EngineEvent>,
    ) -> Self {
        Self {
            store,
            rotator,
            scheduler,
            dispatcher,
            channel,
            events_rx: Arc::new(tokio::sync::Mutex::new(events_rx)),
        }
    }

    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            if let Err(e) = self.run_loop().await {
                tracing::error!(%e, "engine loop exited");
            }
        });
    }

    pub async fn run_loop(&self) -> Result<()> {
        loop {
            let event = {
                let mut rx = self.events_rx.lock().await;
                rx.recv().await
            };
            let Some(event) = event else {
                return Ok(());
            };

            if let Err(e) = self.handle_event(event).await {
                tracing::warn!(%e, "handle_event failed");
            }
        }
    }

    async fn handle_event(&self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::Inbound(inbound) => self.handle_inbound(inbound).await,
            EngineEvent::Fire { owner, request_id } => self.handle_fire(owner, request_id),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(sender = %inbound.sender_id))]
    async fn handle_inbound(&self, inbound: InboundMessage) -> Result<()> {
        let text = inbound.content.trim();
        if text.is_empty() {
            self.reply(&inbound, commands::empty_text_notice()).await;
            return Ok(());
        }

        if let Some(command) = commands::parse(text) {
            let reply = self.run_command(command, &inbound.sender_id);
            self.reply(&inbound, reply).await;
            return Ok(());
        }

        let outcome = self
            .store
            .upsert(&inbound.sender_id, text, inbound.received_at);
        // The two-step timer protocol: retire the superseded id's timer, then
        // install one for the new id. No await separates the upsert from the
        // reschedule, so the merge is atomic from every other event's view.
        let reply = match &outcome.replaced {
            Some(old_id) => {
                self.scheduler.cancel(old_id);
                tracing::info!(old_id = %old_id, new_id = %outcome.id, "merged into pending request");
                commands::merged_receipt_text(outcome.id.as_str(), self.scheduler.quiet_period())
            }
            None => {
                tracing::info!(request_id = %outcome.id, "created pending request");
                commands::receipt_text(outcome.id.as_str(), self.scheduler.quiet_period())
            }
        };
        self.scheduler
            .schedule(inbound.sender_id.clone(), outcome.id.clone());

        self.reply(&inbound, reply).await;
        Ok(())
    }

    fn run_command(&self, command: Command, sender: &SenderId) -> String {
        let quiet_period = self.scheduler.quiet_period();
        match command {
            Command::Start => commands::welcome_text(quiet_period),
            Command::Help => commands::help_text(quiet_period),
            Command::Status => commands::format_status(&self.store.peek_all(sender)),
            Command::Cancel => commands::format_cancelled(self.cancel_all(sender)),
            Command::Unknown => commands::unknown_command_text(),
        }
    }

    /// A fire that lost a race with a merge finds the store holding a newer
    /// id (or nothing) and dispatches nothing; that is the success path for
    /// superseded timers, not an error.
    fn handle_fire(&self, owner: SenderId, request_id: RequestId) -> Result<()> {
        let Some(request) = self.store.take(&owner, &request_id) else {
            tracing::debug!(%owner, %request_id, "fire superseded; nothing to dispatch");
            return Ok(());
        };

        // Consume the credential before any suspension so rotation order
        // matches fire order.
        let api_key = self.rotator.next().to_string();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.run(request, api_key).await;
        });
        Ok(())
    }

    /// Cancel the owner's pending request and its timer. Idempotent; returns
    /// the number of requests cancelled.
    fn cancel_all(&self, owner: &SenderId) -> usize {
        match self.store.clear(owner) {
            Some(removed) => {
                self.scheduler.cancel(&removed.id);
                tracing::info!(%owner, request_id = %removed.id, "cancelled pending request");
                1
            }
            None => 0,
        }
    }

    async fn reply(&self, inbound: &InboundMessage, content: String) {
        let message = OutboundMessage {
            content,
            reply_to_message_id: Some(inbound.message_id.clone()),
        };
        if let Err(error) = self.channel.send(inbound.sender_id.as_str(), message).await {
            tracing::warn!(%error, sender = %inbound.sender_id, "reply delivery failed");
        }
    }
}
