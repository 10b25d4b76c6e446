//! Shard workers.
//!
//! Each worker thread owns the shards mapped to it and drains its queue:
//! routed shard requests, cron ticks (garbage collection and split
//! suggestions) and lifecycle messages. Workers report back to the manager
//! over an event channel drained in the manager's cron.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::coordinator::messages::{Message, SplitRequest, SuggestedSplitInfo};
use crate::hlc::HlcClock;
use crate::manager::transport::Envelope;
use crate::name_id::NameIdMapper;
use crate::storage::shard::Shard;

/// Work items a worker accepts.
pub enum WorkerMessage {
    /// Take ownership of a shard.
    InitializeShard { uuid: Uuid, shard: Box<Shard> },
    /// A routed envelope addressed to one of this worker's shards.
    Route(Envelope),
    Cron,
    ShutDown,
}

/// What a worker reports back to its manager.
pub enum WorkerEvent {
    /// A split finished; the right successor needs a home.
    SplitCompleted {
        source_uuid: Uuid,
        new_uuid: Uuid,
        shard: Box<Shard>,
    },
    /// A shard grew past its threshold and proposes a split.
    SplitSuggested(SuggestedSplitInfo),
}

pub(crate) struct ShardWorker {
    queue: Receiver<WorkerMessage>,
    events: Sender<WorkerEvent>,
    clock: Arc<HlcClock>,
    name_id: Arc<NameIdMapper>,
    shards: HashMap<Uuid, Arc<Shard>>,
    last_gc: HashMap<Uuid, Instant>,
}

impl ShardWorker {
    pub(crate) fn new(
        queue: Receiver<WorkerMessage>,
        events: Sender<WorkerEvent>,
        clock: Arc<HlcClock>,
        name_id: Arc<NameIdMapper>,
    ) -> Self {
        ShardWorker {
            queue,
            events,
            clock,
            name_id,
            shards: HashMap::new(),
            last_gc: HashMap::new(),
        }
    }

    pub(crate) fn run(mut self) {
        while let Ok(message) = self.queue.recv() {
            match message {
                WorkerMessage::InitializeShard { uuid, shard } => {
                    debug!(%uuid, "worker initialized shard");
                    self.shards.insert(uuid, Arc::from(shard));
                }
                WorkerMessage::Route(envelope) => self.handle_route(envelope),
                WorkerMessage::Cron => self.cron(),
                WorkerMessage::ShutDown => break,
            }
        }
    }

    fn handle_route(&mut self, envelope: Envelope) {
        let uuid = envelope.to.uuid;
        match envelope.message {
            Message::SplitRequest(request) => self.handle_split(uuid, request),
            other => trace!(%uuid, ?other, "worker ignoring unhandled message"),
        }
    }

    fn handle_split(&mut self, source_uuid: Uuid, request: SplitRequest) {
        let Some(shard) = self.shards.get(&source_uuid) else {
            warn!(%source_uuid, "split request for unknown shard");
            return;
        };
        let Some(&(_, new_uuid)) = request
            .uuid_mapping
            .iter()
            .find(|(source, _)| *source == source_uuid)
        else {
            warn!(%source_uuid, "split request without a uuid mapping for this shard");
            return;
        };
        match shard.perform_split(
            &request.split_key,
            request.old_shard_version,
            request.new_lhs_shard_version,
            request.new_rhs_shard_version,
        ) {
            Ok(split_data) => {
                let successor = Shard::from_split_data(
                    split_data,
                    Arc::clone(&self.clock),
                    Arc::clone(&self.name_id),
                );
                let _ = self.events.send(WorkerEvent::SplitCompleted {
                    source_uuid,
                    new_uuid,
                    shard: Box::new(successor),
                });
            }
            Err(err) => {
                // Stale or repeated requests are expected; the coordinator
                // re-issues until one lands.
                warn!(%source_uuid, error = %err, "split request not applied");
            }
        }
    }

    fn cron(&mut self) {
        for (uuid, shard) in &self.shards {
            let due = self
                .last_gc
                .get(uuid)
                .map_or(true, |last| last.elapsed() >= shard.config().gc_interval);
            if due {
                shard.collect_garbage();
                self.last_gc.insert(*uuid, Instant::now());
            }
            if let Some(suggestion) = shard.should_split() {
                let _ = self.events.send(WorkerEvent::SplitSuggested(SuggestedSplitInfo {
                    shard_uuid: *uuid,
                    label_id: suggestion.label_id,
                    low_key: suggestion.low_key,
                    split_key: suggestion.split_key,
                    shard_version: suggestion.shard_version,
                }));
            }
        }
    }
}
