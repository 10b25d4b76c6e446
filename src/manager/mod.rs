//! The per-node shard manager.
//!
//! Hosts many shards over a pool of worker threads, routes inbound
//! envelopes to the right worker by the target uuid, and reconciles with
//! the coordinator: a periodic cron sends a heartbeat carrying the locally
//! initialized shards and pending split suggestions, and applies whatever
//! the response tells it to initialize or split. Heartbeats are pollable
//! futures checked on the next tick; the loop never blocks on the network.

pub mod transport;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{Config, ManagerConfig};
use crate::coordinator::messages::{
    HeartbeatRequest, Message, ShardId, SplitRequest, SuggestedSplitInfo,
};
use crate::error::{Result, ShardError};
use crate::hlc::HlcClock;
use crate::name_id::NameIdMapper;
use crate::storage::shard::Shard;
use transport::{Address, Envelope, PollResponse, ResponseFuture, Transport};
use worker::{ShardWorker, WorkerEvent, WorkerMessage};

struct WorkerHandle {
    sender: Sender<WorkerMessage>,
    join: Option<JoinHandle<()>>,
}

pub struct ShardManager<T: Transport> {
    address: Address,
    transport: Arc<T>,
    config: ManagerConfig,
    shard_config: Config,
    clock: Arc<HlcClock>,
    name_id: Arc<NameIdMapper>,
    workers: Vec<WorkerHandle>,
    worker_shard_counts: Mutex<Vec<usize>>,
    shard_worker_mapping: DashMap<Uuid, usize>,
    events: Mutex<Receiver<WorkerEvent>>,
    pending_splits: Mutex<std::collections::BTreeSet<SuggestedSplitInfo>>,
    initialized_not_confirmed: Mutex<std::collections::BTreeMap<Uuid, ShardId>>,
    coordinator_leader: Mutex<Address>,
    heartbeat: Mutex<Option<ResponseFuture>>,
    next_reconciliation: Mutex<Instant>,
    highest_seen_map_version: AtomicU64,
}

impl<T: Transport> ShardManager<T> {
    pub fn new(
        address: Address,
        coordinator_leader: Address,
        transport: Arc<T>,
        config: ManagerConfig,
        shard_config: Config,
        clock: Arc<HlcClock>,
        name_id: Arc<NameIdMapper>,
    ) -> Self {
        assert!(config.worker_threads >= 1);
        let (event_sender, event_receiver) = mpsc::channel();
        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let (sender, receiver) = mpsc::channel();
            let worker = ShardWorker::new(
                receiver,
                event_sender.clone(),
                Arc::clone(&clock),
                Arc::clone(&name_id),
            );
            let join = std::thread::Builder::new()
                .name(format!("shard-worker-{index}"))
                .spawn(move || worker.run())
                .expect("worker thread spawn");
            workers.push(WorkerHandle {
                sender,
                join: Some(join),
            });
        }
        ShardManager {
            address,
            transport,
            config,
            shard_config,
            clock,
            name_id,
            worker_shard_counts: Mutex::new(vec![0; workers.len()]),
            workers,
            shard_worker_mapping: DashMap::new(),
            events: Mutex::new(event_receiver),
            pending_splits: Mutex::new(std::collections::BTreeSet::new()),
            initialized_not_confirmed: Mutex::new(std::collections::BTreeMap::new()),
            coordinator_leader: Mutex::new(coordinator_leader),
            heartbeat: Mutex::new(None),
            next_reconciliation: Mutex::new(Instant::now()),
            highest_seen_map_version: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn hosts_shard(&self, uuid: Uuid) -> bool {
        self.shard_worker_mapping.contains_key(&uuid)
    }

    pub fn pending_split_count(&self) -> usize {
        self.pending_splits.lock().len()
    }

    pub fn unconfirmed_shard_count(&self) -> usize {
        self.initialized_not_confirmed.lock().len()
    }

    /// Periodic protocol maintenance. Returns when cron wants to run next.
    pub fn cron(&self) -> Instant {
        trace!(address = %self.address, "shard manager cron");
        self.drain_worker_events();

        let now = Instant::now();
        {
            let mut next = self.next_reconciliation.lock();
            if now >= *next {
                self.reconciliation();
                let min = self.config.cron_interval_min.as_millis() as u64;
                let max = self.config.cron_interval_max.as_millis() as u64;
                let jitter = rand::thread_rng().gen_range(min..=max);
                *next = now + Duration::from_millis(jitter);
            }
        }

        for worker in &self.workers {
            let _ = worker.sender.send(WorkerMessage::Cron);
        }

        let next_worker_cron = now + Duration::from_millis(500);
        next_worker_cron.min(*self.next_reconciliation.lock())
    }

    /// Hands an inbound envelope to the worker owning the target shard.
    /// Envelopes built against an older shard map than already seen are
    /// rejected.
    pub fn route(&self, envelope: Envelope) -> Result<()> {
        let seen = self
            .highest_seen_map_version
            .fetch_max(envelope.shard_map_version, Ordering::AcqRel);
        if envelope.shard_map_version < seen {
            return Err(ShardError::StaleShardMap {
                observed: envelope.shard_map_version,
                current: seen,
            });
        }
        if envelope.to.ip != self.address.ip || envelope.to.port != self.address.port {
            return Err(ShardError::Invalid("envelope addressed to another node"));
        }
        let worker = self.worker_for_uuid(envelope.to.uuid);
        let _ = self.workers[worker].sender.send(WorkerMessage::Route(envelope));
        Ok(())
    }

    /// Places a shard on a worker directly, for bootstrapping a node
    /// without a coordinator round-trip.
    pub fn host_shard(&self, uuid: Uuid, shard: Shard) {
        let shard_id = (shard.primary_label(), shard.low_key().clone());
        self.assign_shard(uuid, Box::new(shard));
        self.initialized_not_confirmed.lock().insert(uuid, shard_id);
    }

    fn assign_shard(&self, uuid: Uuid, shard: Box<Shard>) {
        let worker = self.worker_for_uuid(uuid);
        debug!(%uuid, worker, "assigning shard to worker");
        let _ = self.workers[worker]
            .sender
            .send(WorkerMessage::InitializeShard { uuid, shard });
    }

    /// Maps a uuid to a worker, choosing the least-loaded worker on first
    /// contact.
    fn worker_for_uuid(&self, uuid: Uuid) -> usize {
        if let Some(existing) = self.shard_worker_mapping.get(&uuid) {
            return *existing;
        }
        let mut counts = self.worker_shard_counts.lock();
        let mut min_index = 0;
        let mut min_count = counts[0];
        for (index, &count) in counts.iter().enumerate() {
            if count <= min_count {
                min_count = count;
                min_index = index;
            }
        }
        counts[min_index] += 1;
        self.shard_worker_mapping.insert(uuid, min_index);
        min_index
    }

    fn drain_worker_events(&self) {
        let events = self.events.lock();
        while let Ok(event) = events.try_recv() {
            match event {
                WorkerEvent::SplitSuggested(info) => {
                    debug!(shard = %info.shard_uuid, "queuing suggested split");
                    self.pending_splits.lock().insert(info);
                }
                WorkerEvent::SplitCompleted {
                    source_uuid,
                    new_uuid,
                    shard,
                } => {
                    info!(
                        %source_uuid,
                        %new_uuid,
                        low_key = %shard.low_key(),
                        "initializing split successor"
                    );
                    let shard_id = (shard.primary_label(), shard.low_key().clone());
                    self.assign_shard(new_uuid, shard);
                    self.initialized_not_confirmed
                        .lock()
                        .insert(new_uuid, shard_id);
                }
            }
        }
    }

    /// Drives the heartbeat state machine: polls the in-flight response if
    /// any, applies it, and issues the next request.
    fn reconciliation(&self) {
        let mut slot = self.heartbeat.lock();
        if let Some(future) = slot.as_ref() {
            match future.poll() {
                PollResponse::Pending => return,
                PollResponse::TimedOut => {
                    info!("heartbeat timed out, retrying with current leader guess");
                    *slot = None;
                }
                PollResponse::Ready(Message::HeartbeatResponse(response)) => {
                    *slot = None;
                    if let Some(leader) = response.retry_leader {
                        info!(%leader, "redirected to new coordinator leader");
                        *self.coordinator_leader.lock() = leader;
                    } else if response.success {
                        self.apply_heartbeat_response(response);
                    }
                }
                PollResponse::Ready(other) => {
                    warn!(?other, "unexpected heartbeat reply");
                    *slot = None;
                }
            }
        }

        let request = HeartbeatRequest {
            from: self.address.clone(),
            initialized_rsms: self
                .initialized_not_confirmed
                .lock()
                .iter()
                .map(|(uuid, id)| (*uuid, id.clone()))
                .collect(),
            suggested_splits: {
                let mut pending = self.pending_splits.lock();
                let drained: Vec<_> = pending.iter().cloned().collect();
                pending.clear();
                drained
            },
        };
        let leader = self.coordinator_leader.lock().clone();
        debug!(%leader, shards = request.initialized_rsms.len(), "sending heartbeat");
        *slot = Some(self.transport.request(
            leader,
            self.address.clone(),
            Message::HeartbeatRequest(request),
            self.highest_seen_map_version.load(Ordering::Acquire),
        ));
    }

    fn apply_heartbeat_response(&self, response: crate::coordinator::messages::HeartbeatResponse) {
        {
            let mut unconfirmed = self.initialized_not_confirmed.lock();
            for uuid in &response.acknowledged_initialized_rsms {
                unconfirmed.remove(uuid);
            }
        }
        for to_init in response.shards_to_initialize {
            let shard = Shard::new(
                to_init.label_id,
                to_init.min_key.clone(),
                None,
                to_init.schema,
                to_init.shard_version,
                self.shard_config.clone(),
                Arc::clone(&self.clock),
                Arc::clone(&self.name_id),
            );
            self.initialized_not_confirmed
                .lock()
                .insert(to_init.uuid, (to_init.label_id, to_init.min_key));
            self.assign_shard(to_init.uuid, Box::new(shard));
        }
        for to_split in response.shards_to_split {
            for &(source, _) in &to_split.uuid_mapping {
                if !self.shard_worker_mapping.contains_key(&source) {
                    warn!(%source, "split target not hosted here");
                    continue;
                }
                // Best-effort forward to the local shard; a miss is retried
                // by the coordinator on a later heartbeat.
                let envelope = Envelope {
                    message: Message::SplitRequest(SplitRequest {
                        split_key: to_split.split_key.clone(),
                        old_shard_version: to_split.old_shard_version,
                        new_lhs_shard_version: to_split.new_lhs_shard_version,
                        new_rhs_shard_version: to_split.new_rhs_shard_version,
                        uuid_mapping: to_split.uuid_mapping.clone(),
                    }),
                    request_id: 0,
                    to: self.address.with_uuid(source),
                    from: self.address.clone(),
                    shard_map_version: self.highest_seen_map_version.load(Ordering::Acquire),
                };
                let worker = self.worker_for_uuid(source);
                let _ = self.workers[worker].sender.send(WorkerMessage::Route(envelope));
            }
        }
    }

    /// Stops every worker and waits for their threads.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            let _ = worker.sender.send(WorkerMessage::ShutDown);
        }
        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }
}

impl<T: Transport> Drop for ShardManager<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
