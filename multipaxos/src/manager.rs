//! Multi-group front end: instance table, shared seams, and the send loop.
//!
//! One `PaxosManager` per member process. It owns the table of
//! [`PaxosInstance`]s keyed by group name, the shared [`PaxosLogger`],
//! [`Replicable`] application, and [`FailureDetector`], and the
//! [`Messenger`] that carries packets to other members. Incoming packets
//! enter through [`handle_incoming`](PaxosManager::handle_incoming); client
//! commands through [`propose`](PaxosManager::propose).
//!
//! Self-addressed packets never touch the messenger: the manager loops them
//! back through a local queue, so on a single-member group an entire commit
//! (propose, accept, vote, decide, execute) completes inside one
//! `handle_incoming` call.
//!
//! Lock order is instance table, then the individual instance, then one of
//! logger, application, or failure detector. Handlers receive the shared
//! seams as mutexes inside [`Env`] and lock each one only around the call
//! that needs it, so a slow group (say, one whose application is retrying
//! an execute) never holds a process-wide lock while other groups make
//! progress.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::app::Replicable;
use crate::config::PaxosConfig;
use crate::failure::FailureDetector;
use crate::instance::{lock_or_recover, Env, HotRestoreInfo, PaxosInstance};
use crate::messages::{CheckpointPacket, MessagingTask, PacketBody, PaxosPacket};
use crate::storage::PaxosLogger;
use crate::transport::Messenger;
use crate::types::{NodeId, PaxosError, Request};

/// The per-member engine front end.
pub struct PaxosManager<M: Messenger> {
    me: NodeId,
    config: PaxosConfig,
    instances: Mutex<HashMap<String, Arc<Mutex<PaxosInstance>>>>,
    logger: Mutex<Box<dyn PaxosLogger + Send>>,
    app: Mutex<Box<dyn Replicable + Send>>,
    failure_detector: Mutex<Box<dyn FailureDetector + Send>>,
    messenger: M,
}

impl<M: Messenger> PaxosManager<M> {
    /// Create a manager for member `me`.
    pub fn new(
        me: NodeId,
        config: PaxosConfig,
        logger: Box<dyn PaxosLogger + Send>,
        app: Box<dyn Replicable + Send>,
        failure_detector: Box<dyn FailureDetector + Send>,
        messenger: M,
    ) -> Self {
        Self {
            me,
            config,
            instances: Mutex::new(HashMap::new()),
            logger: Mutex::new(logger),
            app: Mutex::new(app),
            failure_detector: Mutex::new(failure_detector),
            messenger,
        }
    }

    /// This member's id.
    pub fn me(&self) -> NodeId {
        self.me
    }

    fn env(&self) -> Env<'_> {
        Env {
            logger: &self.logger,
            app: &self.app,
            failure_detector: &self.failure_detector,
            config: &self.config,
        }
    }

    /// Create an instance for `group`, recovering from the local log when
    /// one exists. Returns false if the group already has an instance.
    pub fn create_paxos_instance(
        &self,
        group: &str,
        version: i32,
        members: Vec<NodeId>,
        initial_state: Option<&str>,
    ) -> Result<bool, PaxosError> {
        if lock_or_recover(&self.instances).contains_key(group) {
            return Ok(false);
        }

        let env = self.env();
        let mut instance =
            PaxosInstance::new(group, version, members, self.me, initial_state, &env)?;

        // Replay the recovery log; replayed packets produce no traffic.
        let logged = lock_or_recover(&self.logger).get_logged_packets(group)?;
        let replayed = logged.len();
        for mut packet in logged {
            packet.recovery = true;
            instance.handle_paxos_message(&packet, &env);
        }
        instance.finish_recovery();
        if replayed > 0 {
            info!(group, replayed, "recovered instance from log");
        }

        let mut instances = lock_or_recover(&self.instances);
        if instances.contains_key(group) {
            return Ok(false);
        }
        info!(group, version, me = %self.me, "instance created");
        instances.insert(group.to_string(), Arc::new(Mutex::new(instance)));
        Ok(true)
    }

    /// Handle a packet from the transport (or a local client path), sending
    /// whatever outbound work it generates. Self-addressed packets are
    /// looped back locally until the queue drains.
    pub fn handle_incoming(&self, packet: PaxosPacket) {
        let mut queue = VecDeque::new();
        queue.push_back(packet);
        while let Some(packet) = queue.pop_front() {
            for task in self.dispatch(&packet) {
                self.perform(task, &mut queue);
            }
        }
    }

    /// Submit a client command to a group. Returns the request id; the
    /// command is durable once a majority accepts it, which on multi-member
    /// groups happens after this call returns.
    pub fn propose(&self, group: &str, value: impl Into<String>) -> Result<u64, PaxosError> {
        self.submit(group, value.into(), false)
    }

    /// Submit the epoch-final stop command. After it executes, the instance
    /// terminates and only its archived final checkpoint remains.
    pub fn propose_stop(&self, group: &str, value: impl Into<String>) -> Result<u64, PaxosError> {
        self.submit(group, value.into(), true)
    }

    /// Whether an instance exists for `group`.
    pub fn is_active(&self, group: &str) -> bool {
        lock_or_recover(&self.instances).contains_key(group)
    }

    /// The archived final application state of a finished epoch, if the
    /// epoch-final stop has executed here.
    pub fn get_final_state(
        &self,
        group: &str,
        version: i32,
    ) -> Result<Option<String>, PaxosError> {
        Ok(lock_or_recover(&self.logger)
            .get_epoch_final_checkpoint(group, version)?
            .map(|cp| cp.state))
    }

    /// Pause a long-idle, caught-up instance: persist its scalars and drop
    /// it from the table. Returns false when the instance is busy or not
    /// idle long enough.
    pub fn pause(&self, group: &str) -> Result<bool, PaxosError> {
        let mut instances = lock_or_recover(&self.instances);
        let Some(instance) = instances.get(group).cloned() else {
            return Err(PaxosError::NoSuchInstance {
                group: group.to_string(),
            });
        };
        let guard = lock_or_recover(&instance);
        if !guard.is_long_idle(self.config.deactivation_period) {
            return Ok(false);
        }
        let Some(info) = guard.pause_snapshot() else {
            return Ok(false);
        };
        lock_or_recover(&self.logger).pause(group, serde_json::to_string(&info)?)?;
        drop(guard);
        instances.remove(group);
        info!(group, "instance paused");
        Ok(true)
    }

    /// Resurrect a paused instance from its stored scalars. Returns false
    /// when the group is already live or has no pause record.
    pub fn unpause(
        &self,
        group: &str,
        version: i32,
        members: Vec<NodeId>,
    ) -> Result<bool, PaxosError> {
        let mut instances = lock_or_recover(&self.instances);
        if instances.contains_key(group) {
            return Ok(false);
        }
        let Some(blob) = lock_or_recover(&self.logger).unpause(group)? else {
            return Ok(false);
        };
        let info: HotRestoreInfo = serde_json::from_str(&blob)?;
        let instance = PaxosInstance::hot_restore(group, version, members, self.me, info);
        instances.insert(group.to_string(), Arc::new(Mutex::new(instance)));
        info!(group, "instance unpaused");
        Ok(true)
    }

    fn submit(&self, group: &str, value: String, stop: bool) -> Result<u64, PaxosError> {
        let version = {
            let instances = lock_or_recover(&self.instances);
            let Some(instance) = instances.get(group).cloned() else {
                return Err(PaxosError::NoSuchInstance {
                    group: group.to_string(),
                });
            };
            let guard = lock_or_recover(&instance);
            if guard.is_stopped() {
                return Err(PaxosError::InstanceStopped {
                    group: group.to_string(),
                });
            }
            guard.version()
        };

        let id = rand::thread_rng().gen();
        let request = if stop {
            Request::stop(id, value, self.me)
        } else {
            Request::new(id, value, self.me)
        };
        self.handle_incoming(PaxosPacket::new(group, version, PacketBody::Request(request)));
        Ok(id)
    }

    fn dispatch(&self, packet: &PaxosPacket) -> Vec<MessagingTask> {
        let instance = lock_or_recover(&self.instances).get(&packet.group).cloned();
        let Some(instance) = instance else {
            return self.answer_for_stopped_group(packet);
        };

        let env = self.env();
        let (tasks, stopped) = {
            let mut guard = lock_or_recover(&instance);
            let tasks = guard.handle_paxos_message(packet, &env);
            (tasks, guard.is_stopped())
        };

        if stopped {
            info!(group = %packet.group, "removing stopped instance");
            lock_or_recover(&self.instances).remove(&packet.group);
            // Drops the group's log; the archived epoch-final checkpoint
            // survives.
            if let Err(err) = lock_or_recover(&self.logger).remove(&packet.group) {
                warn!(group = %packet.group, error = %err, "failed to clear stopped group's log");
            }
        }
        tasks
    }

    /// Serve a packet addressed to a group with no live instance. A sync
    /// request for a finished epoch is answered from the archived epoch-final
    /// checkpoint, so a straggler that missed the stop decision still learns
    /// the epoch ended. Everything else is dropped.
    fn answer_for_stopped_group(&self, packet: &PaxosPacket) -> Vec<MessagingTask> {
        let PacketBody::SyncDecisions(sync) = &packet.body else {
            debug!(group = %packet.group, kind = packet.kind(), "no instance for packet");
            return Vec::new();
        };
        if sync.requester == self.me {
            return Vec::new();
        }
        let archived = match lock_or_recover(&self.logger)
            .get_epoch_final_checkpoint(&packet.group, packet.version)
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(group = %packet.group, "sync request for unknown group");
                return Vec::new();
            }
            Err(err) => {
                warn!(group = %packet.group, error = %err, "epoch-final checkpoint lookup failed");
                return Vec::new();
            }
        };
        info!(
            group = %packet.group,
            requester = %sync.requester,
            slot = %archived.slot,
            "serving epoch-final checkpoint to straggler"
        );
        vec![MessagingTask::unicast(
            sync.requester,
            PaxosPacket::new(
                packet.group.clone(),
                packet.version,
                PacketBody::Checkpoint(CheckpointPacket {
                    ballot: archived.ballot,
                    slot: archived.slot,
                    members: archived.members,
                    state: archived.state,
                    epoch_final: true,
                }),
            ),
        )]
    }

    fn perform(&self, task: MessagingTask, loopback: &mut VecDeque<PaxosPacket>) {
        for recipient in &task.recipients {
            if *recipient == self.me {
                loopback.push_back(task.packet.clone());
            } else if let Err(err) = self.messenger.send(*recipient, &task.packet) {
                // Loss is tolerated; retransmission and sync repair it.
                warn!(
                    group = %task.packet.group,
                    to = %recipient,
                    kind = task.packet.kind(),
                    error = %err,
                    "send failed"
                );
            }
        }
    }
}
