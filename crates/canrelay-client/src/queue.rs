//! Outbound queues.
//!
//! Three lanes, drained in priority order on every write:
//! 1. the retained mapping, when a (re)send is pending
//! 2. the control FIFO (`event` and `ping`), bounded, oldest dropped on overflow
//! 3. the metrics slot, latest wins, only filled while connected
//!
//! Order is preserved within each lane, not across lanes.

use std::collections::VecDeque;

use canrelay_core::protocol::{Envelope, Message};

/// One envelope taken from the outbox, tagged with its lane so a failed
/// write can be handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Mapping(Envelope),
    Control(Envelope),
    Metrics(Envelope),
}

impl Outgoing {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Outgoing::Mapping(env) | Outgoing::Control(env) | Outgoing::Metrics(env) => env,
        }
    }
}

#[derive(Debug)]
pub struct Outbox {
    connected: bool,
    mapping: Option<Envelope>,
    mapping_pending: bool,
    control: VecDeque<Envelope>,
    control_capacity: usize,
    metrics: Option<Envelope>,
    dropped_events: u64,
    dropped_metrics: u64,
}

impl Outbox {
    /// `control_capacity` is clamped to at least one slot.
    pub fn new(control_capacity: usize) -> Self {
        let control_capacity = control_capacity.max(1);
        Self {
            connected: false,
            mapping: None,
            mapping_pending: false,
            control: VecDeque::with_capacity(control_capacity),
            control_capacity,
            metrics: None,
            dropped_events: 0,
            dropped_metrics: 0,
        }
    }

    /// Route one envelope to its lane.
    pub fn push(&mut self, env: Envelope) {
        match env.message {
            Message::Metrics(_) => {
                if !self.connected {
                    self.dropped_metrics += 1;
                    return;
                }
                if self.metrics.replace(env).is_some() {
                    self.dropped_metrics += 1;
                }
            }
            Message::Mapping(_) => {
                self.mapping = Some(env);
                self.mapping_pending = true;
            }
            Message::Event(_) | Message::Ping | Message::Unknown { .. } => self.push_control(env),
        }
    }

    fn push_control(&mut self, env: Envelope) {
        if self.control.len() >= self.control_capacity {
            self.control.pop_front();
            self.dropped_events += 1;
        }
        self.control.push_back(env);
    }

    /// Next envelope to write, by lane priority.
    pub fn next(&mut self) -> Option<Outgoing> {
        if self.mapping_pending {
            self.mapping_pending = false;
            if let Some(env) = &self.mapping {
                return Some(Outgoing::Mapping(env.clone()));
            }
        }
        if let Some(env) = self.control.pop_front() {
            return Some(Outgoing::Control(env));
        }
        self.metrics.take().map(Outgoing::Metrics)
    }

    /// Hand back an envelope whose write failed.
    ///
    /// Control envelopes go back to the front of their lane; a metrics sample
    /// is dropped since the connection is gone anyway.
    pub fn requeue(&mut self, item: Outgoing) {
        match item {
            Outgoing::Mapping(_) => self.mapping_pending = self.mapping.is_some(),
            Outgoing::Control(env) => {
                if self.control.len() >= self.control_capacity {
                    // The front is older than anything behind it; keep it and
                    // drop the newest instead.
                    self.control.pop_back();
                    self.dropped_events += 1;
                }
                self.control.push_front(env);
            }
            Outgoing::Metrics(_) => self.dropped_metrics += 1,
        }
    }

    /// A new connection is up: accept metrics, re-send the retained mapping.
    pub fn on_connected(&mut self) {
        self.connected = true;
        self.mapping_pending = self.mapping.is_some();
    }

    /// The connection is gone: stop accepting metrics and drop the slot.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        if self.metrics.take().is_some() {
            self.dropped_metrics += 1;
        }
    }

    /// Queue the retained mapping for another send (server asked for it).
    /// Returns false when nothing is retained.
    pub fn resend_mapping(&mut self) -> bool {
        self.mapping_pending = self.mapping.is_some();
        self.mapping_pending
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn retained_mapping(&self) -> Option<&Envelope> {
        self.mapping.as_ref()
    }

    pub fn pending_control(&self) -> usize {
        self.control.len()
    }

    pub fn has_pending(&self) -> bool {
        (self.mapping_pending && self.mapping.is_some())
            || !self.control.is_empty()
            || self.metrics.is_some()
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    pub fn dropped_metrics(&self) -> u64 {
        self.dropped_metrics
    }
}
