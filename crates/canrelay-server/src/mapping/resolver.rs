use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use canrelay_core::protocol::{ChannelPair, Mapping};

/// Two-layer channel label resolver.
///
/// - static layer: read once at startup, never mutated
/// - learned layer: replaced wholesale by each `mapping` envelope
///
/// Readers clone the current learned `Arc` and resolve against that snapshot,
/// so a concurrent replacement is never observed half-written.
#[derive(Debug, Default)]
pub struct MappingResolver {
    static_labels: BTreeMap<u32, String>,
    learned: RwLock<Arc<Mapping>>,
    generation: AtomicU64,
}

impl MappingResolver {
    pub fn new(static_labels: BTreeMap<u32, String>) -> Self {
        Self {
            static_labels,
            learned: RwLock::new(Arc::new(Mapping::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the learned layer. Last write wins.
    pub fn replace_learned(&self, mapping: Mapping) {
        let next = Arc::new(mapping);
        {
            let mut guard = self.learned.write().unwrap_or_else(PoisonError::into_inner);
            *guard = next;
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Current learned layer.
    pub fn learned(&self) -> Arc<Mapping> {
        Arc::clone(&self.learned.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Whether any `mapping` envelope has been applied since startup.
    pub fn has_learned(&self) -> bool {
        self.generation() > 0
    }

    /// Number of learned-layer replacements so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn static_labels(&self) -> &BTreeMap<u32, String> {
        &self.static_labels
    }

    /// Learned label, then static label, then `id_<n>`.
    pub fn label(&self, channel: u32) -> String {
        let learned = self.learned();
        Self::lookup(&learned, &self.static_labels, channel)
            .map(str::to_owned)
            .unwrap_or_else(|| fallback_label(channel))
    }

    /// Learned numeric (physical) id, or the channel id itself.
    pub fn display_id(&self, channel: u32) -> u32 {
        self.learned()
            .channel_to_numeric_id
            .get(&channel)
            .copied()
            .unwrap_or(channel)
    }

    /// Response channel the producer paired with `send`, if it said so.
    pub fn paired_recv(&self, send: u32) -> Option<u32> {
        self.learned().can_id_map.get(&send).copied()
    }

    /// Label for a request/response pair: the response side when known,
    /// else the request side, else the generated response-side label.
    pub fn pair_label(&self, pair: ChannelPair) -> String {
        let learned = self.learned();
        Self::lookup(&learned, &self.static_labels, pair.recv)
            .or_else(|| Self::lookup(&learned, &self.static_labels, pair.send))
            .map(str::to_owned)
            .unwrap_or_else(|| fallback_label(pair.recv))
    }

    /// Merged view: static labels overlaid by learned labels, learned ids
    /// and pairings.
    pub fn effective(&self) -> Mapping {
        let learned = self.learned();
        let mut channel_to_label = self.static_labels.clone();
        channel_to_label.extend(
            learned
                .channel_to_label
                .iter()
                .map(|(k, v)| (*k, v.clone())),
        );
        Mapping {
            channel_to_numeric_id: learned.channel_to_numeric_id.clone(),
            channel_to_label,
            can_id_map: learned.can_id_map.clone(),
        }
    }

    fn lookup<'a>(
        learned: &'a Mapping,
        static_labels: &'a BTreeMap<u32, String>,
        channel: u32,
    ) -> Option<&'a str> {
        learned
            .channel_to_label
            .get(&channel)
            .or_else(|| static_labels.get(&channel))
            .map(String::as_str)
    }
}

/// Deterministic label for a channel nobody named.
pub fn fallback_label(channel: u32) -> String {
    format!("id_{channel}")
}
