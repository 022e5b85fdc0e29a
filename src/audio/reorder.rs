use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};
use tracing::debug;

use super::track::Track;

/// Order in which finished syntheses are spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechOrder {
    /// As soon as each synthesis completes
    Completion,
    /// In the order the chat messages arrived
    Message,
}

impl FromStr for SpeechOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completion" => Ok(Self::Completion),
            "message" => Ok(Self::Message),
            other => anyhow::bail!("Orden de lectura desconocido: {}", other),
        }
    }
}

/// Per-session sequence numbers plus a reorder buffer.
///
/// Every ticket handed out by [`Sequencer::reserve`] must come back through
/// [`Sequencer::complete`], with `None` when the clip produced nothing, or
/// later tickets stay held forever in [`SpeechOrder::Message`] mode.
#[derive(Debug)]
pub struct Sequencer {
    order: SpeechOrder,
    next_ticket: u64,
    next_release: u64,
    held: BTreeMap<u64, Option<Track>>,
}

impl Sequencer {
    pub fn new(order: SpeechOrder) -> Self {
        Self {
            order,
            next_ticket: 0,
            next_release: 0,
            held: BTreeMap::new(),
        }
    }

    pub fn order(&self) -> SpeechOrder {
        self.order
    }

    pub fn reserve(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Records a completion and returns the tracks now ready to enqueue, in order.
    pub fn complete(&mut self, ticket: u64, track: Option<Track>) -> Vec<Track> {
        if self.order == SpeechOrder::Completion || ticket < self.next_release {
            return track.into_iter().collect();
        }

        self.held.insert(ticket, track);

        let mut ready = Vec::new();
        while let Some(slot) = self.held.remove(&self.next_release) {
            self.next_release += 1;
            ready.extend(slot);
        }

        if !self.held.is_empty() {
            debug!(
                "⏳ {} clips esperando al mensaje #{}",
                self.held.len(),
                self.next_release
            );
        }
        ready
    }

    /// Completions waiting for an earlier ticket
    pub fn held(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::{test_support::track_with_frames, TrackId};
    use pretty_assertions::assert_eq;

    fn ids(tracks: &[Track]) -> Vec<TrackId> {
        tracks.iter().map(Track::id).collect()
    }

    #[test]
    fn test_completion_order_passes_through() {
        let mut seq = Sequencer::new(SpeechOrder::Completion);
        let first = seq.reserve();
        let second = seq.reserve();

        let b = track_with_frames("b", 1);
        let b_id = b.id();
        assert_eq!(ids(&seq.complete(second, Some(b))), vec![b_id]);
        assert!(seq.complete(first, None).is_empty());
        assert_eq!(seq.held(), 0);
    }

    #[test]
    fn test_message_order_holds_early_completions() {
        let mut seq = Sequencer::new(SpeechOrder::Message);
        let t0 = seq.reserve();
        let t1 = seq.reserve();
        let t2 = seq.reserve();

        let c = track_with_frames("c", 1);
        let b = track_with_frames("b", 1);
        let a = track_with_frames("a", 1);
        let expected = vec![a.id(), b.id(), c.id()];

        assert!(seq.complete(t2, Some(c)).is_empty());
        assert!(seq.complete(t1, Some(b)).is_empty());
        assert_eq!(seq.held(), 2);

        assert_eq!(ids(&seq.complete(t0, Some(a))), expected);
        assert_eq!(seq.held(), 0);
    }

    #[test]
    fn test_failed_slot_does_not_stall_later_messages() {
        let mut seq = Sequencer::new(SpeechOrder::Message);
        let t0 = seq.reserve();
        let t1 = seq.reserve();

        let b = track_with_frames("b", 1);
        let b_id = b.id();
        assert!(seq.complete(t1, Some(b)).is_empty());
        assert_eq!(ids(&seq.complete(t0, None)), vec![b_id]);
    }

    #[test]
    fn test_speech_order_parsing() {
        assert_eq!("Message".parse::<SpeechOrder>().unwrap(), SpeechOrder::Message);
        assert_eq!("completion".parse::<SpeechOrder>().unwrap(), SpeechOrder::Completion);
        assert!("random".parse::<SpeechOrder>().is_err());
    }
}
