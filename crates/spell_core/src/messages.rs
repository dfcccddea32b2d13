//! Chat and animation output.
//!
//! The engine reports what happened through a [`MessageSink`]. Sinks are
//! fire-and-forget: they return nothing and the engine never waits on them.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::components::{EntityId, SpellId};
use crate::math::Vec2Fixed;

/// Chat channel a message is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatCategory {
    /// General spell feedback and validation failures.
    Spell,
    /// A spell was resisted.
    SpellResisted,
    /// An effect ended.
    SpellExpires,
    /// Pulsing spell feedback.
    SpellPulse,
    /// Interrupts and system notices.
    System,
    /// Damage or healing dealt by the recipient.
    YouHit,
    /// Damage or healing received by the recipient.
    YouWereHit,
}

/// Abstract animation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnimationKind {
    /// Casting began.
    CastStart {
        /// Spell being cast.
        spell: SpellId,
        /// Cast time after modifiers.
        cast_time_ms: u32,
    },
    /// A cast was interrupted.
    CastInterrupted,
    /// A spell landed (or failed to) on a target.
    Effect {
        /// Spell applied.
        spell: SpellId,
    },
    /// A spell anchored at a point.
    GroundEffect {
        /// Spell applied.
        spell: SpellId,
        /// Anchor point.
        point: Vec2Fixed,
    },
}

/// Receiver of chat lines and animations.
pub trait MessageSink {
    /// Send a line to one living.
    fn notify_caster(&mut self, recipient: EntityId, message: &str, category: ChatCategory);

    /// Broadcast a line to everyone near `origin` except `exclude`.
    fn notify_area(&mut self, origin: EntityId, message: &str, category: ChatCategory, exclude: &[EntityId]);

    /// Play an animation on `target`.
    fn play_effect_animation(&mut self, target: EntityId, kind: AnimationKind, success: bool);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn notify_caster(&mut self, _recipient: EntityId, _message: &str, _category: ChatCategory) {}

    fn notify_area(&mut self, _origin: EntityId, _message: &str, _category: ChatCategory, _exclude: &[EntityId]) {}

    fn play_effect_animation(&mut self, _target: EntityId, _kind: AnimationKind, _success: bool) {}
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkEvent {
    /// [`MessageSink::notify_caster`].
    Message {
        /// Recipient.
        recipient: EntityId,
        /// Text.
        text: String,
        /// Channel.
        category: ChatCategory,
    },
    /// [`MessageSink::notify_area`].
    Area {
        /// Origin living.
        origin: EntityId,
        /// Text.
        text: String,
        /// Channel.
        category: ChatCategory,
        /// Livings that did not receive it.
        exclude: Vec<EntityId>,
    },
    /// [`MessageSink::play_effect_animation`].
    Animation {
        /// Target living.
        target: EntityId,
        /// Animation.
        kind: AnimationKind,
        /// Success flag.
        success: bool,
    },
}

/// Sink that records every call.
///
/// Clones share one log, so a caller can hand a clone to a zone and keep
/// another to inspect what was sent.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of every recorded call.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Lines sent directly to `recipient`, oldest first.
    #[must_use]
    pub fn messages_to(&self, recipient: EntityId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Message { recipient: r, text, .. } if r == recipient => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Whether `recipient` received exactly `text`.
    #[must_use]
    pub fn received(&self, recipient: EntityId, text: &str) -> bool {
        self.messages_to(recipient).iter().any(|m| m == text)
    }

    /// Lines broadcast around livings.
    #[must_use]
    pub fn area_messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Area { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Animations played on `target`.
    #[must_use]
    pub fn animations_on(&self, target: EntityId) -> Vec<(AnimationKind, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Animation { target: t, kind, success } if t == target => Some((kind, success)),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl MessageSink for RecordingSink {
    fn notify_caster(&mut self, recipient: EntityId, message: &str, category: ChatCategory) {
        self.push(SinkEvent::Message {
            recipient,
            text: message.to_string(),
            category,
        });
    }

    fn notify_area(&mut self, origin: EntityId, message: &str, category: ChatCategory, exclude: &[EntityId]) {
        self.push(SinkEvent::Area {
            origin,
            text: message.to_string(),
            category,
            exclude: exclude.to_vec(),
        });
    }

    fn play_effect_animation(&mut self, target: EntityId, kind: AnimationKind, success: bool) {
        self.push(SinkEvent::Animation { target, kind, success });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_shares_log_between_clones() {
        let log = RecordingSink::new();
        let mut handed_out = log.clone();

        handed_out.notify_caster(7, "You cast a Spark spell!", ChatCategory::Spell);
        handed_out.notify_area(7, "Mage casts a spell!", ChatCategory::Spell, &[7]);
        handed_out.play_effect_animation(9, AnimationKind::Effect { spell: 1 }, true);

        assert_eq!(log.messages_to(7), vec!["You cast a Spark spell!".to_string()]);
        assert!(log.received(7, "You cast a Spark spell!"));
        assert!(log.messages_to(9).is_empty());
        assert_eq!(log.area_messages(), vec!["Mage casts a spell!".to_string()]);
        assert_eq!(log.animations_on(9), vec![(AnimationKind::Effect { spell: 1 }, true)]);

        log.clear();
        assert!(log.events().is_empty());
    }
}
