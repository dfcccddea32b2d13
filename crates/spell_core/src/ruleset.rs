//! Pluggable attack/allegiance policy.

use crate::components::Realm;
use crate::living::Living;
use crate::messages::{ChatCategory, MessageSink};

/// Decides who may attack whom and who counts as an ally.
///
/// Called synchronously during target validation and selection. When
/// `quiet` is false a rejecting ruleset explains itself to `attacker`.
pub trait Ruleset {
    /// Whether `attacker` may harm `defender`.
    fn is_allowed_to_attack(&self, attacker: &Living, defender: &Living, quiet: bool, sink: &mut dyn MessageSink) -> bool;

    /// Whether `a` and `b` are allies.
    fn is_same_realm(&self, a: &Living, b: &Living, quiet: bool, sink: &mut dyn MessageSink) -> bool;
}

/// Realm-versus-realm rules.
///
/// Livings of different realms fight; livings of the same player realm
/// never do. Unaligned creatures may fight each other. Pets carry their
/// owner's realm so they follow the same rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealmRuleset;

impl Ruleset for RealmRuleset {
    fn is_allowed_to_attack(&self, attacker: &Living, defender: &Living, quiet: bool, sink: &mut dyn MessageSink) -> bool {
        if attacker.id == defender.id || attacker.owner() == Some(defender.id) {
            return false;
        }
        if !attacker.alive || !defender.alive || !defender.active {
            return false;
        }
        if attacker.peaceful || defender.peaceful {
            return false;
        }
        if attacker.realm == defender.realm && attacker.realm != Realm::None {
            if !quiet {
                sink.notify_caster(attacker.id, "You can't attack a member of your realm!", ChatCategory::System);
            }
            return false;
        }
        true
    }

    fn is_same_realm(&self, a: &Living, b: &Living, quiet: bool, sink: &mut dyn MessageSink) -> bool {
        if a.realm == b.realm {
            return true;
        }
        if !quiet {
            sink.notify_caster(a.id, &format!("{} is not a member of your realm!", b.name), ChatCategory::System);
        }
        false
    }
}
