//! Outbound connection sets and the growth policy that decides who a unit
//! connects to when a circuit is first grown.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::circuit::TierLayout;
use crate::error::CircuitResult;
use crate::neuron::{Tier, UnitId};
use crate::prng::Prng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Polarity {
    Excitatory,
    Inhibitory,
}

impl Polarity {
    pub fn is_excitatory(self) -> bool {
        matches!(self, Polarity::Excitatory)
    }
}

/// How the polarity of a Hidden -> Output connection is drawn at genesis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PolarityPolicy {
    #[default]
    AlwaysExcitatory,
    /// Biased coin: excitatory with the given probability.
    Biased { excitatory_probability: f64 },
}

impl PolarityPolicy {
    pub fn draw(&self, rng: &mut Prng) -> Polarity {
        match *self {
            PolarityPolicy::AlwaysExcitatory => Polarity::Excitatory,
            PolarityPolicy::Biased {
                excitatory_probability,
            } => {
                if rng.chance(excitatory_probability) {
                    Polarity::Excitatory
                } else {
                    Polarity::Inhibitory
                }
            }
        }
    }
}

/// One outbound connection.
///
/// `slot` is the inbound slot claimed on the target. A terminal grown toward a
/// target with no vacant slot is kept but unbound, and never conducts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxonTerminal {
    pub target: UnitId,
    pub slot: Option<usize>,
    pub polarity: Polarity,
}

impl AxonTerminal {
    pub fn is_bound(&self) -> bool {
        self.slot.is_some()
    }
}

/// The outbound connection set owned by a single unit. Append-only.
#[derive(Debug, Clone, Default)]
pub struct Axon {
    terminals: Vec<AxonTerminal>,
}

impl Axon {
    pub fn terminals(&self) -> &[AxonTerminal] {
        &self.terminals
    }

    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// Terminals that hold an inbound slot and therefore conduct.
    pub fn conducting(&self) -> impl Iterator<Item = &AxonTerminal> + '_ {
        self.terminals.iter().filter(|t| t.is_bound())
    }

    /// First bound terminal toward `target`, if any.
    pub fn terminal_to(&self, target: UnitId) -> Option<&AxonTerminal> {
        self.conducting().find(|t| t.target == target)
    }

    pub(crate) fn push(&mut self, terminal: AxonTerminal) -> usize {
        self.terminals.push(terminal);
        self.terminals.len() - 1
    }
}

/// Targets a unit grows toward at genesis, paired with how to pick polarity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GenesisPlan {
    /// Terminal tier: nothing to grow.
    None,
    /// A single excitatory connection into the Hidden group owning this input.
    Fixed(UnitId),
    /// One connection per target, polarity drawn from the circuit's policy.
    Drawn(core::ops::Range<UnitId>),
}

/// Decide where `unit` connects at genesis.
///
/// Inputs map onto Hidden groups of `ceil(In/H)` consecutive inputs each,
/// Hidden units fan out to every Output unit, Output units grow nothing.
/// Hidden -> Hidden wiring is left to the correction rule.
pub(crate) fn genesis_plan(layout: &TierLayout, unit: UnitId, tier: Tier) -> CircuitResult<GenesisPlan> {
    match tier {
        Tier::Input => Ok(GenesisPlan::Fixed(layout.hidden_for_input(unit)?)),
        Tier::Hidden => Ok(GenesisPlan::Drawn(layout.output_range())),
        Tier::Output | Tier::Undetermined => Ok(GenesisPlan::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(target: UnitId, slot: Option<usize>, polarity: Polarity) -> AxonTerminal {
        AxonTerminal {
            target,
            slot,
            polarity,
        }
    }

    #[test]
    fn terminal_lookup_skips_unbound_terminals() {
        let mut axon = Axon::default();
        axon.push(terminal(5, None, Polarity::Excitatory));
        axon.push(terminal(5, Some(3), Polarity::Inhibitory));

        let t = axon.terminal_to(5).copied();
        assert_eq!(t, Some(terminal(5, Some(3), Polarity::Inhibitory)));
        assert_eq!(axon.conducting().count(), 1);
        assert_eq!(axon.len(), 2);
        assert!(axon.terminal_to(6).is_none());
    }

    #[test]
    fn always_excitatory_policy_never_inhibits() {
        let mut rng = Prng::new(11);
        let policy = PolarityPolicy::AlwaysExcitatory;
        assert!((0..64).all(|_| policy.draw(&mut rng).is_excitatory()));
    }

    #[test]
    fn biased_policy_produces_both_polarities() {
        let mut rng = Prng::new(11);
        let policy = PolarityPolicy::Biased {
            excitatory_probability: 0.5,
        };
        let draws: Vec<Polarity> = (0..256).map(|_| policy.draw(&mut rng)).collect();
        assert!(draws.contains(&Polarity::Excitatory));
        assert!(draws.contains(&Polarity::Inhibitory));
    }

    #[test]
    fn genesis_plan_by_tier() {
        let layout = TierLayout::new(4, 2).unwrap();
        assert_eq!(
            genesis_plan(&layout, 0, Tier::Input).unwrap(),
            GenesisPlan::Fixed(4)
        );
        assert_eq!(
            genesis_plan(&layout, 3, Tier::Input).unwrap(),
            GenesisPlan::Fixed(5)
        );
        assert_eq!(
            genesis_plan(&layout, 4, Tier::Hidden).unwrap(),
            GenesisPlan::Drawn(7..9)
        );
        assert_eq!(
            genesis_plan(&layout, 7, Tier::Output).unwrap(),
            GenesisPlan::None
        );
    }
}
