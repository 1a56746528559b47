use parking_lot::{Mutex, MutexGuard};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::axon::Axon;

pub type UnitId = usize;

/// Type alias for membrane potentials.
pub type Potential = f64;

/// Partition of the unit collection a neuron belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Tier {
    #[default]
    Undetermined,
    Input,
    Hidden,
    Output,
}

impl Tier {
    /// Output units are terminal: they record a percept instead of propagating.
    pub fn is_terminal(self) -> bool {
        matches!(self, Tier::Output)
    }
}

/// Resting/threshold calibration shared by every unit of a circuit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MembraneConfig {
    pub resting: Potential,
    pub threshold: Potential,
    pub hyperpolarized: Potential,

    // Potential change delivered by one excitatory / inhibitory terminal.
    pub excitatory_step: Potential,
    pub inhibitory_step: Potential,
}

impl Default for MembraneConfig {
    fn default() -> Self {
        Self {
            resting: -0.70,
            threshold: -0.55,
            hyperpolarized: -0.90,
            excitatory_step: 0.075,
            inhibitory_step: 0.075,
        }
    }
}

/// A potential change arriving at a unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Excite(Potential),
    Inhibit(Potential),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Membrane {
    pub potential: Potential,
    pub threshold: Potential,
    pub refractory: bool,
}

impl Membrane {
    pub fn resting(cfg: &MembraneConfig) -> Self {
        Self {
            potential: cfg.resting,
            threshold: cfg.threshold,
            refractory: false,
        }
    }

    /// Apply one potential change. Returns true if the unit fired.
    ///
    /// Refractory units ignore input. A firing unit hyperpolarizes and is back
    /// at rest before the lock guarding it is released.
    pub fn receive(&mut self, signal: Signal, cfg: &MembraneConfig) -> bool {
        if self.refractory {
            return false;
        }
        match signal {
            Signal::Inhibit(amount) => {
                self.potential -= amount;
                false
            }
            Signal::Excite(amount) => {
                self.potential += amount;
                if self.potential >= self.threshold {
                    self.hyperpolarize(cfg);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Would this unit cross threshold if `extra` were added right now?
    pub fn would_cross(&self, extra: Potential) -> bool {
        self.potential + extra > self.threshold
    }

    fn hyperpolarize(&mut self, cfg: &MembraneConfig) {
        self.potential = cfg.hyperpolarized;
        self.refractory = true;
        self.assume_resting(cfg);
    }

    fn assume_resting(&mut self, cfg: &MembraneConfig) {
        *self = Self::resting(cfg);
    }
}

/// Back-reference from an inbound slot to the outbound terminal bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dendrite {
    pub source: UnitId,
    pub terminal: usize,
}

/// One Output-tier firing, recorded as the unit's offset within the Output tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Percept {
    pub outcome: usize,
}

#[derive(Debug)]
pub struct Neuron {
    index: UnitId,
    tier: Tier,
    membrane: Mutex<Membrane>,
    dendrites: Vec<Option<Dendrite>>,
    pub(crate) axon: Axon,
}

impl Neuron {
    pub(crate) fn new(index: UnitId, tier: Tier, max_fan_in: usize, cfg: &MembraneConfig) -> Self {
        Self {
            index,
            tier,
            membrane: Mutex::new(Membrane::resting(cfg)),
            dendrites: vec![None; max_fan_in],
            axon: Axon::default(),
        }
    }

    pub fn index(&self) -> UnitId {
        self.index
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn axon(&self) -> &Axon {
        &self.axon
    }

    /// Copy of the current membrane state.
    pub fn membrane(&self) -> Membrane {
        *self.membrane.lock()
    }

    pub(crate) fn lock_membrane(&self) -> MutexGuard<'_, Membrane> {
        self.membrane.lock()
    }

    pub fn dendrites(&self) -> &[Option<Dendrite>] {
        &self.dendrites
    }

    pub fn vacant_dendrite(&self) -> Option<usize> {
        self.dendrites.iter().position(|d| d.is_none())
    }

    pub fn bound_dendrites(&self) -> usize {
        self.dendrites.iter().filter(|d| d.is_some()).count()
    }

    /// Claim the first vacant inbound slot for `binding`.
    /// Slots are never rebound; returns None when every slot is taken.
    pub(crate) fn claim_dendrite(&mut self, binding: Dendrite) -> Option<usize> {
        let slot = self.vacant_dendrite()?;
        self.dendrites[slot] = Some(binding);
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_excitatory_steps_fire_a_resting_unit() {
        let cfg = MembraneConfig::default();
        let mut m = Membrane::resting(&cfg);

        assert!(!m.receive(Signal::Excite(cfg.excitatory_step), &cfg));
        assert!(m.receive(Signal::Excite(cfg.excitatory_step), &cfg));

        // Firing leaves the unit at rest and out of its refractory period.
        assert_eq!(m, Membrane::resting(&cfg));
    }

    #[test]
    fn input_just_over_the_gap_fires() {
        let cfg = MembraneConfig::default();
        assert!((cfg.threshold - cfg.resting - 0.15).abs() < 1e-12);

        let mut m = Membrane::resting(&cfg);
        assert!(!m.receive(Signal::Excite(0.1), &cfg));
        let mut m2 = Membrane::resting(&cfg);
        assert!(m2.receive(Signal::Excite(0.2), &cfg));
    }

    #[test]
    fn inhibition_never_fires() {
        let cfg = MembraneConfig::default();
        let mut m = Membrane::resting(&cfg);
        assert!(!m.receive(Signal::Inhibit(cfg.inhibitory_step), &cfg));
        assert!(m.potential < cfg.resting);
    }

    #[test]
    fn refractory_unit_ignores_input() {
        let cfg = MembraneConfig::default();
        let mut m = Membrane::resting(&cfg);
        m.refractory = true;
        assert!(!m.receive(Signal::Excite(1.0), &cfg));
        assert_eq!(m.potential, cfg.resting);
    }

    #[test]
    fn dendrite_slots_are_claimed_once() {
        let cfg = MembraneConfig::default();
        let mut n = Neuron::new(0, Tier::Hidden, 2, &cfg);

        let a = n.claim_dendrite(Dendrite { source: 1, terminal: 0 });
        let b = n.claim_dendrite(Dendrite { source: 2, terminal: 0 });
        let c = n.claim_dendrite(Dendrite { source: 3, terminal: 0 });

        assert_eq!(a, Some(0));
        assert_eq!(b, Some(1));
        assert_eq!(c, None);
        assert_eq!(n.dendrites()[0], Some(Dendrite { source: 1, terminal: 0 }));
        assert_eq!(n.bound_dendrites(), 2);
    }
}
