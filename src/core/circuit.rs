use core::ops::Range;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::axon::{genesis_plan, AxonTerminal, GenesisPlan, Polarity, PolarityPolicy};
use crate::error::{CircuitError, CircuitResult};
use crate::neuron::{Dendrite, Membrane, MembraneConfig, Neuron, Percept, Tier, UnitId};
use crate::prng::Prng;
use crate::propagation::{Engine, ExposureStats};

/// Execution tier for exposures.
///
/// - `Scalar`: single-threaded FIFO worklist. Fully deterministic.
/// - `Parallel`: every potential change is its own task on a rayon scope;
///   the scope is the quiescence barrier (requires `parallel` feature).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    /// Single-threaded worklist (default, works everywhere).
    #[default]
    Scalar,
    /// Concurrent fan-out (requires `parallel` feature, else falls back to scalar).
    Parallel,
}

impl ExecutionTier {
    /// Parallel when the crate was built with it, scalar otherwise.
    pub fn preferred() -> Self {
        if cfg!(feature = "parallel") {
            ExecutionTier::Parallel
        } else {
            ExecutionTier::Scalar
        }
    }

    /// The tier that will actually run given the compiled features.
    pub fn effective(self) -> Self {
        match self {
            ExecutionTier::Parallel if cfg!(feature = "parallel") => ExecutionTier::Parallel,
            _ => ExecutionTier::Scalar,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CircuitConfig {
    /// Inbound slots per unit.
    pub max_fan_in: usize,

    pub membrane: MembraneConfig,

    /// Deep-potential increment used by the correction rule per crossing input.
    pub correction_step: f64,

    pub polarity: PolarityPolicy,

    // Seeds the polarity coin. None falls back to a fixed seed.
    pub seed: Option<u64>,

    pub execution_tier: ExecutionTier,

    // Safety bounds: an exposure that is still active past either limit is fatal.
    pub max_generations: u32,
    pub max_events: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_fan_in: 15,
            membrane: MembraneConfig::default(),
            correction_step: 0.075,
            polarity: PolarityPolicy::AlwaysExcitatory,
            seed: None,
            execution_tier: ExecutionTier::preferred(),
            max_generations: 256,
            max_events: 4_000_000,
        }
    }
}

impl CircuitConfig {
    pub fn with_max_fan_in(mut self, max_fan_in: usize) -> Self {
        self.max_fan_in = max_fan_in;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_polarity(mut self, polarity: PolarityPolicy) -> Self {
        self.polarity = polarity;
        self
    }

    pub fn with_execution_tier(mut self, tier: ExecutionTier) -> Self {
        self.execution_tier = tier;
        self
    }

    pub fn with_max_generations(mut self, max_generations: u32) -> Self {
        self.max_generations = max_generations;
        self
    }

    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = max_events;
        self
    }
}

/// Fixed tier boundaries of a circuit.
///
/// `[0, In)` Input, `[In, In+H)` Hidden (genesis), `[In+H, In+H+Out)` Output.
/// Hidden units grown later by correction are appended after the Output tier
/// and never move these boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TierLayout {
    pub inputs: usize,
    pub hidden: usize,
    pub outputs: usize,
}

impl TierLayout {
    /// `H = min(ceil((In - Out) / 2) + Out, In)`.
    pub fn new(inputs: usize, outputs: usize) -> CircuitResult<Self> {
        if inputs == 0 || outputs == 0 {
            return Err(CircuitError::InvalidSizing { inputs, outputs });
        }
        let diff = inputs as i64 - outputs as i64;
        let half_up = (diff + 1).div_euclid(2);
        let hidden = (half_up + outputs as i64).clamp(0, inputs as i64) as usize;
        Ok(Self {
            inputs,
            hidden,
            outputs,
        })
    }

    /// Unit count right after genesis.
    pub fn genesis_len(&self) -> usize {
        self.inputs + self.hidden + self.outputs
    }

    pub fn input_range(&self) -> Range<UnitId> {
        0..self.inputs
    }

    pub fn hidden_range(&self) -> Range<UnitId> {
        self.inputs..self.inputs + self.hidden
    }

    pub fn output_range(&self) -> Range<UnitId> {
        let start = self.inputs + self.hidden;
        start..start + self.outputs
    }

    /// Inputs per Hidden group: `ceil(In / H)`.
    pub fn group_size(&self) -> CircuitResult<usize> {
        if self.hidden == 0 {
            return Err(CircuitError::DegeneratePartition {
                inputs: self.inputs,
                hidden: self.hidden,
            });
        }
        Ok(self.inputs.div_ceil(self.hidden))
    }

    /// Hidden unit owning the group that input offset `input` falls in.
    pub fn hidden_for_input(&self, input: usize) -> CircuitResult<UnitId> {
        let group = self.group_size()?;
        Ok(self.inputs + input / group)
    }

    pub fn output_unit(&self, outcome: usize) -> Option<UnitId> {
        (outcome < self.outputs).then(|| self.inputs + self.hidden + outcome)
    }

    pub fn output_offset(&self, unit: UnitId) -> Option<usize> {
        self.output_range().contains(&unit).then(|| unit - self.inputs - self.hidden)
    }

    /// Ceiling on inhibitory connections grown by correction: `H * (Out - 1)`.
    pub fn inhibitor_cap(&self) -> usize {
        self.hidden * self.outputs.saturating_sub(1)
    }
}

/// One candidate outcome with its vote count.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RankedResult {
    pub outcome: usize,
    pub votes: usize,
    pub confidence: f64,
}

/// Outcome candidates in strictly descending vote order, ties by lowest outcome.
///
/// Empty means the circuit settled without any Output unit firing.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ranking {
    results: Vec<RankedResult>,
    total: usize,
}

impl Ranking {
    /// Aggregate percepts into a ranking. A pure function of the percept multiset.
    pub fn from_percepts(percepts: &[Percept]) -> Self {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for p in percepts {
            *counts.entry(p.outcome).or_default() += 1;
        }

        let total = percepts.len();
        let mut results: Vec<RankedResult> = counts
            .into_iter()
            .map(|(outcome, votes)| RankedResult {
                outcome,
                votes,
                confidence: votes as f64 / total as f64,
            })
            .collect();
        results.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.outcome.cmp(&b.outcome)));

        Self { results, total }
    }

    pub fn top(&self) -> Option<&RankedResult> {
        self.results.first()
    }

    pub fn top_outcome(&self) -> Option<usize> {
        self.top().map(|r| r.outcome)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn as_slice(&self) -> &[RankedResult] {
        &self.results
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedResult> + '_ {
        self.results.iter()
    }

    pub fn total_percepts(&self) -> usize {
        self.total
    }

    pub fn votes_for(&self, outcome: usize) -> usize {
        self.results
            .iter()
            .find(|r| r.outcome == outcome)
            .map_or(0, |r| r.votes)
    }
}

/// Ranking plus what the engine did to produce it.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Exposure {
    pub ranking: Ranking,
    pub stats: ExposureStats,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostics {
    pub unit_count: usize,
    pub input_count: usize,
    pub hidden_count: usize,
    pub grown_hidden: usize,
    pub output_count: usize,
    pub connection_count: usize,
    pub bound_connections: usize,
    pub inhibitory_connections: usize,
    pub inhibitors_grown: usize,
    pub inhibitor_cap: usize,
    pub exposures: u64,
}

/// A structurally-plastic spiking circuit.
///
/// Owns every unit; connections refer to units by index.
#[derive(Debug)]
pub struct Circuit {
    cfg: CircuitConfig,
    layout: TierLayout,
    neurons: Vec<Neuron>,

    // Per-exposure percept buffer, appended to by firing Output units.
    results: Mutex<Vec<Percept>>,

    inhibitors: usize,
    rng: Prng,
    exposures: u64,
}

impl Circuit {
    /// Grow a circuit with the default configuration.
    pub fn grow(inputs: usize, outputs: usize) -> CircuitResult<Self> {
        Self::grow_with(inputs, outputs, CircuitConfig::default())
    }

    /// Neurogenesis: create every tier, then grow each unit's outbound connections.
    pub fn grow_with(inputs: usize, outputs: usize, cfg: CircuitConfig) -> CircuitResult<Self> {
        let layout = TierLayout::new(inputs, outputs)?;
        // Validate the partition before anything is allocated.
        layout.group_size()?;

        let mut circuit = Self {
            cfg,
            layout,
            neurons: Vec::with_capacity(layout.genesis_len()),
            results: Mutex::new(Vec::new()),
            inhibitors: 0,
            rng: Prng::new(cfg.seed.unwrap_or(1)),
            exposures: 0,
        };

        for i in 0..layout.genesis_len() {
            let tier = if layout.input_range().contains(&i) {
                Tier::Input
            } else if layout.hidden_range().contains(&i) {
                Tier::Hidden
            } else {
                Tier::Output
            };
            circuit.grow_neuron(tier);
        }

        for unit in 0..circuit.neurons.len() {
            match genesis_plan(&layout, unit, circuit.neurons[unit].tier())? {
                GenesisPlan::None => {}
                GenesisPlan::Fixed(target) => {
                    circuit.connect(unit, target, Polarity::Excitatory);
                }
                GenesisPlan::Drawn(targets) => {
                    for target in targets {
                        let polarity = circuit.cfg.polarity.draw(&mut circuit.rng);
                        circuit.connect(unit, target, polarity);
                    }
                }
            }
        }

        let diag = circuit.diagnostics();
        debug!(
            inputs,
            hidden = layout.hidden,
            outputs,
            connections = diag.connection_count,
            unbound = diag.connection_count - diag.bound_connections,
            "circuit grown"
        );
        Ok(circuit)
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.cfg
    }

    pub fn layout(&self) -> &TierLayout {
        &self.layout
    }

    pub fn inputs(&self) -> usize {
        self.layout.inputs
    }

    pub fn outputs(&self) -> usize {
        self.layout.outputs
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn neuron(&self, id: UnitId) -> Option<&Neuron> {
        self.neurons.get(id)
    }

    pub fn unit_count(&self) -> usize {
        self.neurons.len()
    }

    pub fn connection_count(&self) -> usize {
        self.neurons.iter().map(|n| n.axon().len()).sum()
    }

    pub fn inhibitors_grown(&self) -> usize {
        self.inhibitors
    }

    pub fn exposures(&self) -> u64 {
        self.exposures
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.cfg.execution_tier = tier;
    }

    /// Potentials of every unit, in index order.
    pub fn membranes(&self) -> Vec<Membrane> {
        self.neurons.iter().map(|n| n.membrane()).collect()
    }

    /// Expose a stimulus and return the ranked outcomes.
    ///
    /// A stimulus longer than the Input tier is rejected with an empty ranking.
    pub fn expose(&mut self, stimulus: &[f64]) -> CircuitResult<Ranking> {
        match self.try_expose(stimulus) {
            Ok(exposure) => Ok(exposure.ranking),
            Err(CircuitError::StimulusTooLong { len, inputs }) => {
                debug!(len, inputs, "stimulus rejected");
                Ok(Ranking::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Expose a stimulus, surfacing rejection as an error and returning engine stats.
    pub fn try_expose(&mut self, stimulus: &[f64]) -> CircuitResult<Exposure> {
        if stimulus.len() > self.layout.inputs {
            return Err(CircuitError::StimulusTooLong {
                len: stimulus.len(),
                inputs: self.layout.inputs,
            });
        }

        let outcome = Engine::new(self).run(stimulus);

        // Drained exactly once per exposure, after quiescence, whatever the outcome.
        let percepts = core::mem::take(self.results.get_mut());
        self.exposures += 1;

        let stats = outcome?;
        let ranking = Ranking::from_percepts(&percepts);
        trace!(
            events = stats.events,
            generations = stats.deepest_generation,
            percepts = percepts.len(),
            top = ?ranking.top_outcome(),
            "exposure settled"
        );
        Ok(Exposure { ranking, stats })
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let mut connection_count = 0;
        let mut bound_connections = 0;
        let mut inhibitory_connections = 0;
        for n in &self.neurons {
            for t in n.axon().terminals() {
                connection_count += 1;
                if t.is_bound() {
                    bound_connections += 1;
                }
                if !t.polarity.is_excitatory() {
                    inhibitory_connections += 1;
                }
            }
        }
        let hidden_count = self
            .neurons
            .iter()
            .filter(|n| n.tier() == Tier::Hidden)
            .count();

        Diagnostics {
            unit_count: self.neurons.len(),
            input_count: self.layout.inputs,
            hidden_count,
            grown_hidden: hidden_count - self.layout.hidden,
            output_count: self.layout.outputs,
            connection_count,
            bound_connections,
            inhibitory_connections,
            inhibitors_grown: self.inhibitors,
            inhibitor_cap: self.layout.inhibitor_cap(),
            exposures: self.exposures,
        }
    }

    pub(crate) fn grow_neuron(&mut self, tier: Tier) -> UnitId {
        let index = self.neurons.len();
        self.neurons
            .push(Neuron::new(index, tier, self.cfg.max_fan_in, &self.cfg.membrane));
        index
    }

    /// Append a terminal from `from` to `to`, claiming a vacant inbound slot on `to`.
    pub(crate) fn connect(&mut self, from: UnitId, to: UnitId, polarity: Polarity) -> usize {
        let terminal = self.neurons[from].axon().len();
        let slot = self.neurons[to].claim_dendrite(Dendrite {
            source: from,
            terminal,
        });
        if slot.is_none() {
            trace!(from, to, "no vacant inbound slot; terminal stays unbound");
        }
        self.neurons[from].axon.push(AxonTerminal {
            target: to,
            slot,
            polarity,
        })
    }

    pub(crate) fn results(&self) -> &Mutex<Vec<Percept>> {
        &self.results
    }

    pub(crate) fn note_inhibitor(&mut self) {
        self.inhibitors += 1;
    }
}
