//! Propagation engine: drives one exposure from input injection to quiescence.
//!
//! Every potential change is a unit of work. A unit that fires hands one new
//! unit of work to each conducting terminal, so the amount of live work follows
//! the activation wavefront. Percepts are read only after all work, direct and
//! transitive, has completed.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::collections::VecDeque;

use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::axon::Polarity;
use crate::circuit::{Circuit, ExecutionTier, TierLayout};
use crate::error::{CircuitError, CircuitResult};
use crate::neuron::{MembraneConfig, Neuron, Percept, Signal, UnitId};

/// What the engine did during one exposure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExposureStats {
    /// Potential changes delivered (injections included).
    pub events: u64,
    pub firings: u64,
    pub deepest_generation: u32,
    /// Largest number of units of work alive at once.
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone, Copy)]
struct Arrival {
    unit: UnitId,
    signal: Signal,
    // 0 for injections, parent + 1 for propagated changes.
    generation: u32,
}

/// Pending-work counter plus the safety bounds.
///
/// Incremented when work is spawned, decremented when it completes; the
/// exposure is quiescent when it returns to zero.
struct Ledger {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    events: AtomicU64,
    firings: AtomicU64,
    deepest: AtomicU32,
    failure: Mutex<Option<CircuitError>>,
}

impl Ledger {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            events: AtomicU64::new(0),
            firings: AtomicU64::new(0),
            deepest: AtomicU32::new(0),
            failure: Mutex::new(None),
        }
    }

    fn spawned(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    fn completed(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn halted(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn fail(&self, err: CircuitError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn finish(self) -> CircuitResult<ExposureStats> {
        debug_assert_eq!(self.in_flight.load(Ordering::Acquire), 0);
        if let Some(err) = self.failure.into_inner() {
            return Err(err);
        }
        Ok(ExposureStats {
            events: self.events.into_inner(),
            firings: self.firings.into_inner(),
            deepest_generation: self.deepest.into_inner(),
            peak_in_flight: self.peak_in_flight.into_inner(),
        })
    }
}

pub(crate) struct Engine<'a> {
    neurons: &'a [Neuron],
    layout: TierLayout,
    membrane: MembraneConfig,
    results: &'a Mutex<Vec<Percept>>,
    tier: ExecutionTier,
    max_generations: u32,
    max_events: u64,
}

impl<'a> Engine<'a> {
    pub(crate) fn new(circuit: &'a Circuit) -> Self {
        let cfg = circuit.config();
        Self {
            neurons: circuit.neurons(),
            layout: *circuit.layout(),
            membrane: cfg.membrane,
            results: circuit.results(),
            tier: cfg.execution_tier,
            max_generations: cfg.max_generations,
            max_events: cfg.max_events,
        }
    }

    /// Inject `stimulus` into the Input tier and wait for quiescence.
    /// Caller guarantees `stimulus.len() <= inputs`.
    pub(crate) fn run(&self, stimulus: &[f64]) -> CircuitResult<ExposureStats> {
        match self.tier.effective() {
            ExecutionTier::Scalar => self.run_scalar(stimulus),
            ExecutionTier::Parallel => self.run_parallel(stimulus),
        }
    }

    fn injections<'s>(&self, stimulus: &'s [f64]) -> impl Iterator<Item = Arrival> + 's {
        stimulus.iter().enumerate().map(|(unit, &value)| Arrival {
            unit,
            signal: Signal::Excite(value),
            generation: 0,
        })
    }

    fn successor(&self, polarity: Polarity, target: UnitId, generation: u32) -> Arrival {
        let signal = match polarity {
            Polarity::Excitatory => Signal::Excite(self.membrane.excitatory_step),
            Polarity::Inhibitory => Signal::Inhibit(self.membrane.inhibitory_step),
        };
        Arrival {
            unit: target,
            signal,
            generation: generation + 1,
        }
    }

    /// Apply one arrival. Returns the unit if it fired and must propagate.
    fn deliver(&self, arrival: Arrival, ledger: &Ledger) -> Option<&'a Neuron> {
        if ledger.halted() {
            return None;
        }
        if arrival.generation > self.max_generations {
            ledger.fail(CircuitError::RunawayCascade {
                generation: arrival.generation,
                limit: self.max_generations,
            });
            return None;
        }
        let events = ledger.events.fetch_add(1, Ordering::Relaxed) + 1;
        if events > self.max_events {
            ledger.fail(CircuitError::EventBudgetExceeded {
                events,
                limit: self.max_events,
            });
            return None;
        }
        ledger.deepest.fetch_max(arrival.generation, Ordering::Relaxed);

        let neurons: &'a [Neuron] = self.neurons;
        let neuron = &neurons[arrival.unit];
        let fired = neuron.lock_membrane().receive(arrival.signal, &self.membrane);
        if !fired {
            return None;
        }
        ledger.firings.fetch_add(1, Ordering::Relaxed);

        if neuron.tier().is_terminal() {
            if let Some(outcome) = self.layout.output_offset(arrival.unit) {
                self.results.lock().push(Percept { outcome });
            }
            return None;
        }
        Some(neuron)
    }

    fn run_scalar(&self, stimulus: &[f64]) -> CircuitResult<ExposureStats> {
        let ledger = Ledger::new();
        let mut queue: VecDeque<Arrival> = VecDeque::with_capacity(stimulus.len());
        for arrival in self.injections(stimulus) {
            ledger.spawned();
            queue.push_back(arrival);
        }

        while let Some(arrival) = queue.pop_front() {
            if let Some(neuron) = self.deliver(arrival, &ledger) {
                for t in neuron.axon().conducting() {
                    ledger.spawned();
                    queue.push_back(self.successor(t.polarity, t.target, arrival.generation));
                }
            }
            ledger.completed();
        }

        ledger.finish()
    }

    /// Each arrival is its own task on a rayon scope; the scope returning is the
    /// quiescence barrier.
    #[cfg(feature = "parallel")]
    fn run_parallel(&self, stimulus: &[f64]) -> CircuitResult<ExposureStats> {
        let ledger = Ledger::new();
        {
            let ledger = &ledger;
            rayon::scope(|s| {
                for arrival in self.injections(stimulus) {
                    ledger.spawned();
                    s.spawn(move |s| self.cascade(s, arrival, ledger));
                }
            });
        }
        ledger.finish()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_parallel(&self, stimulus: &[f64]) -> CircuitResult<ExposureStats> {
        self.run_scalar(stimulus)
    }

    #[cfg(feature = "parallel")]
    fn cascade<'s>(&'s self, scope: &rayon::Scope<'s>, arrival: Arrival, ledger: &'s Ledger) {
        if let Some(neuron) = self.deliver(arrival, ledger) {
            for t in neuron.axon().conducting() {
                let next = self.successor(t.polarity, t.target, arrival.generation);
                ledger.spawned();
                scope.spawn(move |s| self.cascade(s, next, ledger));
            }
        }
        ledger.completed();
    }
}

#[cfg(test)]
mod tests {
    use crate::circuit::{Circuit, CircuitConfig, ExecutionTier};
    use crate::error::CircuitError;

    fn grow(tier: ExecutionTier) -> Circuit {
        Circuit::grow_with(4, 2, CircuitConfig::default().with_execution_tier(tier)).unwrap()
    }

    #[test]
    fn zero_stimulus_gives_no_answer() {
        let mut c = grow(ExecutionTier::Scalar);
        let exposure = c.try_expose(&[0.0; 4]).unwrap();
        assert!(exposure.ranking.is_empty());
        assert_eq!(exposure.stats.events, 4);
        assert_eq!(exposure.stats.firings, 0);
    }

    #[test]
    fn full_stimulus_reaches_both_outputs() {
        let mut c = grow(ExecutionTier::Scalar);
        let exposure = c.try_expose(&[0.2; 4]).unwrap();

        let votes: Vec<(usize, usize)> = exposure
            .ranking
            .iter()
            .map(|r| (r.outcome, r.votes))
            .collect();
        assert_eq!(votes, vec![(0, 1), (1, 1)]);
        assert_eq!(exposure.ranking.top_outcome(), Some(0));
        assert!((exposure.ranking.as_slice()[0].confidence - 0.5).abs() < 1e-12);

        // 4 injections, 2 hidden units x 2 arrivals, 2 hidden firings x 2 outputs.
        assert_eq!(exposure.stats.events, 12);
        assert_eq!(exposure.stats.firings, 8);
        assert_eq!(exposure.stats.deepest_generation, 2);
    }

    #[test]
    fn overlong_stimulus_is_rejected_without_side_effects() {
        let mut c = grow(ExecutionTier::Scalar);
        let before = c.membranes();

        assert!(c.expose(&[0.5; 5]).unwrap().is_empty());
        assert_eq!(
            c.try_expose(&[0.5; 5]).unwrap_err(),
            CircuitError::StimulusTooLong { len: 5, inputs: 4 }
        );
        assert_eq!(c.membranes(), before);
    }

    #[test]
    fn shorter_stimulus_only_touches_leading_inputs() {
        let mut c = grow(ExecutionTier::Scalar);
        let exposure = c.try_expose(&[0.2]).unwrap();
        assert_eq!(exposure.stats.events, 2);
        assert_eq!(c.membranes()[1], c.membranes()[2]);
    }

    fn first_coordinate_run(tier: ExecutionTier) -> Vec<Option<usize>> {
        let mut c = grow(tier);
        (0..6)
            .map(|_| c.expose(&[0.2, 0.0, 0.0, 0.0]).unwrap().top_outcome())
            .collect()
    }

    #[test]
    fn single_coordinate_outcome_is_reproducible() {
        let a = first_coordinate_run(ExecutionTier::Scalar);
        let b = first_coordinate_run(ExecutionTier::Scalar);
        assert_eq!(a, b);

        // Potentials persist between exposures: the hidden unit needs two
        // exposures to fire, the outputs need two hidden firings.
        assert_eq!(a[..3], [None::<usize>; 3]);
        assert_eq!(a[3], Some(0));
    }

    #[test]
    fn parallel_tier_matches_scalar_on_excitatory_circuits() {
        assert_eq!(
            first_coordinate_run(ExecutionTier::Parallel),
            first_coordinate_run(ExecutionTier::Scalar)
        );

        let mut p = grow(ExecutionTier::Parallel);
        let mut s = grow(ExecutionTier::Scalar);
        for _ in 0..4 {
            let rp = p.expose(&[0.2; 4]).unwrap();
            let rs = s.expose(&[0.2; 4]).unwrap();
            assert_eq!(rp, rs);
        }
    }

    fn striped(round: usize) -> Vec<f64> {
        (0..784)
            .map(|i| if (i + round) % 3 == 0 { 0.0 } else { 0.2 })
            .collect()
    }

    #[test]
    fn parallel_tier_matches_scalar_on_a_wide_circuit() {
        let grow_wide = |tier| {
            let cfg = CircuitConfig::default().with_execution_tier(tier);
            Circuit::grow_with(784, 10, cfg).unwrap()
        };
        let mut p = grow_wide(ExecutionTier::Parallel);
        let mut s = grow_wide(ExecutionTier::Scalar);

        for round in 0..20 {
            let stimulus = striped(round);
            let ep = p.try_expose(&stimulus).unwrap();
            let es = s.try_expose(&stimulus).unwrap();
            assert_eq!(ep.ranking, es.ranking, "round {round}");
            assert_eq!(ep.stats.events, es.stats.events);
            assert_eq!(ep.stats.firings, es.stats.firings);
        }
        assert_eq!(p.membranes(), s.membranes());

        // Once inhibitors exist an Output unit's answer depends on arrival
        // order, but everything upstream of the Output tier does not.
        let layout = *s.layout();
        let outputs = layout.inputs + layout.hidden..layout.inputs + layout.hidden + layout.outputs;
        for round in 0..10 {
            let stimulus = striped(round);
            let ranking = s.expose(&stimulus).unwrap();
            let ep = p.try_expose(&stimulus).unwrap();
            assert!(ep.ranking.len() <= layout.outputs);

            let rs = s.correct_for(&ranking, round % 10, &stimulus).unwrap();
            let rp = p.correct_for(&ranking, round % 10, &stimulus).unwrap();
            assert_eq!(rp, rs, "round {round}");
            assert_eq!(p.diagnostics(), s.diagnostics());

            let upstream = |c: &Circuit| {
                c.membranes()
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !outputs.contains(i))
                    .map(|(_, m)| m)
                    .collect::<Vec<_>>()
            };
            assert_eq!(upstream(&p), upstream(&s), "round {round}");
        }
        assert!(s.diagnostics().grown_hidden > 0);
    }

    #[test]
    fn generation_bound_is_fatal() {
        let cfg = CircuitConfig::default()
            .with_execution_tier(ExecutionTier::Scalar)
            .with_max_generations(1);
        let mut c = Circuit::grow_with(4, 2, cfg).unwrap();

        let err = c.expose(&[0.2; 4]).unwrap_err();
        assert_eq!(err, CircuitError::RunawayCascade { generation: 2, limit: 1 });
        assert!(err.is_runaway());

        // The buffer was drained; the next exposure starts clean.
        assert!(c.expose(&[0.0; 4]).unwrap().is_empty());
    }

    #[test]
    fn event_budget_is_fatal_on_both_tiers() {
        for tier in [ExecutionTier::Scalar, ExecutionTier::Parallel] {
            let cfg = CircuitConfig::default()
                .with_execution_tier(tier)
                .with_max_events(3);
            let mut c = Circuit::grow_with(4, 2, cfg).unwrap();
            let err = c.expose(&[0.0; 4]).unwrap_err();
            assert!(matches!(err, CircuitError::EventBudgetExceeded { limit: 3, .. }));
        }
    }
}
