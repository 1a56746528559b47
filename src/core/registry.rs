//! Named circuits for hierarchical composition.
//!
//! A registry owns every circuit it grows. Base ("chunked") circuits classify
//! square chunks of a larger stimulus into a discovered vocabulary; stacked
//! circuits sit on top of a base and learn from the concatenated one-hot
//! answers the base gives for every chunk of a sample.

use hashbrown::HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunk::{classify, Chunk, ChunkGeometry};
use crate::circuit::{Circuit, CircuitConfig, Ranking};
use crate::correction::CorrectionReport;
use crate::error::{CircuitError, CircuitResult};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainingConfig {
    /// Accuracy over one full pass that ends training.
    pub target_accuracy: f64,
    /// Passes to attempt before giving up.
    pub max_epochs: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            target_accuracy: 0.95,
            max_epochs: 1000,
        }
    }
}

impl TrainingConfig {
    pub fn with_target_accuracy(mut self, target: f64) -> Self {
        self.target_accuracy = target;
        self
    }

    /// At least one pass always runs, even for 0.
    pub fn with_max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }
}

/// Running tally of labeled trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrialStats {
    pub presented: usize,
    /// Trials whose ranking was non-empty.
    pub answered: usize,
    pub correct: usize,
}

impl TrialStats {
    pub fn record(&mut self, ranking: &Ranking, label: usize) {
        self.presented += 1;
        if !ranking.is_empty() {
            self.answered += 1;
        }
        if ranking.top_outcome() == Some(label) {
            self.correct += 1;
        }
    }

    /// Correct over presented; 0 before anything was presented.
    pub fn accuracy(&self) -> f64 {
        if self.presented == 0 {
            0.0
        } else {
            self.correct as f64 / self.presented as f64
        }
    }

    pub fn answer_rate(&self) -> f64 {
        if self.presented == 0 {
            0.0
        } else {
            self.answered as f64 / self.presented as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainingReport {
    pub epochs: usize,
    /// Accuracy of the last pass.
    pub accuracy: f64,
    pub converged: bool,
    pub hidden_grown: usize,
    pub last_epoch: TrialStats,
}

/// What `grow_circuit` discovered.
#[derive(Debug, Clone, PartialEq)]
pub struct GrownCircuit {
    pub vocabulary: usize,
    pub chunks: Vec<Chunk>,
    pub training: Option<TrainingReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Composition {
    /// Classifies chunks of a stimulus into a discovered vocabulary.
    Chunked {
        geometry: ChunkGeometry,
        overlap_threshold: f64,
        vocabulary: usize,
        chunks: Vec<Chunk>,
    },
    /// Fed by the one-hot answers of `base` over every chunk of a sample.
    Stacked { base: String },
}

#[derive(Debug)]
pub struct CircuitEntry {
    pub id: String,
    pub circuit: Circuit,
    pub composition: Composition,
}

impl CircuitEntry {
    pub fn vocabulary(&self) -> Option<usize> {
        match &self.composition {
            Composition::Chunked { vocabulary, .. } => Some(*vocabulary),
            Composition::Stacked { .. } => None,
        }
    }

    pub fn overlap_threshold(&self) -> Option<f64> {
        match &self.composition {
            Composition::Chunked {
                overlap_threshold, ..
            } => Some(*overlap_threshold),
            Composition::Stacked { .. } => None,
        }
    }

    pub fn base(&self) -> Option<&str> {
        match &self.composition {
            Composition::Chunked { .. } => None,
            Composition::Stacked { base } => Some(base),
        }
    }
}

/// Owns named circuits. Nothing is allocated until the first circuit is grown.
#[derive(Debug, Default)]
pub struct Registry {
    cfg: CircuitConfig,
    entries: HashMap<String, CircuitEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every circuit this registry grows uses `cfg`.
    pub fn with_config(cfg: CircuitConfig) -> Self {
        Self {
            cfg,
            entries: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.cfg
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Identifiers in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn entry(&self, id: &str) -> CircuitResult<&CircuitEntry> {
        self.entries
            .get(id)
            .ok_or_else(|| CircuitError::UnknownCircuit(id.to_owned()))
    }

    fn entry_mut(&mut self, id: &str) -> CircuitResult<&mut CircuitEntry> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| CircuitError::UnknownCircuit(id.to_owned()))
    }

    pub fn circuit(&self, id: &str) -> CircuitResult<&Circuit> {
        Ok(&self.entry(id)?.circuit)
    }

    pub fn circuit_mut(&mut self, id: &str) -> CircuitResult<&mut Circuit> {
        Ok(&mut self.entry_mut(id)?.circuit)
    }

    /// Segment `stimuli` into chunks, discover their vocabulary and grow a
    /// `(chunk_length, vocabulary)` circuit under `id`, replacing any circuit
    /// already registered there. Trains it when `training` is given.
    ///
    /// Nothing is registered unless growth and training both succeed.
    pub fn grow_circuit(
        &mut self,
        id: &str,
        chunk_length: usize,
        overlap_threshold: f64,
        stim_length: usize,
        stimuli: &[f64],
        training: Option<TrainingConfig>,
    ) -> CircuitResult<GrownCircuit> {
        let geometry = ChunkGeometry::new(stim_length, chunk_length)?;
        let mut chunks = geometry.segment(stimuli)?;
        if chunks.is_empty() {
            return Err(CircuitError::EmptyTrainingSet(id.to_owned()));
        }
        let vocabulary = classify(&mut chunks, overlap_threshold);
        let mut circuit = Circuit::grow_with(chunk_length, vocabulary, self.cfg)?;

        info!(
            id,
            chunks = chunks.len(),
            vocabulary,
            units = circuit.unit_count(),
            "chunked circuit grown"
        );
        let training = match training {
            Some(cfg) => Some(train_circuit(id, &mut circuit, &labeled(&chunks), cfg)?),
            None => None,
        };

        self.entries.insert(
            id.to_owned(),
            CircuitEntry {
                id: id.to_owned(),
                circuit,
                composition: Composition::Chunked {
                    geometry,
                    overlap_threshold,
                    vocabulary,
                    chunks: chunks.clone(),
                },
            },
        );
        Ok(GrownCircuit {
            vocabulary,
            chunks,
            training,
        })
    }

    /// Expose every chunk of a chunked circuit labeled by its type, correcting
    /// after each answered exposure, until one pass reaches the target
    /// accuracy or `max_epochs` passes have run.
    pub fn train(&mut self, id: &str, cfg: TrainingConfig) -> CircuitResult<TrainingReport> {
        let entry = self.entry_mut(id)?;
        let Composition::Chunked { chunks, .. } = &entry.composition else {
            return Err(CircuitError::EmptyTrainingSet(id.to_owned()));
        };
        let samples = labeled(chunks);
        if samples.is_empty() {
            return Err(CircuitError::EmptyTrainingSet(id.to_owned()));
        }

        train_circuit(id, &mut entry.circuit, &samples, cfg)
    }

    /// Grow a circuit under `id` whose inputs are the one-hot answers of
    /// `base_id` over every chunk of a sample.
    pub fn stack(&mut self, id: &str, base_id: &str, outputs: usize) -> CircuitResult<&Circuit> {
        let base = self.entry(base_id)?;
        let Composition::Chunked {
            geometry,
            vocabulary,
            ..
        } = &base.composition
        else {
            return Err(CircuitError::NotChunked(base_id.to_owned()));
        };
        let inputs = vocabulary * geometry.chunks_per_stimulus();
        let circuit = Circuit::grow_with(inputs, outputs, self.cfg)?;

        info!(id, base = base_id, inputs, outputs, "stacked circuit grown");
        let entry = CircuitEntry {
            id: id.to_owned(),
            circuit,
            composition: Composition::Stacked {
                base: base_id.to_owned(),
            },
        };
        self.entries.insert(id.to_owned(), entry);
        self.circuit(id)
    }

    /// Classify every chunk of `stimulus` through the base of `id`, then expose
    /// `id` to the concatenated one-hot answers.
    ///
    /// Returns the concatenation (all zeros for a chunk the base could not
    /// answer) along with the ranking, so the caller can pass it to `correct`.
    pub fn expose(&mut self, id: &str, stimulus: &[f64]) -> CircuitResult<(Vec<f64>, Ranking)> {
        let base_id = match &self.entry(id)?.composition {
            Composition::Stacked { base } => base.clone(),
            Composition::Chunked { .. } => return Err(CircuitError::NotStacked(id.to_owned())),
        };

        let base = self.entry_mut(&base_id)?;
        let Composition::Chunked {
            geometry,
            vocabulary,
            ..
        } = &base.composition
        else {
            return Err(CircuitError::NotChunked(base_id));
        };
        let (geometry, vocabulary) = (*geometry, *vocabulary);
        if stimulus.len() != geometry.stim_length {
            return Err(CircuitError::SampleLength {
                len: stimulus.len(),
                stim_length: geometry.stim_length,
            });
        }

        let chunks = geometry.segment(stimulus)?;
        let mut one_hot = Vec::with_capacity(chunks.len() * vocabulary);
        for chunk in &chunks {
            let mut slot = vec![0.0; vocabulary];
            if let Some(top) = base.circuit.expose(&chunk.sensations)?.top_outcome() {
                if let Some(v) = slot.get_mut(top) {
                    *v = 1.0;
                }
            }
            one_hot.extend_from_slice(&slot);
        }

        let ranking = self.circuit_mut(id)?.expose(&one_hot)?;
        Ok((one_hot, ranking))
    }

    /// Apply the correction rule to circuit `id`.
    pub fn correct(
        &mut self,
        id: &str,
        ranking: &Ranking,
        label: usize,
        stimulus: &[f64],
    ) -> CircuitResult<CorrectionReport> {
        self.circuit_mut(id)?.correct_for(ranking, label, stimulus)
    }

    /// Train a stacked circuit on labeled samples (one `stim_length` sample per
    /// label) with the same stopping rule as `train`.
    pub fn train_stacked(
        &mut self,
        id: &str,
        samples: &[(Vec<f64>, usize)],
        cfg: TrainingConfig,
    ) -> CircuitResult<TrainingReport> {
        if self.entry(id)?.base().is_none() {
            return Err(CircuitError::NotStacked(id.to_owned()));
        }
        if samples.is_empty() {
            return Err(CircuitError::EmptyTrainingSet(id.to_owned()));
        }

        run_epochs(id, cfg, |stats| {
            let mut grown = 0;
            for (stimulus, label) in samples {
                let (one_hot, ranking) = self.expose(id, stimulus)?;
                stats.record(&ranking, *label);
                if !ranking.is_empty() {
                    grown += self.correct(id, &ranking, *label, &one_hot)?.hidden_grown;
                }
            }
            Ok(grown)
        })
    }
}

/// Typed chunks paired with their vocabulary type as the training label.
fn labeled(chunks: &[Chunk]) -> Vec<(&[f64], usize)> {
    chunks
        .iter()
        .filter_map(|c| c.kind.map(|kind| (c.sensations.as_slice(), kind)))
        .collect()
}

/// Expose-then-correct over labeled `samples` until one pass reaches the
/// target accuracy or `max_epochs` passes have run. `name` only labels logs.
pub fn train_circuit<S: AsRef<[f64]>>(
    name: &str,
    circuit: &mut Circuit,
    samples: &[(S, usize)],
    cfg: TrainingConfig,
) -> CircuitResult<TrainingReport> {
    run_epochs(name, cfg, |stats| {
        let mut grown = 0;
        for (stimulus, label) in samples {
            let stimulus = stimulus.as_ref();
            let ranking = circuit.expose(stimulus)?;
            stats.record(&ranking, *label);
            if !ranking.is_empty() {
                grown += circuit.correct_for(&ranking, *label, stimulus)?.hidden_grown;
            }
        }
        Ok(grown)
    })
}

/// Drive `pass` until it reaches the target accuracy or runs out of epochs.
/// `pass` returns how many Hidden units its corrections grew.
fn run_epochs<F>(id: &str, cfg: TrainingConfig, mut pass: F) -> CircuitResult<TrainingReport>
where
    F: FnMut(&mut TrialStats) -> CircuitResult<usize>,
{
    let mut report = TrainingReport::default();
    for epoch in 1..=cfg.max_epochs.max(1) {
        let mut stats = TrialStats::default();
        report.hidden_grown += pass(&mut stats)?;
        report.epochs = epoch;
        report.accuracy = stats.accuracy();
        report.last_epoch = stats;

        debug!(id, epoch, accuracy = report.accuracy, "training pass");
        if report.accuracy >= cfg.target_accuracy {
            report.converged = true;
            break;
        }
    }

    if report.converged {
        info!(id, epochs = report.epochs, accuracy = report.accuracy, "training converged");
    } else {
        warn!(
            id,
            epochs = report.epochs,
            accuracy = report.accuracy,
            target = cfg.target_accuracy,
            "training stopped before reaching target accuracy"
        );
    }
    Ok(report)
}
