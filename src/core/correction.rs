//! Structural correction: the circuit's only learning mechanism.
//!
//! A wrong answer never changes an existing connection. Instead the rule opens
//! a new excitatory path toward the right Output unit through a freshly grown
//! Hidden unit, and inhibits the path that voted wrong while the inhibitor
//! budget lasts. Unit and connection counts only ever go up.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::axon::Polarity;
use crate::circuit::{Circuit, Ranking};
use crate::error::{CircuitError, CircuitResult};
use crate::neuron::Tier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CorrectionOutcome {
    /// Top outcome already matched the label.
    #[default]
    AlreadyCorrect,
    /// Nothing fired, so there is no wrong answer to correct against.
    NoAnswer,
    /// The rule ran; see the counters for what it grew.
    Corrected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CorrectionReport {
    pub outcome: CorrectionOutcome,
    pub hidden_grown: usize,
    pub inhibitors_grown: usize,
    /// Inhibitory connections not grown because the cap was reached.
    pub inhibitors_skipped: usize,
}

impl CorrectionReport {
    pub fn grew(&self) -> bool {
        self.hidden_grown > 0
    }
}

impl Circuit {
    /// Bias the circuit toward `label` after `ranking` answered `stimulus` wrongly.
    ///
    /// No-op when the ranking is empty or already right. Sizing problems are
    /// reported before anything is mutated.
    pub fn correct_for(
        &mut self,
        ranking: &Ranking,
        label: usize,
        stimulus: &[f64],
    ) -> CircuitResult<CorrectionReport> {
        let layout = *self.layout();
        if label >= layout.outputs {
            return Err(CircuitError::LabelOutOfRange {
                label,
                outputs: layout.outputs,
            });
        }
        if stimulus.len() > layout.inputs {
            return Err(CircuitError::StimulusTooLong {
                len: stimulus.len(),
                inputs: layout.inputs,
            });
        }

        let predicted = match ranking.top_outcome() {
            None => {
                return Ok(CorrectionReport {
                    outcome: CorrectionOutcome::NoAnswer,
                    ..Default::default()
                })
            }
            Some(top) if top == label => return Ok(CorrectionReport::default()),
            Some(top) => top,
        };
        let (Some(wrong_out), Some(right_out)) =
            (layout.output_unit(predicted), layout.output_unit(label))
        else {
            return Err(CircuitError::LabelOutOfRange {
                label: predicted,
                outputs: layout.outputs,
            });
        };

        // Deep potentials: what each genesis Hidden unit would receive from
        // the inputs this stimulus pushes over threshold.
        let group = layout.group_size()?;
        let step = self.config().correction_step;
        let mut deep = vec![0.0f64; layout.hidden];
        for (input, &value) in stimulus.iter().enumerate() {
            if self.neurons()[input].membrane().would_cross(value) {
                deep[input / group] += step;
            }
        }

        let cap = layout.inhibitor_cap();
        let mut report = CorrectionReport {
            outcome: CorrectionOutcome::Corrected,
            ..Default::default()
        };

        for (offset, &potential) in deep.iter().enumerate() {
            let hidden = layout.inputs + offset;
            if !self.neurons()[hidden].membrane().would_cross(potential) {
                continue;
            }
            let voted_wrong = self.neurons()[hidden]
                .axon()
                .terminal_to(wrong_out)
                .is_some_and(|t| t.polarity.is_excitatory());
            if !voted_wrong {
                continue;
            }

            let sprout = self.grow_neuron(Tier::Hidden);
            self.connect(sprout, right_out, Polarity::Excitatory);
            report.hidden_grown += 1;

            if self.inhibitors_grown() < cap {
                self.connect(hidden, wrong_out, Polarity::Inhibitory);
                self.note_inhibitor();
                report.inhibitors_grown += 1;
            } else {
                report.inhibitors_skipped += 1;
            }
            self.connect(hidden, sprout, Polarity::Excitatory);
        }

        debug!(
            predicted,
            label,
            hidden_grown = report.hidden_grown,
            inhibitors_grown = report.inhibitors_grown,
            inhibitors_skipped = report.inhibitors_skipped,
            "correction applied"
        );
        Ok(report)
    }
}
