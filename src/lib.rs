//! Structurally-plastic spiking circuits.
//!
//! A circuit grows Input, Hidden and Output tiers, turns a stimulus into a
//! ranked readout by letting activation cascade to quiescence, and learns only
//! by growing new units and connections when it answers wrongly. The
//! [`registry`] layer composes circuits over chunked stimuli.

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/neuron.rs"]
pub mod neuron;

#[path = "core/axon.rs"]
pub mod axon;

#[path = "core/circuit.rs"]
pub mod circuit;

#[path = "core/propagation.rs"]
pub mod propagation;

#[path = "core/correction.rs"]
pub mod correction;

#[path = "core/chunk.rs"]
pub mod chunk;

#[path = "core/registry.rs"]
pub mod registry;

pub mod observer;

pub mod prelude {
    pub use crate::axon::{Polarity, PolarityPolicy};
    pub use crate::chunk::{Chunk, ChunkGeometry};
    pub use crate::circuit::{
        Circuit, CircuitConfig, Diagnostics, ExecutionTier, Exposure, RankedResult, Ranking,
        TierLayout,
    };
    pub use crate::correction::{CorrectionOutcome, CorrectionReport};
    pub use crate::error::{CircuitError, CircuitResult};
    pub use crate::neuron::{MembraneConfig, Tier};
    pub use crate::propagation::ExposureStats;
    pub use crate::registry::{Registry, TrainingConfig, TrainingReport, TrialStats};
}
