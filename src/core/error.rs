/// Result type for circuit operations.
pub type CircuitResult<T> = Result<T, CircuitError>;

/// Errors raised by circuit growth, exposure and the hierarchical layer.
///
/// Configuration problems are detected before any structure is mutated.
/// A runaway cascade is fatal for the exposure that hit it and is never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitError {
    #[error("invalid circuit sizing: inputs={inputs}, outputs={outputs} (both must be >= 1)")]
    InvalidSizing { inputs: usize, outputs: usize },

    #[error("degenerate hidden partition: {inputs} inputs over {hidden} hidden units")]
    DegeneratePartition { inputs: usize, hidden: usize },

    #[error("stimulus of length {len} exceeds the {inputs} input units")]
    StimulusTooLong { len: usize, inputs: usize },

    #[error("label {label} is outside the {outputs} output units")]
    LabelOutOfRange { label: usize, outputs: usize },

    #[error("chunk length {chunk_length} does not divide stimulus length {stim_length}")]
    ChunkMismatch {
        stim_length: usize,
        chunk_length: usize,
    },

    #[error("length {len} is not a perfect square")]
    NotSquare { len: usize },

    #[error("stimuli of total length {len} are not a whole number of {stim_length}-long samples")]
    RaggedStimuli { len: usize, stim_length: usize },

    #[error("sample of length {len} does not match the {stim_length}-long stimuli of the base circuit")]
    SampleLength { len: usize, stim_length: usize },

    #[error("cascade still active at generation {generation} (limit {limit})")]
    RunawayCascade { generation: u32, limit: u32 },

    #[error("cascade processed {events} events (limit {limit})")]
    EventBudgetExceeded { events: u64, limit: u64 },

    #[error("no circuit named {0:?}")]
    UnknownCircuit(String),

    #[error("circuit {0:?} is not stacked on a base circuit")]
    NotStacked(String),

    #[error("circuit {0:?} has no chunk geometry to stack on")]
    NotChunked(String),

    #[error("circuit {0:?} has no chunks to train on")]
    EmptyTrainingSet(String),
}

impl CircuitError {
    /// True for errors raised by the propagation safety bounds.
    pub fn is_runaway(&self) -> bool {
        matches!(
            self,
            CircuitError::RunawayCascade { .. } | CircuitError::EventBudgetExceeded { .. }
        )
    }
}
