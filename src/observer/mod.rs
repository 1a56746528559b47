use crate::circuit::{Circuit, Diagnostics, TierLayout};
use crate::registry::{Composition, Registry};

#[cfg(feature = "serde")]
use serde::Serialize;

/// A read-only snapshot of a circuit's structure.
///
/// Observers cannot mutate a circuit, and snapshotting never runs an exposure.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CircuitSnapshot {
    pub layout: TierLayout,
    pub diagnostics: Diagnostics,
    /// Inbound slots still free on each Output unit.
    pub output_vacancies: Vec<usize>,
}

pub struct CircuitAdapter<'a> {
    circuit: &'a Circuit,
}

impl<'a> CircuitAdapter<'a> {
    pub fn new(circuit: &'a Circuit) -> Self {
        Self { circuit }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let layout = *self.circuit.layout();
        let output_vacancies = layout
            .output_range()
            .filter_map(|id| self.circuit.neuron(id))
            .map(|n| n.dendrites().len() - n.bound_dendrites())
            .collect();

        CircuitSnapshot {
            layout,
            diagnostics: self.circuit.diagnostics(),
            output_vacancies,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct EntrySnapshot {
    pub id: String,
    /// Discovered chunk vocabulary; None for stacked circuits.
    pub vocabulary: Option<usize>,
    /// Overlap fraction the vocabulary was discovered with.
    pub overlap_threshold: Option<f64>,
    pub chunk_count: usize,
    pub base: Option<String>,
    pub circuit: CircuitSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RegistrySnapshot {
    pub entries: Vec<EntrySnapshot>,
}

pub struct RegistryAdapter<'a> {
    registry: &'a Registry,
}

impl<'a> RegistryAdapter<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Entries sorted by identifier.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| self.registry.entry(id).ok())
            .map(|entry| EntrySnapshot {
                id: entry.id.clone(),
                vocabulary: entry.vocabulary(),
                overlap_threshold: entry.overlap_threshold(),
                chunk_count: match &entry.composition {
                    Composition::Chunked { chunks, .. } => chunks.len(),
                    Composition::Stacked { .. } => 0,
                },
                base: entry.base().map(str::to_owned),
                circuit: CircuitAdapter::new(&entry.circuit).snapshot(),
            })
            .collect();

        RegistrySnapshot { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{CircuitConfig, ExecutionTier};

    #[test]
    fn circuit_snapshot_reports_structure() {
        let c = Circuit::grow(4, 2).unwrap();
        let snap = CircuitAdapter::new(&c).snapshot();
        assert_eq!(snap.layout, TierLayout::new(4, 2).unwrap());
        assert_eq!(snap.diagnostics.unit_count, 9);
        // Three Hidden units feed each Output unit.
        assert_eq!(snap.output_vacancies, vec![12, 12]);
    }

    #[test]
    fn registry_snapshot_lists_entries_in_order() {
        let cfg = CircuitConfig::default().with_execution_tier(ExecutionTier::Scalar);
        let mut r = Registry::with_config(cfg);
        r.grow_circuit("base", 4, 0.5, 16, &[1.0; 16], None).unwrap();
        r.stack("above", "base", 2).unwrap();

        let snap = RegistryAdapter::new(&r).snapshot();
        let ids: Vec<&str> = snap.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["above", "base"]);
        assert_eq!(snap.entries[0].base.as_deref(), Some("base"));
        assert_eq!(snap.entries[0].vocabulary, None);
        assert_eq!(snap.entries[1].vocabulary, Some(1));
        assert_eq!(snap.entries[0].overlap_threshold, None);
        assert_eq!(snap.entries[1].overlap_threshold, Some(0.5));
        assert_eq!(snap.entries[1].chunk_count, 4);
    }
}
