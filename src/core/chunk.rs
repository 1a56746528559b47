//! Chunking for hierarchical composition.
//!
//! A flat, square stimulus is tiled into equal square chunks. Each chunk keeps
//! a map of which positions sit above the chunk's mean intensity, and chunks
//! whose maps overlap spatially are grouped into a shared type. The types form
//! an unsupervised vocabulary of recurring local patterns.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CircuitError, CircuitResult};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Chunk {
    pub mean: f64,
    pub sensations: Vec<f64>,
    /// True where the sensation is strictly above `mean`.
    pub peak_map: Vec<bool>,
    /// Vocabulary type, None until classified.
    pub kind: Option<usize>,
}

impl Chunk {
    pub fn new(sensations: Vec<f64>) -> Self {
        let mean = if sensations.is_empty() {
            0.0
        } else {
            sensations.iter().sum::<f64>() / sensations.len() as f64
        };
        let peak_map = sensations.iter().map(|&p| p - mean > 0.0).collect();
        Self {
            mean,
            sensations,
            peak_map,
            kind: None,
        }
    }

    pub fn len(&self) -> usize {
        self.sensations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensations.is_empty()
    }

    /// Edge length of the (square) chunk.
    pub fn side(&self) -> usize {
        isqrt(self.sensations.len())
    }

    pub fn peak_count(&self) -> usize {
        self.peak_map.iter().filter(|&&p| p).count()
    }

    /// Fraction of this chunk's peaks that find a peak of `other` within their
    /// 3x3 neighbourhood.
    ///
    /// A chunk without peaks overlaps fully with another peakless chunk and
    /// not at all with anything else.
    pub fn overlap_with(&self, other: &Chunk) -> f64 {
        let side = self.side();
        let mut features = 0usize;
        let mut matched = 0usize;

        for (index, &peak) in self.peak_map.iter().enumerate() {
            if !peak {
                continue;
            }
            features += 1;
            let (row, col) = ((index / side) as isize, (index % side) as isize);
            let found = NEIGHBOURHOOD.iter().any(|&(dr, dc)| {
                let (r, c) = (row + dr, col + dc);
                if r < 0 || c < 0 || r >= side as isize || c >= side as isize {
                    return false;
                }
                let idx = r as usize * side + c as usize;
                other.peak_map.get(idx).copied().unwrap_or(false)
            });
            if found {
                matched += 1;
            }
        }

        if features == 0 {
            return if other.peak_count() == 0 { 1.0 } else { 0.0 };
        }
        matched as f64 / features as f64
    }
}

// Row above, same row, row below; each at column -1, 0, +1.
const NEIGHBOURHOOD: [(isize, isize); 9] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 0),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

fn isqrt(n: usize) -> usize {
    let mut r = (n as f64).sqrt() as usize;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    r
}

fn square_side(len: usize) -> CircuitResult<usize> {
    let side = isqrt(len);
    if side * side != len || len == 0 {
        return Err(CircuitError::NotSquare { len });
    }
    Ok(side)
}

/// Geometry shared by every sample of a segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChunkGeometry {
    pub stim_length: usize,
    pub chunk_length: usize,
    pub stim_side: usize,
    pub chunk_side: usize,
}

impl ChunkGeometry {
    pub fn new(stim_length: usize, chunk_length: usize) -> CircuitResult<Self> {
        if chunk_length == 0 || stim_length % chunk_length != 0 {
            return Err(CircuitError::ChunkMismatch {
                stim_length,
                chunk_length,
            });
        }
        let stim_side = square_side(stim_length)?;
        let chunk_side = square_side(chunk_length)?;
        if stim_side % chunk_side != 0 {
            return Err(CircuitError::ChunkMismatch {
                stim_length,
                chunk_length,
            });
        }
        Ok(Self {
            stim_length,
            chunk_length,
            stim_side,
            chunk_side,
        })
    }

    pub fn chunks_per_side(&self) -> usize {
        self.stim_side / self.chunk_side
    }

    pub fn chunks_per_stimulus(&self) -> usize {
        self.stim_length / self.chunk_length
    }

    /// Tile `stimuli` (one or more samples laid end to end) into chunks,
    /// sample by sample, chunk rows top to bottom, chunks left to right.
    pub fn segment(&self, stimuli: &[f64]) -> CircuitResult<Vec<Chunk>> {
        if stimuli.len() % self.stim_length != 0 {
            return Err(CircuitError::RaggedStimuli {
                len: stimuli.len(),
                stim_length: self.stim_length,
            });
        }

        let per_side = self.chunks_per_side();
        let cs = self.chunk_side;
        let mut chunks = Vec::with_capacity(stimuli.len() / self.chunk_length);
        for sample in stimuli.chunks_exact(self.stim_length) {
            for chunk_row in 0..per_side {
                for chunk_col in 0..per_side {
                    let mut sensations = Vec::with_capacity(self.chunk_length);
                    for y in 0..cs {
                        let start = (chunk_row * cs + y) * self.stim_side + chunk_col * cs;
                        sensations.extend_from_slice(&sample[start..start + cs]);
                    }
                    chunks.push(Chunk::new(sensations));
                }
            }
        }
        Ok(chunks)
    }
}

/// Assign a vocabulary type to every chunk; returns the vocabulary size.
///
/// Chunks are visited in order. A chunk adopts the type of any other, already
/// typed chunk it overlaps by more than `threshold` (the last such chunk wins),
/// and otherwise opens a new type.
pub fn classify(chunks: &mut [Chunk], threshold: f64) -> usize {
    let mut types = 0;
    for i in 0..chunks.len() {
        for n in 0..chunks.len() {
            if i == n {
                continue;
            }
            if chunks[i].overlap_with(&chunks[n]) > threshold {
                if let Some(kind) = chunks[n].kind {
                    chunks[i].kind = Some(kind);
                }
            }
        }

        if chunks[i].kind.is_none() {
            chunks[i].kind = Some(types);
            types += 1;
        }
    }
    trace!(chunks = chunks.len(), types, "chunk vocabulary discovered");
    types
}

/// Segment and classify in one step.
pub fn discover(
    stimuli: &[f64],
    geometry: &ChunkGeometry,
    threshold: f64,
) -> CircuitResult<(usize, Vec<Chunk>)> {
    let mut chunks = geometry.segment(stimuli)?;
    let types = classify(&mut chunks, threshold);
    Ok((types, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(side: usize, col: usize) -> Chunk {
        let mut s = vec![0.0; side * side];
        for row in 0..side {
            s[row * side + col] = 1.0;
        }
        Chunk::new(s)
    }

    #[test]
    fn peak_map_marks_strictly_above_mean() {
        let c = Chunk::new(vec![0.0, 1.0, 0.5, 0.5]);
        assert_eq!(c.mean, 0.5);
        assert_eq!(c.peak_map, vec![false, true, false, false]);
        assert_eq!(c.kind, None);
        assert_eq!(c.side(), 2);
    }

    #[test]
    fn segment_tiles_square_chunks_in_row_major_order() {
        let g = ChunkGeometry::new(16, 4).unwrap();
        let stimuli: Vec<f64> = (0..32).map(|v| v as f64).collect();
        let chunks = g.segment(&stimuli).unwrap();

        assert_eq!(chunks.len(), 8);
        assert_eq!(chunks[0].sensations, vec![0.0, 1.0, 4.0, 5.0]);
        assert_eq!(chunks[1].sensations, vec![2.0, 3.0, 6.0, 7.0]);
        assert_eq!(chunks[2].sensations, vec![8.0, 9.0, 12.0, 13.0]);
        assert_eq!(chunks[3].sensations, vec![10.0, 11.0, 14.0, 15.0]);
        assert_eq!(chunks[4].sensations, vec![16.0, 17.0, 20.0, 21.0]);
    }

    #[test]
    fn segment_handles_more_than_two_chunks_per_side() {
        let g = ChunkGeometry::new(36, 4).unwrap();
        assert_eq!(g.chunks_per_side(), 3);
        let stimuli: Vec<f64> = (0..36).map(|v| v as f64).collect();
        let chunks = g.segment(&stimuli).unwrap();
        assert_eq!(chunks.len(), 9);
        assert_eq!(chunks[4].sensations, vec![14.0, 15.0, 20.0, 21.0]);
        assert_eq!(chunks[8].sensations, vec![28.0, 29.0, 34.0, 35.0]);
    }

    #[test]
    fn geometry_rejects_bad_sizes() {
        assert_eq!(
            ChunkGeometry::new(16, 3).unwrap_err(),
            CircuitError::ChunkMismatch {
                stim_length: 16,
                chunk_length: 3
            }
        );
        assert!(ChunkGeometry::new(16, 0).is_err());
        assert_eq!(
            ChunkGeometry::new(8, 4).unwrap_err(),
            CircuitError::NotSquare { len: 8 }
        );
        assert_eq!(
            ChunkGeometry::new(16, 2).unwrap_err(),
            CircuitError::NotSquare { len: 2 }
        );

        let g = ChunkGeometry::new(16, 4).unwrap();
        assert!(matches!(
            g.segment(&[0.0; 20]),
            Err(CircuitError::RaggedStimuli { len: 20, stim_length: 16 })
        ));
    }

    #[test]
    fn identical_chunks_overlap_fully() {
        let a = column(3, 1);
        let b = column(3, 1);
        assert_eq!(a.overlap_with(&b), 1.0);
        assert_eq!(b.overlap_with(&a), 1.0);
    }

    #[test]
    fn overlap_tolerates_one_position_of_shift() {
        assert_eq!(column(3, 0).overlap_with(&column(3, 1)), 1.0);
        assert_eq!(column(3, 0).overlap_with(&column(3, 2)), 0.0);
        assert_eq!(column(4, 0).overlap_with(&column(4, 3)), 0.0);
    }

    #[test]
    fn overlap_does_not_wrap_across_rows() {
        // Peak at the end of row 0 must not see the start of row 1.
        let mut a = vec![0.0; 9];
        a[2] = 1.0;
        let mut b = vec![0.0; 9];
        b[3] = 1.0;
        assert_eq!(Chunk::new(a).overlap_with(&Chunk::new(b)), 0.0);
    }

    #[test]
    fn peakless_chunks() {
        let flat = Chunk::new(vec![0.3; 4]);
        assert_eq!(flat.overlap_with(&Chunk::new(vec![0.7; 4])), 1.0);
        assert_eq!(flat.overlap_with(&column(2, 0)), 0.0);
    }

    #[test]
    fn classify_groups_identical_chunks() {
        let mut chunks = vec![column(3, 0), column(3, 2), column(3, 0), column(3, 2)];
        let types = classify(&mut chunks, 0.6);

        assert_eq!(types, 2);
        assert_eq!(chunks[0].kind, chunks[2].kind);
        assert_eq!(chunks[1].kind, chunks[3].kind);
        assert_ne!(chunks[0].kind, chunks[1].kind);
    }

    #[test]
    fn discover_segments_then_classifies() {
        let g = ChunkGeometry::new(36, 9).unwrap();
        // Outer columns bright: left chunks alike, right chunks alike.
        let mut stimulus = vec![0.0; 36];
        for row in 0..6 {
            stimulus[row * 6] = 1.0;
            stimulus[row * 6 + 5] = 1.0;
        }
        let (types, chunks) = discover(&stimulus, &g, 0.6).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(types, 2);
        assert_eq!(chunks[0].kind, chunks[2].kind);
        assert_eq!(chunks[1].kind, chunks[3].kind);
    }
}
