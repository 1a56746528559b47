use sprout::prng::Prng;

/// Shapes the demo circuits learn to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Vertical,
    Horizontal,
    Diagonal,
    Ring,
}

impl Glyph {
    pub const ALL: [Glyph; 4] = [Glyph::Vertical, Glyph::Horizontal, Glyph::Diagonal, Glyph::Ring];

    pub fn label(self) -> usize {
        match self {
            Glyph::Vertical => 0,
            Glyph::Horizontal => 1,
            Glyph::Diagonal => 2,
            Glyph::Ring => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Glyph::Vertical => "vertical",
            Glyph::Horizontal => "horizontal",
            Glyph::Diagonal => "diagonal",
            Glyph::Ring => "ring",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GlyphConfig {
    /// Edge of the square canvas.
    pub side: usize,
    /// Maximum shift of a stroke away from its centred position.
    pub jitter: usize,
    /// Intensity of lit pixels.
    pub ink: f64,
}

impl Default for GlyphConfig {
    fn default() -> Self {
        Self {
            side: 8,
            jitter: 1,
            ink: 1.0,
        }
    }
}

/// Seeded source of labeled glyph images, flattened row by row.
pub struct GlyphSource {
    cfg: GlyphConfig,
    rng: Prng,
}

impl GlyphSource {
    pub fn new(cfg: GlyphConfig, seed: u64) -> Self {
        Self {
            cfg,
            rng: Prng::new(seed),
        }
    }

    pub fn stim_length(&self) -> usize {
        self.cfg.side * self.cfg.side
    }

    pub fn draw(&mut self, glyph: Glyph) -> Vec<f64> {
        let shift = self.rng.gen_range_usize(0, 2 * self.cfg.jitter + 1) as isize;
        render(&self.cfg, glyph, shift - self.cfg.jitter as isize)
    }

    /// `per_glyph` samples of every glyph, interleaved.
    pub fn batch(&mut self, per_glyph: usize) -> Vec<(Vec<f64>, usize)> {
        let mut samples = Vec::with_capacity(per_glyph * Glyph::ALL.len());
        for _ in 0..per_glyph {
            for glyph in Glyph::ALL {
                samples.push((self.draw(glyph), glyph.label()));
            }
        }
        samples
    }
}

fn render(cfg: &GlyphConfig, glyph: Glyph, offset: isize) -> Vec<f64> {
    let side = cfg.side as isize;
    let mid = side / 2;
    let mut px = vec![0.0; cfg.side * cfg.side];
    let mut ink = |row: isize, col: isize| {
        if (0..side).contains(&row) && (0..side).contains(&col) {
            px[(row * side + col) as usize] = cfg.ink;
        }
    };

    match glyph {
        Glyph::Vertical => (1..side - 1).for_each(|row| ink(row, mid + offset)),
        Glyph::Horizontal => (1..side - 1).for_each(|col| ink(mid + offset, col)),
        Glyph::Diagonal => (0..side).for_each(|i| ink(i, i + offset)),
        Glyph::Ring => {
            let (lo, hi) = (2 + offset, side - 3 + offset);
            for i in lo..=hi {
                ink(lo, i);
                ink(hi, i);
                ink(i, lo);
                ink(i, hi);
            }
        }
    }
    px
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_glyphs() {
        let mut a = GlyphSource::new(GlyphConfig::default(), 5);
        let mut b = GlyphSource::new(GlyphConfig::default(), 5);
        assert_eq!(a.batch(3), b.batch(3));
    }

    #[test]
    fn centred_vertical_stroke() {
        let cfg = GlyphConfig::default();
        let px = render(&cfg, Glyph::Vertical, 0);
        assert_eq!(px.len(), 64);
        let lit: Vec<usize> = (0..64).filter(|&i| px[i] > 0.0).collect();
        assert_eq!(lit, vec![12, 20, 28, 36, 44, 52]);
    }

    #[test]
    fn batch_is_labeled_and_interleaved() {
        let mut src = GlyphSource::new(GlyphConfig::default(), 1);
        let labels: Vec<usize> = src.batch(2).into_iter().map(|(_, l)| l).collect();
        assert_eq!(labels, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }
}
