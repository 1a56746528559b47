use serde::Serialize;
use tracing::info;

use sprout::circuit::{Circuit, CircuitConfig};
use sprout::error::CircuitResult;
use sprout::observer::{CircuitAdapter, CircuitSnapshot, RegistryAdapter, RegistrySnapshot};
use sprout::registry::{train_circuit, Registry, TrainingConfig, TrainingReport, TrialStats};

use super::glyphs::{Glyph, GlyphConfig, GlyphSource};

#[derive(Debug, Clone, Copy)]
pub struct DemoConfig {
    pub seed: u64,
    pub train_per_glyph: usize,
    pub test_per_glyph: usize,
    pub training: TrainingConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            train_per_glyph: 6,
            test_per_glyph: 4,
            training: TrainingConfig::default().with_max_epochs(40),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitDemoReport {
    pub seed: u64,
    pub glyphs: Vec<&'static str>,
    pub training: TrainingReport,
    pub test: TrialStats,
    pub circuit: CircuitSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackedDemoReport {
    pub seed: u64,
    pub vocabulary: usize,
    pub base_training: Option<TrainingReport>,
    pub stacked_training: TrainingReport,
    pub test: TrialStats,
    pub registry: RegistrySnapshot,
}

fn glyph_names() -> Vec<&'static str> {
    Glyph::ALL.iter().map(|g| g.name()).collect()
}

/// Expose-then-correct over the flat glyph images, one circuit for the whole canvas.
pub fn circuit_demo(cfg: CircuitConfig, demo: DemoConfig) -> CircuitResult<CircuitDemoReport> {
    let mut source = GlyphSource::new(GlyphConfig::default(), demo.seed);
    let train = source.batch(demo.train_per_glyph);
    let test = source.batch(demo.test_per_glyph);

    let mut circuit = Circuit::grow_with(source.stim_length(), Glyph::ALL.len(), cfg)?;
    let training = train_circuit("glyphs", &mut circuit, &train, demo.training)?;

    let test = evaluate(&test, |stimulus| circuit.expose(stimulus))?;
    Ok(CircuitDemoReport {
        seed: demo.seed,
        glyphs: glyph_names(),
        training,
        test,
        circuit: CircuitAdapter::new(&circuit).snapshot(),
    })
}

/// Chunk the glyphs, learn a chunk vocabulary, then stack a glyph classifier
/// on top of the chunk circuit's answers.
pub fn stacked_demo(cfg: CircuitConfig, demo: DemoConfig) -> CircuitResult<StackedDemoReport> {
    const BASE: &str = "glyph-chunks";
    const STACKED: &str = "glyph-stack";

    let mut source = GlyphSource::new(GlyphConfig::default(), demo.seed);
    let train = source.batch(demo.train_per_glyph);
    let test = source.batch(demo.test_per_glyph);
    let stimuli: Vec<f64> = train.iter().flat_map(|(s, _)| s.iter().copied()).collect();

    let mut registry = Registry::with_config(cfg);
    let grown = registry.grow_circuit(
        BASE,
        16,
        0.6,
        source.stim_length(),
        &stimuli,
        Some(demo.training),
    )?;
    info!(vocabulary = grown.vocabulary, chunks = grown.chunks.len(), "chunk vocabulary");

    registry.stack(STACKED, BASE, Glyph::ALL.len())?;
    let stacked_training = registry.train_stacked(STACKED, &train, demo.training)?;

    let test = evaluate(&test, |stimulus| {
        registry.expose(STACKED, stimulus).map(|(_, ranking)| ranking)
    })?;
    Ok(StackedDemoReport {
        seed: demo.seed,
        vocabulary: grown.vocabulary,
        base_training: grown.training,
        stacked_training,
        test,
        registry: RegistryAdapter::new(&registry).snapshot(),
    })
}

fn evaluate<F>(samples: &[(Vec<f64>, usize)], mut classify: F) -> CircuitResult<TrialStats>
where
    F: FnMut(&[f64]) -> CircuitResult<sprout::circuit::Ranking>,
{
    let mut stats = TrialStats::default();
    for (stimulus, label) in samples {
        stats.record(&classify(stimulus)?, *label);
    }
    Ok(stats)
}

pub fn print_circuit_report(r: &CircuitDemoReport) {
    println!("circuit-demo (seed={})", r.seed);
    println!("  glyphs: {}", r.glyphs.join(", "));
    print_training("training", &r.training);
    print_trials("test", &r.test);
    let d = &r.circuit.diagnostics;
    println!(
        "  units={} (grown hidden={}) conns={} bound={} inhibitors={}/{}",
        d.unit_count,
        d.grown_hidden,
        d.connection_count,
        d.bound_connections,
        d.inhibitors_grown,
        d.inhibitor_cap
    );
}

pub fn print_stacked_report(r: &StackedDemoReport) {
    println!("stacked-demo (seed={})", r.seed);
    println!("  chunk vocabulary: {}", r.vocabulary);
    if let Some(base) = &r.base_training {
        print_training("base training", base);
    }
    print_training("stacked training", &r.stacked_training);
    print_trials("test", &r.test);
    for e in &r.registry.entries {
        println!(
            "  {:<14} units={:<5} conns={:<5} base={}",
            e.id,
            e.circuit.diagnostics.unit_count,
            e.circuit.diagnostics.connection_count,
            e.base.as_deref().unwrap_or("-")
        );
    }
}

fn print_training(name: &str, t: &TrainingReport) {
    println!(
        "  {name}: epochs={} accuracy={:.3} converged={} grown hidden={}",
        t.epochs, t.accuracy, t.converged, t.hidden_grown
    );
}

fn print_trials(name: &str, s: &TrialStats) {
    println!(
        "  {name}: presented={} answered={:.3} accuracy={:.3}",
        s.presented,
        s.answer_rate(),
        s.accuracy()
    );
}
