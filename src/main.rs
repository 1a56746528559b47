mod experiments;

use sprout::circuit::{CircuitConfig, ExecutionTier};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use experiments::trials::{self, DemoConfig};

fn main() {
    // Logs go to stderr so `--json` output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    let command = args
        .iter()
        .find(|a| !a.starts_with("--") || *a == "--help")
        .map(String::as_str)
        .unwrap_or("circuit-demo");

    let cfg = circuit_config_from_env();
    let demo = DemoConfig {
        seed: cfg.seed.unwrap_or(1),
        ..DemoConfig::default()
    };

    let outcome = match command {
        "--help" | "-h" | "help" => {
            print_help();
            return;
        }
        "circuit-demo" => trials::circuit_demo(cfg, demo).map(|r| {
            if json {
                print_json(&r);
            } else {
                trials::print_circuit_report(&r);
            }
        }),
        "stacked-demo" => trials::stacked_demo(cfg, demo).map(|r| {
            if json {
                print_json(&r);
            } else {
                trials::print_stacked_report(&r);
            }
        }),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    };

    if let Err(e) = outcome {
        error!("{command} failed: {e}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("sprout (structurally-plastic spiking circuits)");
    println!("usage:");
    println!("  cargo run");
    println!("  cargo run -- circuit-demo [--json]");
    println!("  cargo run -- stacked-demo [--json]");
    println!("  cargo run -- --help");
    println!("environment:");
    println!("  SPROUT_EXEC_TIER=scalar|parallel");
    println!("  SPROUT_SEED=<u64>");
    println!("  RUST_LOG=<filter> (default info)");
}

fn print_json<T: serde::Serialize>(report: &T) {
    match serde_json::to_string_pretty(report) {
        Ok(s) => println!("{s}"),
        Err(e) => error!("failed to encode report: {e}"),
    }
}

/// Default config with `SPROUT_EXEC_TIER` / `SPROUT_SEED` applied.
fn circuit_config_from_env() -> CircuitConfig {
    let mut cfg = CircuitConfig::default();

    if let Ok(v) = std::env::var("SPROUT_EXEC_TIER") {
        let requested = match v.trim().to_ascii_lowercase().as_str() {
            "scalar" => Some(ExecutionTier::Scalar),
            "parallel" => Some(ExecutionTier::Parallel),
            _ => {
                warn!("Unknown SPROUT_EXEC_TIER value: {}", v);
                None
            }
        };
        if let Some(t) = requested {
            cfg = cfg.with_execution_tier(t);
            if t.effective() != t {
                warn!(
                    "Requested execution tier {:?} but using {:?} (feature unavailable)",
                    t,
                    t.effective()
                );
            }
        }
    }

    if let Ok(v) = std::env::var("SPROUT_SEED") {
        match v.trim().parse::<u64>() {
            Ok(seed) => cfg = cfg.with_seed(seed),
            Err(_) => warn!("Ignoring SPROUT_SEED={:?}: not an unsigned integer", v),
        }
    }

    cfg
}
