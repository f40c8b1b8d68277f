use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use extrema::functions::solve::SolverConfig;
use extrema::response::Request;
use extrema::{respond, server};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(flatten)]
  solver: SolverArgs,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Print gradient, critical points, Hessian and classifications as JSON
  Analyze {
    /// The function to analyze, e.g. "x^2 + y^2"
    function: String,

    /// Search interval as `min,max`. Give it once for every variable or
    /// once per variable, in order of first occurrence.
    #[arg(
      long = "domain",
      value_parser = parse_interval,
      allow_hyphen_values = true
    )]
    domain: Vec<[f64; 2]>,

    /// Pretty-print the JSON reply
    #[arg(long)]
    pretty: bool,
  },
  /// Serve `POST /find_extrema`
  Serve {
    #[arg(long, env = "EXTREMA_ADDR", default_value = "127.0.0.1:5000")]
    addr: SocketAddr,
  },
}

/// Solver overrides. Anything left unset keeps its built-in default.
#[derive(Args)]
struct SolverArgs {
  /// Gradient norm that counts as zero
  #[arg(long, global = true, env = "EXTREMA_TOLERANCE")]
  tolerance: Option<f64>,

  /// Distance under which two critical points are merged
  #[arg(long, global = true, env = "EXTREMA_MERGE_TOLERANCE")]
  merge_tolerance: Option<f64>,

  /// Newton steps per start point
  #[arg(long, global = true, env = "EXTREMA_MAX_ITERATIONS")]
  max_iterations: Option<usize>,

  /// Grid points per axis for the start points
  #[arg(long, global = true, env = "EXTREMA_GRID")]
  grid: Option<usize>,

  /// Maximum number of start points
  #[arg(long, global = true, env = "EXTREMA_MAX_SEEDS")]
  max_seeds: Option<usize>,

  /// Wall-clock budget of one search in milliseconds
  #[arg(long, global = true, env = "EXTREMA_TIME_BUDGET_MS")]
  time_budget_ms: Option<u64>,

  /// Seed for the pseudo-random start points
  #[arg(long, global = true, env = "EXTREMA_SEED")]
  seed: Option<u64>,
}

impl SolverArgs {
  fn into_config(self) -> SolverConfig {
    let mut config = SolverConfig::default();
    if let Some(tolerance) = self.tolerance {
      config.tolerance = tolerance;
    }
    if let Some(merge_tolerance) = self.merge_tolerance {
      config.merge_tolerance = merge_tolerance;
    }
    if let Some(max_iterations) = self.max_iterations {
      config.max_iterations = max_iterations;
    }
    if let Some(grid) = self.grid {
      config.grid_points_per_axis = grid;
    }
    if let Some(max_seeds) = self.max_seeds {
      config.max_seeds = max_seeds;
    }
    if let Some(ms) = self.time_budget_ms {
      config.time_budget = Duration::from_millis(ms);
    }
    if let Some(seed) = self.seed {
      config.rng_seed = seed;
    }
    config
  }
}

fn parse_interval(text: &str) -> Result<[f64; 2], String> {
  let (min, max) = text
    .split_once(',')
    .ok_or_else(|| format!("expected `min,max`, got {text:?}"))?;
  let parse = |part: &str| {
    part
      .trim()
      .parse::<f64>()
      .map_err(|err| format!("{part:?}: {err}"))
  };
  Ok([parse(min)?, parse(max)?])
}

fn install_tracing(default_level: &str) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_level));
  let fmt_layer = fmt::layer()
    .with_target(false)
    .with_writer(std::io::stderr);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt_layer)
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = cli.solver.into_config();

  match cli.command {
    Commands::Analyze {
      function,
      domain,
      pretty,
    } => {
      install_tracing("warn");
      let mut request = Request::new(function);
      if !domain.is_empty() {
        request = request.with_domain(domain);
      }
      let response = respond(&request, &config);
      if pretty {
        println!("{}", response.to_json_pretty());
      } else {
        println!("{}", response.to_json());
      }
      if response.is_failure() {
        std::process::exit(1);
      }
      Ok(())
    }
    Commands::Serve { addr } => {
      install_tracing("info");
      server::run(addr, config)
    }
  }
}
