//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is a LogLine record. After EOF the whole batch is
//! tokenized, grouped, scored, and classified. Output lines are:
//! - One RootCausePrediction per ranked prediction
//! - A final SummaryReport
//! - An ErrorOutput for each input line that fails to parse

use std::io::{self, BufRead, Write};

use rootcause_engine::types::ErrorOutput;
use rootcause_engine::{EngineConfig, LogLine, Pipeline, RootCauseAnalysisEngine};

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  let mut pipeline = match Pipeline::new(EngineConfig::default()) {
    Ok(p) => p,
    Err(e) => {
      let _ = writeln!(io::stderr(), "rootcause-engine: {}", e);
      std::process::exit(1);
    }
  };
  let engine = match RootCauseAnalysisEngine::new(EngineConfig::default()) {
    Ok(e) => e,
    Err(e) => {
      let _ = writeln!(io::stderr(), "rootcause-engine: {}", e);
      std::process::exit(1);
    }
  };

  let mut lines: Vec<LogLine> = Vec::new();
  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        let _ = writeln!(io::stderr(), "rootcause-engine: read error: {}", e);
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    match serde_json::from_str::<LogLine>(trimmed) {
      Ok(record) => lines.push(record),
      Err(e) => {
        let err = ErrorOutput::new(format!("json parse: {}", e));
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
      }
    }
  }

  let output = pipeline.process(&lines);
  let predictions = engine.analyze(&output.segments);

  for prediction in &predictions {
    let _ = serde_json::to_writer(&mut out, prediction);
    let _ = writeln!(out);
  }
  let report = engine.summary_report(&predictions);
  let _ = serde_json::to_writer(&mut out, &report);
  let _ = writeln!(out);

  let _ = out.flush();
}
