//! Client for the external density computation engine.
//!
//! The engine is a black box: it reads a graph protocol file and answers
//! with a text blob whose first line is a header and whose every further
//! line reads `a b c value`. Only `value` is consumed, in line order.

use crate::config::NkdvConfig;
use crate::error::EngineError;
use std::path::{Path, PathBuf};
use std::process::Command;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::time::Instant;
use tracing::{debug, info};

/// Scalar settings handed to the engine alongside the graph file.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub bandwidth: f64,
    pub lixel_length: f64,
    pub method: u32,
    pub kernel_type: u32,
    /// Where the engine may write its own copy of the results. Defaults to
    /// `results/<graph file name>_M<method>_K<kernel>`.
    pub out_name: Option<String>,
}

impl From<&NkdvConfig> for EngineConfig {
    fn from(config: &NkdvConfig) -> Self {
        Self {
            bandwidth: config.bandwidth,
            lixel_length: config.lixel_length,
            method: config.method,
            kernel_type: config.kernel_type,
            out_name: None,
        }
    }
}

impl EngineConfig {
    pub fn out_name_for(&self, graph_path: &Path) -> String {
        match &self.out_name {
            Some(name) => name.clone(),
            None => {
                let stem = graph_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "graph".to_string());
                format!("results/{}_M{}_K{}", stem, self.method, self.kernel_type)
            }
        }
    }

    /// Engine arguments after the program name:
    /// `<graph> <out_name> <method> <lixel_length> <kernel_type> <bandwidth>`.
    pub fn args(&self, graph_path: &Path) -> Vec<String> {
        vec![
            graph_path.to_string_lossy().into_owned(),
            self.out_name_for(graph_path),
            self.method.to_string(),
            self.lixel_length.to_string(),
            self.kernel_type.to_string(),
            self.bandwidth.to_string(),
        ]
    }
}

/// A density engine invocation. Blocks until the engine is done; there is no
/// partial result and no way to interrupt it. A cancelled run is abandoned
/// once the engine returns.
pub trait DensityEngine: Send + Sync {
    fn run(&self, graph_path: &Path, config: &EngineConfig) -> Result<String, EngineError>;
}

/// Engine running as a separate executable; the blob is its stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DensityEngine for CommandEngine {
    fn run(&self, graph_path: &Path, config: &EngineConfig) -> Result<String, EngineError> {
        let args = config.args(graph_path);
        debug!(program = %self.program.display(), ?args, "Launching density engine");

        let mut command = Command::new(&self.program);
        command.args(&args);
        // own process group: a terminal Ctrl-C reaches linden, not the engine
        #[cfg(unix)]
        command.process_group(0);

        let output = command
            .output()
            .map_err(|source| EngineError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| EngineError::NotUtf8)
    }
}

pub struct DensityEngineClient {
    engine: Box<dyn DensityEngine>,
}

impl DensityEngineClient {
    pub fn new(engine: impl DensityEngine + 'static) -> Self {
        Self {
            engine: Box::new(engine),
        }
    }

    /// Run the engine on `graph_path` and return one value per output lixel,
    /// in engine order.
    pub fn compute(&self, graph_path: &Path, config: &EngineConfig) -> Result<Vec<f64>, EngineError> {
        let start = Instant::now();
        let blob = self.engine.run(graph_path, config)?;
        let values = parse_result_blob(&blob)?;
        info!(
            values = values.len(),
            duration = ?start.elapsed(),
            "Density engine finished"
        );
        Ok(values)
    }
}

/// Extract the fourth field of every line after the header.
pub fn parse_result_blob(blob: &str) -> Result<Vec<f64>, EngineError> {
    let mut lines = blob.lines().enumerate();
    if lines.next().is_none() {
        return Err(EngineError::UnparseableResult {
            line: 1,
            reason: "empty result".to_string(),
        });
    }

    let mut values = Vec::new();
    for (idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(EngineError::UnparseableResult {
                line: idx + 1,
                reason: format!("expected 4 fields, got {}: '{}'", fields.len(), line),
            });
        }
        let value = fields[3]
            .parse::<f64>()
            .map_err(|_| EngineError::UnparseableResult {
                line: idx + 1,
                reason: format!("'{}' is not a number", fields[3]),
            })?;
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_come_from_fourth_column_in_line_order() {
        let blob = "header line\n0 1 0 0.5\n0 1 1 0.25\n1 2 0 3e-2\n";
        assert_eq!(parse_result_blob(blob).unwrap(), vec![0.5, 0.25, 0.03]);
    }

    #[test]
    fn header_only_means_no_values() {
        assert!(parse_result_blob("6\n").unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_errors_not_zeros() {
        let err = parse_result_blob("h\n0 1 0 0.5\n0 1 oops\n").unwrap_err();
        assert!(matches!(err, EngineError::UnparseableResult { line: 3, .. }));

        let err = parse_result_blob("h\n0 1 0 abc\n").unwrap_err();
        assert!(matches!(err, EngineError::UnparseableResult { line: 2, .. }));

        assert!(parse_result_blob("").is_err());
    }

    #[test]
    fn engine_arguments_follow_positional_layout() {
        let config = EngineConfig {
            bandwidth: 500.0,
            lixel_length: 20.0,
            method: 3,
            kernel_type: 2,
            out_name: None,
        };
        assert_eq!(
            config.args(Path::new("/tmp/run/graph_output")),
            vec![
                "/tmp/run/graph_output",
                "results/graph_output_M3_K2",
                "3",
                "20",
                "2",
                "500"
            ]
        );
    }

    struct Canned(&'static str);

    impl DensityEngine for Canned {
        fn run(&self, _graph_path: &Path, _config: &EngineConfig) -> Result<String, EngineError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn client_parses_engine_output() {
        let client = DensityEngineClient::new(Canned("n\n0 1 0 1.5\n0 1 1 2.5\n"));
        let config = EngineConfig::from(&NkdvConfig::default());
        let values = client.compute(Path::new("graph_output"), &config).unwrap();
        assert_eq!(values, vec![1.5, 2.5]);
    }

    /// Process group id of the current process, from `/proc/self/stat`.
    #[cfg(target_os = "linux")]
    fn own_process_group() -> f64 {
        let stat = std::fs::read_to_string("/proc/self/stat").unwrap();
        let after_comm = &stat[stat.rfind(')').unwrap() + 1..];
        // state ppid pgrp ...
        after_comm.split_whitespace().nth(2).unwrap().parse().unwrap()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn command_engine_runs_in_its_own_process_group() {
        let dir = tempfile::tempdir().unwrap();
        // `sh <graph file> ...`: the graph file doubles as the script
        let script = dir.path().join("graph_output");
        std::fs::write(
            &script,
            "read -r pid comm state ppid pgrp rest < /proc/$$/stat\necho header\necho \"0 0 0 $pgrp\"\n",
        )
        .unwrap();

        let client = DensityEngineClient::new(CommandEngine::new("/bin/sh"));
        let config = EngineConfig::from(&NkdvConfig::default());
        let values = client.compute(&script, &config).unwrap();

        assert_eq!(values.len(), 1);
        assert_ne!(values[0], own_process_group());
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_reports_launch_failures() {
        let engine = CommandEngine::new("/nonexistent/nkdv-engine");
        let config = EngineConfig::from(&NkdvConfig::default());
        let err = engine.run(Path::new("graph_output"), &config).unwrap_err();
        assert!(matches!(err, EngineError::Launch { .. }));
    }
}
