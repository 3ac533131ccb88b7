//! Docker adapter driven through the `docker` command-line client.
//!
//! Containers are started detached with a keepalive shell loop, sampled with
//! a one-shot `docker stats`, and torn down with `docker rm -f`.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Backend, BenchError, ContainerApi, ContainerStats, ExecOutcome};

/// Exit code reported when the exec client was killed or never started.
const EXIT_UNKNOWN: i32 = -1;

/// Unit suffixes `docker stats` prints, longest first so `KiB` wins over `B`.
const BYTE_UNITS: &[(&str, u64)] = &[
    ("kib", 1 << 10),
    ("mib", 1 << 20),
    ("gib", 1 << 30),
    ("tib", 1 << 40),
    ("kb", 1_000),
    ("mb", 1_000_000),
    ("gb", 1_000_000_000),
    ("tb", 1_000_000_000_000),
    ("b", 1),
];

/// Fractional digits beyond this cannot change a whole-byte result.
const MAX_FRACTION_DIGITS: usize = 15;

/// CLI adapter for a local Docker runtime.
#[derive(Debug, Clone)]
pub(crate) struct DockerCli {
    binary: PathBuf,
    shell: String,
}

/// One line of `docker stats --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct StatsLine {
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
}

impl DockerCli {
    /// Resolves `docker` from `PATH`. `shell` defaults to `sh` when blank.
    pub fn locate(shell: &str) -> Result<Self, BenchError> {
        let binary = which::which("docker")
            .map_err(|e| BenchError::backend_unavailable("docker", e.to_string()))?;
        Ok(Self::with_binary(binary, shell))
    }

    /// Uses an explicit client binary.
    pub fn with_binary(binary: impl Into<PathBuf>, shell: &str) -> Self {
        let shell = shell.trim();
        Self {
            binary: binary.into(),
            shell: if shell.is_empty() { "sh" } else { shell }.to_string(),
        }
    }

    async fn output(&self, args: &[&str]) -> Result<Output, BenchError> {
        debug!("docker {}", args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BenchError::transport(format!("failed to run docker {}: {e}", args[0])))
    }

    /// Runs a docker subcommand that must succeed, returning trimmed stdout.
    async fn checked(&self, args: &[&str]) -> Result<String, BenchError> {
        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BenchError::transport(format!(
                "docker {} exited with {:?}: {}",
                args[0],
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Backend for DockerCli {
    type Snapshot = ContainerStats;

    fn name(&self) -> &'static str {
        "docker"
    }

    async fn sample(&self, id: &str) -> Result<ContainerStats, BenchError> {
        let raw = self
            .checked(&["stats", "--no-stream", "--format", "{{json .}}", id])
            .await?;
        parse_stats_line(id, &raw)
    }

    async fn exec(&self, id: &str, cmd: &str, timeout_ms: u64) -> Result<ExecOutcome, BenchError> {
        let limit = Duration::from_millis(timeout_ms);
        let start = Instant::now();
        let spawned = Command::new(&self.binary)
            .args(["exec", id, self.shell.as_str(), "-lc", cmd])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let exit_code = match spawned {
            Err(e) => {
                warn!("Failed to start docker exec: {}", e);
                EXIT_UNKNOWN
            }
            Ok(mut child) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(Ok(status)) => status.code().unwrap_or(EXIT_UNKNOWN),
                Ok(Err(e)) => {
                    warn!("Waiting on docker exec failed: {}", e);
                    EXIT_UNKNOWN
                }
                Err(_) => {
                    debug!("docker exec exceeded {}ms, killing client", timeout_ms);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    EXIT_UNKNOWN
                }
            },
        };

        Ok(ExecOutcome {
            exit_code,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn destroy(&self, id: &str) -> Result<(), BenchError> {
        self.checked(&["rm", "-f", id]).await.map(drop)
    }
}

#[async_trait]
impl ContainerApi for DockerCli {
    async fn run_container(
        &self,
        image: &str,
        keepalive: &str,
    ) -> Result<(String, Duration), BenchError> {
        let start = Instant::now();
        let id = self
            .checked(&["run", "-d", "--rm", image, self.shell.as_str(), "-lc", keepalive])
            .await?;
        if id.is_empty() {
            return Err(BenchError::protocol("docker returned empty container id"));
        }
        Ok((id, start.elapsed()))
    }
}

/// Parses a `docker stats` JSON line into a snapshot.
///
/// Unparseable memory or CPU fields (docker prints `--` for stopped
/// containers) read as zero.
fn parse_stats_line(id: &str, raw: &str) -> Result<ContainerStats, BenchError> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(line) = line else {
        return Err(BenchError::protocol(format!(
            "empty docker stats output for {id}"
        )));
    };
    let parsed: StatsLine = serde_json::from_str(line)
        .map_err(|e| BenchError::protocol(format!("malformed docker stats for {id}: {e}")))?;

    let memory_bytes = parse_human_bytes(first_part(&parsed.mem_usage, '/')).unwrap_or_else(|e| {
        debug!("Unparseable MemUsage {:?}: {}", parsed.mem_usage, e);
        0
    });
    let cpu_percent = parse_percent(&parsed.cpu_perc).unwrap_or_else(|e| {
        debug!("Unparseable CPUPerc {:?}: {}", parsed.cpu_perc, e);
        0.0
    });
    Ok(ContainerStats {
        memory_bytes,
        cpu_percent,
    })
}

/// Returns the trimmed text before the first `sep`.
fn first_part(value: &str, sep: char) -> &str {
    value
        .split_once(sep)
        .map_or(value, |(head, _)| head)
        .trim()
}

/// Parses a percentage such as `"12.5%"`.
pub(crate) fn parse_percent(value: &str) -> Result<f64, BenchError> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    number
        .parse::<f64>()
        .map_err(|e| BenchError::protocol(format!("invalid percentage {value:?}: {e}")))
}

/// Parses a human-readable size such as `"12.5MiB"` or `"3kB"` into bytes.
///
/// Base-10 and base-2 suffixes are taken literally. A bare number is bytes;
/// an empty string is zero. The product is rounded toward zero, computed in
/// integers so `"2.01kB"` is exactly 2010.
pub(crate) fn parse_human_bytes(value: &str) -> Result<u64, BenchError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(0);
    }
    let lower = compact.to_ascii_lowercase();

    let (number, multiplier) = BYTE_UNITS
        .iter()
        .find_map(|(unit, mult)| {
            lower
                .strip_suffix(unit)
                .map(|_| (&compact[..compact.len() - unit.len()], *mult))
        })
        .unwrap_or((compact.as_str(), 1));

    scale_decimal(number, multiplier)
        .ok_or_else(|| BenchError::protocol(format!("invalid size {value:?}")))
}

/// Multiplies a non-negative decimal literal by `multiplier`, truncating.
fn scale_decimal(number: &str, multiplier: u64) -> Option<u64> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits(whole) || !digits(fraction) {
        return None;
    }

    let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let numerator: u128 = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };
    let denominator = 10u128.pow(u32::try_from(fraction.len()).ok()?);

    let multiplier = u128::from(multiplier);
    let bytes = whole
        .checked_mul(multiplier)?
        .checked_add(numerator * multiplier / denominator)?;
    u64::try_from(bytes).ok()
}
