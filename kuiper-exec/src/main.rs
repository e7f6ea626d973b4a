//! kuiper-exec - run one shell command across a fleet of hosts over SSH.
//!
//! Hosts are read from a YAML file and contacted in parallel, with at most
//! `--parallel-requests` SSH connections active at once. Each host's output
//! is printed as it completes; failures are logged and never stop the run.
//!
//! ```
//! kuiper-exec --server-addresses hosts.yaml \
//!             --command 'uptime' \
//!             --ssh-key ~/.ssh/id_ed25519 \
//!             --parallel-requests 8
//! ```

mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use kuiper_exec_lib::paths::expand_tilde;
use kuiper_exec_lib::{
    Dispatcher, ExecRequest, HostKeyPolicy, Outcome, SlotPool, SshExecutor, Target,
};
use tracing::{Level, debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::HostsConfig;

/// Run a command on many hosts over SSH
#[derive(Parser, Debug)]
#[command(name = "kuiper-exec", version, about, long_about = None)]
struct Args {
    /// YAML file containing server addresses
    #[arg(long, default_value = "./hosts.yaml")]
    server_addresses: PathBuf,

    /// Command to execute on the servers
    #[arg(long, default_value = "")]
    command: String,

    /// Private key for SSH authentication
    #[arg(long, default_value = "~/.ssh/id_rsa")]
    ssh_key: PathBuf,

    /// Maximum number of SSH connections active at once
    #[arg(long, default_value_t = 4)]
    parallel_requests: usize,

    /// Timeout for establishing each SSH connection (e.g. "10s", "1m30s")
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    ssh_timeout: Duration,

    /// Remote user to log in as
    #[arg(long, default_value = "root")]
    ssh_user: String,

    /// Verify host keys against this known_hosts file (default: accept any host key)
    #[arg(long)]
    known_hosts: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Everything resolved from the command line before any network activity.
struct RunPlan {
    targets: Vec<Target>,
    pool: SlotPool,
    executor: SshExecutor,
    request: ExecRequest,
}

impl RunPlan {
    fn from_args(args: Args) -> Result<Self> {
        if args.command.trim().is_empty() {
            bail!("Missing command flag");
        }

        let hosts = HostsConfig::load(&args.server_addresses)
            .context("Failed to read server addresses")?;

        let credential = expand_tilde(&args.ssh_key).context("Failed to expand SSH key path")?;

        let host_key_policy = match args.known_hosts {
            Some(path) => HostKeyPolicy::KnownHosts(
                expand_tilde(&path).context("Failed to expand known_hosts path")?,
            ),
            None => HostKeyPolicy::InsecureIgnore,
        };

        let pool = SlotPool::new(args.parallel_requests)
            .map_err(|e| anyhow!("Invalid --parallel-requests {}: {}", args.parallel_requests, e))?;

        Ok(Self {
            targets: hosts.targets(),
            pool,
            executor: SshExecutor::new(args.ssh_user, host_key_policy),
            request: ExecRequest {
                command: args.command,
                credential,
                timeout: args.ssh_timeout,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let plan = RunPlan::from_args(args)?;
    run(plan).await;

    Ok(())
}

/// Initialize logging to stderr, leaving stdout for command output.
fn init_logging(verbose: bool) {
    // Base filter suppresses russh chatter, RUST_LOG layers on top
    let base = "russh=warn";
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) => EnvFilter::new(format!("{base},{env}")),
        Err(_) => EnvFilter::new(base).add_directive(level.into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Run the command on every host and report results as they complete.
async fn run(plan: RunPlan) {
    let RunPlan {
        targets,
        pool,
        executor,
        request,
    } = plan;

    info!(
        "Running '{}' on {} hosts ({} at a time) as {}",
        request.command,
        targets.len(),
        pool.capacity(),
        executor.username()
    );
    debug!("Using key {}", request.credential.display());

    let dispatcher = Dispatcher::new(pool);
    let mut results = dispatcher.run_command(targets, Arc::new(executor), request);

    let mut failed = 0;
    let mut succeeded = 0;
    while let Some(result) = results.next().await {
        match result.outcome {
            Outcome::Success { output } => {
                succeeded += 1;
                if let Err(e) = write_output(&mut std::io::stdout().lock(), &result.target, &output)
                {
                    error!("Failed to write output from {}: {}", result.target, e);
                }
            }
            Outcome::Failure { reason } => {
                failed += 1;
                error!("Failed to execute command on {}: {}", result.target, reason);
            }
        }
    }

    info!("Finished: {} succeeded, {} failed", succeeded, failed);
}

/// Write one host's output block. Output bytes are passed through untouched.
fn write_output(out: &mut impl Write, target: &Target, output: &[u8]) -> std::io::Result<()> {
    writeln!(out, "Output from {}:", target)?;
    out.write_all(output)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Parse a duration string like "10s", "500ms", "1m30s" or "2h"
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            bail!("Invalid duration: {}", s);
        }
        let num: u64 = rest[..digits]
            .parse()
            .context("Invalid duration number")?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(num),
            "s" => Duration::from_secs(num),
            "m" => Duration::from_secs(num.checked_mul(60).context("Duration too large")?),
            "h" => Duration::from_secs(num.checked_mul(3600).context("Duration too large")?),
            "" => bail!("Missing duration unit in {}. Use ms, s, m, or h", s),
            _ => bail!("Unknown duration unit: {}. Use ms, s, m, or h", unit),
        };
        total = total.checked_add(part).context("Duration too large")?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["kuiper-exec"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("Failed to parse args")
    }

    fn hosts_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hosts:\n  - web-1\n  - web-2").unwrap();
        file
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);

        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = args(&["--command", "uptime"]);
        assert_eq!(args.server_addresses, PathBuf::from("./hosts.yaml"));
        assert_eq!(args.ssh_key, PathBuf::from("~/.ssh/id_rsa"));
        assert_eq!(args.parallel_requests, 4);
        assert_eq!(args.ssh_timeout, Duration::from_secs(10));
        assert_eq!(args.ssh_user, "root");
        assert!(args.known_hosts.is_none());
    }

    #[test]
    fn test_missing_command_is_fatal() {
        // Checked before the (nonexistent) hosts file is touched
        let err = RunPlan::from_args(args(&["--server-addresses", "/nonexistent/hosts.yaml"]))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Missing command flag");

        let err = RunPlan::from_args(args(&["--command", ""])).err().unwrap();
        assert_eq!(err.to_string(), "Missing command flag");

        let err = RunPlan::from_args(args(&["--command", "  \t"])).err().unwrap();
        assert_eq!(err.to_string(), "Missing command flag");
    }

    #[test]
    fn test_blank_host_does_not_stop_run() {
        let mut hosts = tempfile::NamedTempFile::new().unwrap();
        writeln!(hosts, "hosts:\n  - web-1\n  - ''").unwrap();
        let path = hosts.path().to_str().unwrap();

        let plan = RunPlan::from_args(args(&["--command", "uptime", "--server-addresses", path]))
            .unwrap();
        let targets: Vec<_> = plan.targets.iter().map(|t| t.to_string()).collect();
        assert_eq!(targets, vec!["web-1", ""]);
    }

    #[test]
    fn test_write_output_keeps_raw_bytes() {
        let mut out = Vec::new();
        write_output(&mut out, &Target::new("web-1"), &[b'h', b'i', 0xff, b'\n']).unwrap();
        assert_eq!(out, b"Output from web-1:\nhi\xff\n\n");
    }

    #[test]
    fn test_unreadable_hosts_is_fatal() {
        let err = RunPlan::from_args(args(&[
            "--command",
            "uptime",
            "--server-addresses",
            "/nonexistent/hosts.yaml",
        ]))
        .err()
        .unwrap();
        assert!(err.to_string().contains("Failed to read server addresses"));
    }

    #[test]
    fn test_zero_parallel_requests_is_fatal() {
        let hosts = hosts_file();
        let path = hosts.path().to_str().unwrap();
        let result = RunPlan::from_args(args(&[
            "--command",
            "uptime",
            "--server-addresses",
            path,
            "--parallel-requests",
            "0",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_run_plan() {
        let hosts = hosts_file();
        let path = hosts.path().to_str().unwrap();
        let plan = RunPlan::from_args(args(&[
            "--command",
            "uname -a",
            "--server-addresses",
            path,
            "--ssh-key",
            "/keys/fleet",
            "--parallel-requests",
            "2",
            "--ssh-timeout",
            "3s",
            "--known-hosts",
            "/etc/ssh/known_hosts",
        ]))
        .unwrap();

        let targets: Vec<_> = plan.targets.iter().map(|t| t.to_string()).collect();
        assert_eq!(targets, vec!["web-1", "web-2"]);
        assert_eq!(plan.pool.capacity(), 2);
        assert_eq!(plan.request.command, "uname -a");
        assert_eq!(plan.request.credential, PathBuf::from("/keys/fleet"));
        assert_eq!(plan.request.timeout, Duration::from_secs(3));
        assert_eq!(plan.executor.username(), "root");
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let result = Args::try_parse_from(["kuiper-exec", "--command", "ls", "--ssh-timeout", "ten"]);
        assert!(result.is_err());
    }
}
