//! Memory-lock limit elevation through a self re-exec
//!
//! The filter locks its buffers in RAM, which needs an unlimited
//! `RLIMIT_MEMLOCK`. Instead of running the whole tool with elevated rights,
//! the requester asks the authorization agent (`pkexec` by default) to run
//! this same binary in helper role:
//!
//! ```text
//! pkexec /path/to/hushline --removerlimit <PID>
//! ```
//!
//! The helper validates the pid, raises the limit with `prlimit(2)` and
//! exits. Its exit status is the whole result channel:
//!
//! | status | meaning                          |
//! |--------|----------------------------------|
//! | 0      | limit raised                     |
//! | 1      | kernel rejected the new limit    |
//! | 2      | target pid failed validation     |
//! | 126    | pkexec: authorization dismissed  |
//! | 127    | pkexec: not authorized           |

use async_trait::async_trait;
use rlimit::Resource;
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ElevationConfig;
use crate::error::ElevationError;

/// Hidden command-line flag selecting helper role
pub const HELPER_FLAG: &str = "--removerlimit";

pub const HELPER_EXIT_OK: u8 = 0;
pub const HELPER_EXIT_LIMIT_REJECTED: u8 = 1;
pub const HELPER_EXIT_INVALID_TARGET: u8 = 2;

const PKEXEC_DISMISSED: i32 = 126;
const PKEXEC_NOT_AUTHORIZED: i32 = 127;

/// Soft and hard value of one resource limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub soft: u64,
    pub hard: u64,
}

impl ResourceLimits {
    pub const UNLIMITED: Self = Self {
        soft: rlimit::INFINITY,
        hard: rlimit::INFINITY,
    };
}

/// "Raise `RLIMIT_MEMLOCK` of process `target_pid` to `limits`"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationRequest {
    pub target_pid: i32,
    pub limits: ResourceLimits,
}

impl ElevationRequest {
    pub fn unlimited_memlock(target_pid: i32) -> Self {
        Self {
            target_pid,
            limits: ResourceLimits::UNLIMITED,
        }
    }

    /// Helper-role arguments for this request
    pub fn to_args(&self) -> Vec<String> {
        vec![HELPER_FLAG.to_string(), self.target_pid.to_string()]
    }

    /// Validate a raw helper-role argument.
    ///
    /// Runs with elevated rights, so nothing is trusted: the value must be a
    /// positive integer naming a process that currently exists.
    pub fn parse(raw: &str) -> Result<Self, ElevationError> {
        Self::parse_with_proc(raw, Path::new("/proc"))
    }

    fn parse_with_proc(raw: &str, proc_root: &Path) -> Result<Self, ElevationError> {
        let invalid = |reason: &str| ElevationError::InvalidTarget {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return Err(invalid("not a number"));
        }
        let pid: i64 = trimmed.parse().map_err(|_| invalid("not a number"))?;
        if pid <= 0 {
            return Err(invalid("must be positive"));
        }
        let pid = i32::try_from(pid).map_err(|_| invalid("out of range"))?;
        if !proc_root.join(pid.to_string()).is_dir() {
            return Err(invalid("no such process"));
        }

        Ok(Self::unlimited_memlock(pid))
    }

    /// Apply the new limit with `prlimit(2)`
    pub fn apply(&self) -> Result<(), ElevationError> {
        rlimit::prlimit(
            self.target_pid,
            Resource::MEMLOCK,
            Some((self.limits.soft, self.limits.hard)),
            None,
        )
        .map_err(|e| ElevationError::LimitRejected(e.to_string()))
    }
}

/// Entry point of the helper role. Never touches config, logging or the
/// audio server; validates, applies, exits.
pub fn run_helper(raw_pid: &str) -> ExitCode {
    ExitCode::from(helper_status(raw_pid))
}

fn helper_status(raw_pid: &str) -> u8 {
    let request = match ElevationRequest::parse(raw_pid) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e);
            return HELPER_EXIT_INVALID_TARGET;
        }
    };

    match request.apply() {
        Ok(()) => HELPER_EXIT_OK,
        Err(e) => {
            eprintln!("{}", e);
            HELPER_EXIT_LIMIT_REJECTED
        }
    }
}

/// Whether this process already may lock unlimited memory
pub fn memlock_sufficient() -> bool {
    match rlimit::getrlimit(Resource::MEMLOCK) {
        Ok((soft, _)) => soft == rlimit::INFINITY,
        Err(e) => {
            warn!("Couldn't read RLIMIT_MEMLOCK: {}", e);
            false
        }
    }
}

/// Map the helper's exit code to a request outcome
fn outcome_from_exit(code: Option<i32>) -> Result<(), ElevationError> {
    match code {
        Some(0) => Ok(()),
        Some(PKEXEC_DISMISSED) | Some(PKEXEC_NOT_AUTHORIZED) => Err(ElevationError::Denied),
        Some(c) if c == HELPER_EXIT_INVALID_TARGET as i32 => Err(ElevationError::InvalidTarget {
            raw: String::new(),
            reason: "rejected by helper".to_string(),
        }),
        Some(c) if c == HELPER_EXIT_LIMIT_REJECTED as i32 => Err(ElevationError::LimitRejected(
            "helper could not raise the limit".to_string(),
        )),
        other => Err(ElevationError::UnexpectedStatus(other)),
    }
}

/// Requester side of the elevation protocol
#[async_trait]
pub trait Elevator: Send + Sync {
    /// Raise the memory-lock limit of `target_pid`
    async fn elevate(&self, target_pid: i32) -> Result<(), ElevationError>;

    /// Whether elevation can be skipped for this process
    fn memlock_sufficient(&self) -> bool {
        memlock_sufficient()
    }
}

/// Elevator that re-executes this binary through an authorization agent
pub struct PolkitElevator {
    program: String,
    exe: PathBuf,
    timeout: Duration,
}

impl PolkitElevator {
    pub fn new(program: impl Into<String>, exe: PathBuf, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            exe,
            timeout,
        }
    }

    /// Elevator re-executing the current executable
    pub fn from_config(config: &ElevationConfig) -> std::io::Result<Self> {
        Ok(Self::new(
            config.program.clone(),
            std::env::current_exe()?,
            Duration::from_secs(config.timeout_secs),
        ))
    }
}

#[async_trait]
impl Elevator for PolkitElevator {
    async fn elevate(&self, target_pid: i32) -> Result<(), ElevationError> {
        let request = ElevationRequest::unlimited_memlock(target_pid);
        info!(
            "🔐 Requesting memlock elevation for pid {} via {}",
            target_pid, self.program
        );

        // Dropping this future (user cancelled) kills the agent as well
        let mut child = Command::new(&self.program)
            .arg(&self.exe)
            .args(request.to_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ElevationError::MechanismUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ElevationError::MechanismUnavailable {
                    program: self.program.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill timed out elevation agent: {}", e);
                }
                return Err(ElevationError::TimedOut(self.timeout));
            }
        };

        debug!("Elevation helper exited with {:?}", status.code());
        let outcome = outcome_from_exit(status.code());
        match &outcome {
            Ok(()) => info!("✅ Memlock limit raised for pid {}", target_pid),
            Err(e) => warn!("⚠️  Memlock elevation failed: {}", e),
        }
        outcome
    }
}
