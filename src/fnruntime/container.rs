//! Sandboxed function invocation
//!
//! Assembles the `docker run` / `podman run` command line for a single
//! function and streams package data through it.

use crate::error::{PorchletError, PorchletResult};
use crate::fnruntime::probe::RuntimeProbe;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Functions are killed after this long unless configured otherwise
pub const DEFAULT_FUNCTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// User the container runs as when no UID:GID is given
const DEFAULT_USER: &str = "nobody";

/// How long stderr is still collected once the engine process is gone.
/// Descendants of the engine CLI can keep the pipe open indefinitely.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// When the engine should pull the function image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl ImagePullPolicy {
    /// Value for the engine's `--pull` flag
    pub fn pull_flag(policy: Option<Self>) -> &'static str {
        match policy {
            Some(Self::Never) => "never",
            Some(Self::Always) => "always",
            Some(Self::IfNotPresent) | None => "missing",
        }
    }
}

impl FromStr for ImagePullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "ifnotpresent" => Ok(Self::IfNotPresent),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "unknown image pull policy {:?}, expected Always, IfNotPresent or Never",
                s
            )),
        }
    }
}

/// What the function is allowed to touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionPermission {
    /// Attach host networking instead of none
    pub allow_network: bool,
    /// Permit storage mounts
    pub allow_mount: bool,
}

/// Kind of storage mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

impl MountType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Volume => "volume",
            Self::Tmpfs => "tmpfs",
        }
    }
}

/// A storage mount passed to the container with `--mount`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMount {
    pub mount_type: MountType,
    pub src: String,
    pub dst: String,
    pub read_write: bool,
}

impl fmt::Display for StorageMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={},source={},target={}",
            self.mount_type.as_str(),
            self.src,
            self.dst
        )?;
        if !self.read_write {
            f.write_str(",readonly")?;
        }
        Ok(())
    }
}

impl FromStr for StorageMount {
    type Err = PorchletError;

    /// Parse `type=bind,src=/host,dst=/container[,rw=true]`
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| PorchletError::InvalidMount {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut mount_type = None;
        let mut src = None;
        let mut dst = None;
        let mut read_write = false;

        for field in spec.split(',') {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| invalid("fields must be key=value"))?;
            match key {
                "type" => {
                    mount_type = Some(match value {
                        "bind" => MountType::Bind,
                        "volume" => MountType::Volume,
                        "tmpfs" => MountType::Tmpfs,
                        _ => return Err(invalid("type must be bind, volume or tmpfs")),
                    })
                }
                "src" | "source" => src = Some(value.to_string()),
                "dst" | "target" => dst = Some(value.to_string()),
                "rw" => {
                    read_write = value
                        .parse()
                        .map_err(|_| invalid("rw must be true or false"))?
                }
                _ => return Err(invalid("unknown field")),
            }
        }

        Ok(Self {
            mount_type: mount_type.ok_or_else(|| invalid("missing type"))?,
            src: src.unwrap_or_default(),
            dst: dst.ok_or_else(|| invalid("missing dst"))?,
            read_write,
        })
    }
}

/// Environment exposed to the function
///
/// `KEY=VALUE` entries are set explicitly; bare `KEY` entries pass the
/// caller's value through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerEnv {
    vars: BTreeMap<String, Option<String>>,
}

impl ContainerEnv {
    /// Parse entries like `["foo=bar", "baz"]`
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut vars = BTreeMap::new();
        for entry in entries {
            match entry.as_ref().split_once('=') {
                Some((key, value)) => vars.insert(key.to_string(), Some(value.to_string())),
                None => vars.insert(entry.as_ref().to_string(), None),
            };
        }
        Self { vars }
    }

    /// `-e` flags for the engine CLI
    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::with_capacity(self.vars.len() * 2);
        for (key, value) in &self.vars {
            flags.push("-e".to_string());
            match value {
                Some(value) => flags.push(format!("{}={}", key, value)),
                None => flags.push(key.clone()),
            }
        }
        flags
    }
}

/// Outcome of a successful function run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionResult {
    /// Image that ran
    pub image: String,
    /// Exit code (always 0 for a returned result)
    pub exit_code: i32,
    /// Function diagnostics left after filtering engine output
    pub stderr: Option<String>,
}

/// A containerized function invocation
#[derive(Debug, Clone)]
pub struct ContainerFn {
    /// Image to run (already normalized)
    pub image: String,
    /// Pull behaviour; unset means pull if missing
    pub pull_policy: Option<ImagePullPolicy>,
    /// Kill the function after this long; unset means five minutes
    pub timeout: Option<Duration>,
    pub permission: FunctionPermission,
    /// `uid:gid` to run as; unset means `nobody`
    pub uidgid: Option<String>,
    pub storage_mounts: Vec<StorageMount>,
    /// `KEY=VALUE` or `KEY` entries
    pub env: Vec<String>,
}

impl ContainerFn {
    /// A function with the default sandbox profile
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            pull_policy: None,
            timeout: None,
            permission: FunctionPermission::default(),
            uidgid: None,
            storage_mounts: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Effective timeout
    pub fn timeout(&self) -> Duration {
        match self.timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_FUNCTION_TIMEOUT,
        }
    }

    /// Arguments after the engine binary, image last
    pub fn args(&self) -> Vec<String> {
        let network = if self.permission.allow_network {
            "host"
        } else {
            "none"
        };
        let user = match self.uidgid.as_deref() {
            Some(uidgid) if !uidgid.is_empty() => uidgid,
            _ => DEFAULT_USER,
        };

        let mut args: Vec<String> = [
            "run",
            "--rm",
            "-i",
            "-a",
            "STDIN",
            "-a",
            "STDOUT",
            "-a",
            "STDERR",
            "--network",
            network,
            "--user",
            user,
            "--security-opt=no-new-privileges",
            "--pull",
            ImagePullPolicy::pull_flag(self.pull_policy),
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        for mount in &self.storage_mounts {
            args.push("--mount".to_string());
            args.push(mount.to_string());
        }

        args.extend(ContainerEnv::from_entries(&self.env).flags());
        args.push(self.image.clone());
        args
    }

    /// Run the function, feeding `input` on stdin and copying its stdout
    /// into `output`.
    ///
    /// A non-zero exit, including a kill on timeout, is reported as
    /// [`PorchletError::ExecFailed`] with the filtered stderr. Failing to
    /// launch or talk to the process is an unexpected function error.
    pub async fn run<R, W>(
        &self,
        probe: &RuntimeProbe,
        mut input: R,
        output: &mut W,
    ) -> PorchletResult<FunctionResult>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        probe.ensure_available().await?;

        if !self.storage_mounts.is_empty() && !self.permission.allow_mount {
            return Err(PorchletError::MountNotPermitted(self.image.clone()));
        }

        let engine = probe.engine();
        let args = self.args();
        debug!("Running function: {} {:?}", probe.binary(), args);

        let mut child = Command::new(probe.binary())
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PorchletError::UnexpectedFunction(e.to_string()))?;

        let (mut stdin, mut stdout, mut stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    return Err(PorchletError::UnexpectedFunction(
                        "function stdio was not captured".to_string(),
                    ))
                }
            };

        // Drained into a shared buffer so partial output survives a kill.
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stderr_buf);
        let stderr_task = tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });

        let feed = async {
            let copied = tokio::io::copy(&mut input, &mut stdin).await;
            let closed = stdin.shutdown().await;
            drop(stdin);
            copied.and(closed).map(|_| ())
        };
        let drain = tokio::io::copy(&mut stdout, output);
        let work = async {
            let (fed, drained) = tokio::join!(feed, drain);
            let status = child.wait().await;
            (fed, drained, status)
        };

        let outcome = tokio::time::timeout(self.timeout(), work).await;

        let (fed, drained, status) = match outcome {
            Ok(done) => done,
            Err(_) => {
                warn!(
                    "Function {} exceeded timeout of {:?}, killing it",
                    self.image,
                    self.timeout()
                );
                let _ = child.kill().await;
                let captured = collect_stderr(stderr_task, &stderr_buf).await;
                return Err(PorchletError::ExecFailed {
                    exit_code: -1,
                    stderr: engine.filter_cli_output(&String::from_utf8_lossy(&captured)),
                });
            }
        };

        let status = status.map_err(|e| PorchletError::UnexpectedFunction(e.to_string()))?;
        let captured = collect_stderr(stderr_task, &stderr_buf).await;
        let filtered = engine.filter_cli_output(&String::from_utf8_lossy(&captured));

        if !status.success() {
            return Err(PorchletError::ExecFailed {
                exit_code: status.code().unwrap_or(-1),
                stderr: filtered,
            });
        }

        // The function may exit without reading all of its input.
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(PorchletError::UnexpectedFunction(e.to_string()));
            }
        }
        drained.map_err(|e| PorchletError::UnexpectedFunction(e.to_string()))?;

        Ok(FunctionResult {
            image: self.image.clone(),
            exit_code: 0,
            stderr: (!captured.is_empty()).then_some(filtered),
        })
    }
}

/// Wait briefly for the stderr reader, then take whatever it collected
async fn collect_stderr(mut task: JoinHandle<()>, buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    if tokio::time::timeout(STDERR_GRACE, &mut task).await.is_err() {
        debug!("Stderr still open after the engine exited, abandoning it");
        task.abort();
    }
    buf.lock().map(|b| b.clone()).unwrap_or_default()
}
