//! Shell execution with Jenkins `sh` semantics
//!
//! Each step is written to a script file carrying its shebang line and run
//! as an executable, so the interpreter is chosen by the script itself:
//!
//! - host agents execute the file directly in the workspace
//! - container agents execute it through the runtime's exec prefix; the
//!   scratch directory is mounted at the same path inside the container
//!
//! Output is streamed line by line into the run's [`LogBuffer`]. The child is
//! spawned with `kill_on_drop`, so dropping the future returned by
//! [`ShellRunner::run`] stops the step.
//!
//! ## Variable Expansion
//!
//! Variables are expanded using the `${VAR_NAME}` syntax:
//!
//! ```rust
//! use runline::executor::expand_variables;
//! use std::collections::BTreeMap;
//!
//! let env = BTreeMap::from([("BUILD_NUMBER".to_string(), "7".to_string())]);
//! assert_eq!(expand_variables("echo ${BUILD_NUMBER}", &env), "echo 7");
//! ```

use super::errors::ShellError;
use super::log::LogBuffer;
use super::traits::{ShellInvocation, ShellResult, ShellRunner};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use uuid::Uuid;

const SPAWN_RETRIES: u32 = 5;

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Expands `${VAR_NAME}` references in a string
///
/// If a variable is not found, it remains unchanged in the output.
pub fn expand_variables(input: &str, env: &BTreeMap<String, String>) -> String {
    VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = caps.get(1).map_or("", |m| m.as_str());
            match env.get(var_name) {
                Some(value) => value.clone(),
                None => caps.get(0).map_or_else(String::new, |m| m.as_str().to_string()),
            }
        })
        .to_string()
}

/// Runs step scripts as local processes
#[derive(Debug, Clone, Default)]
pub struct LocalShell;

impl LocalShell {
    /// Creates a new local shell runner
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn write_script(scratch_dir: &Path, script: &str) -> Result<PathBuf, ShellError> {
        tokio::fs::create_dir_all(scratch_dir).await?;
        let path = scratch_dir.join(format!("script-{}.sh", Uuid::new_v4().simple()));
        tokio::fs::write(&path, script).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(path)
    }

    fn command(invocation: &ShellInvocation, script_path: &Path) -> Command {
        let mut cmd = match invocation.exec_prefix.split_first() {
            None => {
                let mut cmd = Command::new(script_path);
                cmd.current_dir(&invocation.cwd);
                cmd.envs(&invocation.env);
                cmd
            }
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd.arg(script_path);
                cmd
            }
        };
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

async fn pump<R>(reader: R, log: LogBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                log.push(text.trim_end_matches(['\n', '\r']));
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read step output");
                break;
            }
        }
    }
}

#[async_trait]
impl ShellRunner for LocalShell {
    async fn run(
        &self,
        invocation: &ShellInvocation,
        log: &LogBuffer,
    ) -> Result<ShellResult, ShellError> {
        let start = Instant::now();
        let script_path = Self::write_script(&invocation.scratch_dir, &invocation.script).await?;

        tracing::debug!(
            script = %script_path.display(),
            interpreter = %invocation.interpreter,
            container = !invocation.exec_prefix.is_empty(),
            "Executing step script"
        );

        let mut attempts = 0;
        let mut child = loop {
            match Self::command(invocation, &script_path).spawn() {
                Ok(child) => break child,
                // Another thread may still hold a write handle across fork.
                Err(err) if err.kind() == ErrorKind::ExecutableFileBusy && attempts < SPAWN_RETRIES => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(err) if err.kind() == ErrorKind::NotFound && invocation.exec_prefix.is_empty() => {
                    return Err(ShellError::InterpreterNotFound {
                        interpreter: invocation.interpreter.clone(),
                    });
                }
                Err(err) => return Err(ShellError::Spawn(err.to_string())),
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::Spawn("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ShellError::Spawn("stderr was not captured".to_string()))?;

        let (status, (), ()) = tokio::join!(
            child.wait(),
            pump(stdout, log.clone()),
            pump(stderr, log.clone())
        );
        let status = status?;

        if let Err(err) = tokio::fs::remove_file(&script_path).await {
            tracing::debug!(error = %err, "Could not remove step script");
        }

        Ok(ShellResult {
            exit_code: status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }
}
