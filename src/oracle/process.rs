//! Child-process worker: one JSON request per line on stdin, one JSON response per line on stdout.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use super::{OracleWorker, WorkerRequest, WorkerResponse};

/// A warm generator process. Killed on drop.
pub struct ProcessWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl ProcessWorker {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn {}", program))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{}: stdin not captured", program))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("{}: stdout not captured", program))?;
        debug!("worker process {} started (pid {})", program, child.id());
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }
}

impl OracleWorker for ProcessWorker {
    fn call(&mut self, request: &WorkerRequest) -> Result<WorkerResponse> {
        let mut payload = serde_json::to_vec(request).context("encode worker request")?;
        payload.push(b'\n');
        self.stdin
            .write_all(&payload)
            .and_then(|_| self.stdin.flush())
            .context("write to worker process")?;

        self.line.clear();
        let n = self
            .stdout
            .read_line(&mut self.line)
            .context("read from worker process")?;
        if n == 0 {
            bail!("worker process {} closed its output", self.child.id());
        }
        serde_json::from_str(self.line.trim_end())
            .with_context(|| format!("decode worker response {:?}", self.line.trim_end()))
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("kill worker process {}: {}", self.child.id(), e);
        }
        let _ = self.child.wait();
    }
}
