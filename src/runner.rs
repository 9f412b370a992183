use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// How a scanner subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Organic close with the given exit code (None when the OS reports no
    /// code, e.g. killed by an unrelated signal).
    Exited(Option<i32>),
    /// The cancellation token fired and the process was terminated by us.
    Cancelled,
}

/// Spawn the external scanning tool and stream its combined stdout/stderr
/// line by line into `on_line`.
///
/// Arguments are passed as a list, never through a shell, so validated
/// parameters cannot be reinterpreted. Output is split on newlines with a
/// carry buffer; a partial trailing fragment is flushed as a final line when
/// the stream closes. Returns the end classification; a spawn failure is an
/// `Err` before any line is delivered.
pub async fn run_scanner<F>(
    program: &str,
    args: &[String],
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<RunEnd>
where
    F: FnMut(&str),
{
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stderr = child.stderr.take().context("child stderr not captured")?;

    let mut out_lines = LineStream::new(stdout);
    let mut err_lines = LineStream::new(stderr);
    let mut out_done = false;
    let mut err_done = false;
    let mut was_cancelled = false;

    while !(out_done && err_done) {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => match line? {
                Some(l) => on_line(&l),
                None => out_done = true,
            },
            line = err_lines.next_line(), if !err_done => match line? {
                Some(l) => on_line(&l),
                None => err_done = true,
            },
            _ = cancel.cancelled(), if !was_cancelled => {
                was_cancelled = true;
                // Terminate and keep draining; the close below observes the
                // cancellation and classifies the exit accordingly.
                let _ = child.start_kill();
            }
        }
    }

    let status = child.wait().await.context("failed to reap scanner")?;
    if was_cancelled || cancel.is_cancelled() {
        Ok(RunEnd::Cancelled)
    } else {
        Ok(RunEnd::Exited(status.code()))
    }
}

/// Incremental line splitter over an async byte stream. Unlike a plain
/// `BufReader::lines`, it hands back the unterminated trailing fragment as a
/// final line when the stream closes.
struct LineStream<R> {
    reader: R,
    buf: Vec<u8>,
    carry: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineStream<R> {
    fn new(reader: R) -> Self {
        LineStream {
            reader,
            buf: vec![0u8; 4096],
            carry: Vec::new(),
            eof: false,
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.carry.drain(..=pos).collect();
                line.pop(); // newline
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.eof {
                if self.carry.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.carry);
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.carry.extend_from_slice(&self.buf[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streams_lines_and_flushes_trailing_fragment() {
        let data: &[u8] = b"first\nsecond\r\ntail-without-newline";
        let mut stream = LineStream::new(data);
        assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(
            stream.next_line().await.unwrap().as_deref(),
            Some("tail-without-newline")
        );
        assert_eq!(stream.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let cancel = CancellationToken::new();
        let res = run_scanner("netwarden-no-such-binary", &[], &cancel, |_| {}).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn collects_output_and_exit_code() {
        let cancel = CancellationToken::new();
        let mut lines = Vec::new();
        let end = run_scanner(
            "sh",
            &["-c".to_string(), "echo one; echo two 1>&2; exit 0".to_string()],
            &cancel,
            |l| lines.push(l.to_string()),
        )
        .await
        .unwrap();
        assert_eq!(end, RunEnd::Exited(Some(0)));
        lines.sort();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn cancellation_is_classified() {
        let cancel = CancellationToken::new();
        let child_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            child_cancel.cancel();
        });
        let end = run_scanner(
            "sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &cancel,
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(end, RunEnd::Cancelled);
    }
}
