//! Captured result of a command run against a node.

use serde::Serialize;

/// Immutable record of an executed command.
///
/// A non-zero exit is recorded here rather than returned as an error;
/// only failures to execute at all surface as [`NodeError`](crate::NodeError).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Output {
    args: Vec<String>,
    exit_code: i32,
    error: Option<String>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Output {
    /// Build an output record.
    pub fn new(
        args: Vec<String>,
        exit_code: i32,
        error: Option<String>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    ) -> Self {
        Self {
            args,
            exit_code,
            error,
            stdout,
            stderr,
        }
    }

    /// Record for a command that exited cleanly with no output.
    pub fn empty(args: Vec<String>) -> Self {
        Self::new(args, 0, None, Vec::new(), Vec::new())
    }

    /// The arguments the command ran with.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Unix style exit code.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// The error reported after the command exited, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns true if the command exited 0 without error.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// Captured standard output.
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Captured standard error.
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Standard output, lossily decoded.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error, lossily decoded.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Async reader over standard output.
    pub fn stdout_reader(&self) -> impl tokio::io::AsyncRead + Unpin + '_ {
        self.stdout.as_slice()
    }

    /// Async reader over standard error.
    pub fn stderr_reader(&self) -> impl tokio::io::AsyncRead + Unpin + '_ {
        self.stderr.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn non_zero_exit_is_not_success() {
        let out = Output::new(vec!["false".into()], 1, None, vec![], vec![]);
        assert!(!out.success());
        assert_eq!(out.exit_code(), 1);

        let out = Output::new(vec![], 0, Some("killed".into()), vec![], vec![]);
        assert!(!out.success());
        assert_eq!(out.error(), Some("killed"));
    }

    #[tokio::test]
    async fn readers_yield_captured_bytes() {
        let out = Output::new(
            vec!["echo".into(), "hi".into()],
            0,
            None,
            b"hi\n".to_vec(),
            b"warn\n".to_vec(),
        );

        let mut stdout = String::new();
        out.stdout_reader().read_to_string(&mut stdout).await.unwrap();
        assert_eq!(stdout, "hi\n");
        assert_eq!(out.stderr_lossy(), "warn\n");
        assert_eq!(out.args(), ["echo", "hi"]);
    }
}
