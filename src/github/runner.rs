use async_trait::async_trait;
use tokio::process::Command;

/// Captured result of one `gh` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GhOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GhOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Executes `gh` with the given arguments. Authentication is whatever the
/// installed CLI already holds.
#[async_trait]
pub trait GhRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> std::io::Result<GhOutput>;
}

/// Runs the real `gh` binary as a subprocess.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    binary: String,
}

impl SubprocessRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl GhRunner for SubprocessRunner {
    async fn run(&self, args: &[String]) -> std::io::Result<GhOutput> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(GhOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let runner = SubprocessRunner::new("astrolabe-no-such-binary-for-tests");
        let err = runner.run(&["--version".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
