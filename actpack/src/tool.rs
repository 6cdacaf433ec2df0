//! External tool seam.
//!
//! Binary diffing and firmware encryption are delegated to vendor programs.
//! The library only needs "run this program with these arguments and tell me
//! how it went", which keeps process handling in the binary crate and lets
//! tests substitute a fake runner.

use std::{ffi::OsString, io, path::Path};

use crate::error::{Error, Result};

/// Result of one external tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Combined stdout and stderr.
    pub output: String,
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ToolOutput {
    /// A successful run with no output.
    pub fn success() -> Self {
        Self {
            output: String::new(),
            code: Some(0),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs.
pub trait ToolRunner {
    /// Runs `tool` with `args` and waits for it to finish.
    fn run(&self, tool: &Path, args: &[OsString]) -> io::Result<ToolOutput>;
}

/// Runs `tool` and maps an unsuccessful exit to [`Error::ExternalTool`].
pub fn run_checked(runner: &dyn ToolRunner, tool: &Path, args: &[OsString]) -> Result<ToolOutput> {
    let out = runner.run(tool, args)?;
    if !out.is_success() {
        return Err(Error::ExternalTool {
            tool: tool.to_path_buf(),
            code: out.code,
            output: out.output,
        });
    }
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::*;
    use mock::RecordingRunner;

    #[test]
    fn test_failure_is_mapped() {
        let runner = RecordingRunner {
            fail_code: Some(3),
            ..Default::default()
        };
        let err = run_checked(&runner, Path::new("hdiff"), &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::ExternalTool { code: Some(3), ref output, .. } if output == "tool failed"
        ));
        assert_eq!(err.kind(), crate::ErrorKind::ExternalToolFailure);
    }

    #[test]
    fn test_success_passes_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in");
        let dst = dir.path().join("out");
        std::fs::write(&src, [1, 2, 3]).unwrap();

        let runner = RecordingRunner::default();
        run_checked(&runner, Path::new("tool"), &[src.into(), dst.clone().into()]).unwrap();
        assert_eq!(std::fs::read(dst).unwrap(), [3, 2, 1]);
        assert_eq!(runner.calls.borrow().len(), 1);
    }
}
