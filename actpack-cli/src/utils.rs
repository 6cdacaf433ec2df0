//! Common utilities and helper functions.
//!
//! This module provides the host process runner used for the external diff
//! and encryption tools, plus small file helpers.

use std::{
    ffi::{OsStr, OsString},
    fs, io,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use actpack::{ToolOutput, ToolRunner};
use colored::Colorize;

/// A `std::process::Command` wrapper that echoes itself before running.
pub struct Command {
    inner: std::process::Command,
}

impl Deref for Command {
    type Target = std::process::Command;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Command {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Command {
    /// Creates a new command.
    ///
    /// # Arguments
    ///
    /// * `program` - The program to execute.
    /// * `workdir` - The working directory for the command.
    pub fn new<S>(program: S, workdir: &Path) -> Command
    where
        S: AsRef<OsStr>,
    {
        let mut cmd = std::process::Command::new(program);
        cmd.current_dir(workdir);
        Self { inner: cmd }
    }

    /// Prints the command to stdout with colored formatting.
    pub fn print_cmd(&self) {
        let mut cmd_str = self.get_program().to_string_lossy().to_string();

        for arg in self.get_args() {
            cmd_str += " ";
            cmd_str += arg.to_string_lossy().as_ref();
        }

        println!("{}", cmd_str.purple().bold());
    }

    /// Runs the command, capturing stdout and stderr together.
    pub fn run_captured(&mut self) -> io::Result<ToolOutput> {
        self.print_cmd();
        let output = self.output()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!("{}", text.trim_end());
        Ok(ToolOutput {
            output: text,
            code: output.status.code(),
        })
    }
}

/// Runs external tools as child processes of this host.
#[derive(Debug, Clone)]
pub struct HostRunner {
    workdir: PathBuf,
}

impl HostRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl ToolRunner for HostRunner {
    fn run(&self, tool: &Path, args: &[OsString]) -> io::Result<ToolOutput> {
        let mut cmd = Command::new(tool, &self.workdir);
        cmd.args(args);
        cmd.run_captured()
    }
}

/// Replaces `${name}` placeholders in `arg` with the matching value.
///
/// Unknown placeholders are kept as they are.
pub fn replace_placeholders(arg: &str, vars: &[(&str, &str)]) -> String {
    let mut out = arg.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}

/// Copies every file of `src` into `dst`, replacing `dst` if it exists.
pub fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.exists() {
        fs::remove_dir_all(dst)?;
    }
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            fs::copy(&path, dst.join(entry.file_name()))?;
        }
    }
    Ok(())
}

/// Lists the files of `dir` in name order.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Expands a single directory argument into the files it contains.
pub fn expand_inputs(inputs: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    match inputs {
        [dir] if dir.is_dir() => list_files(dir),
        _ => Ok(inputs.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_placeholders() {
        let vars = [("file", "bin/app.bin"), ("block_size", "34")];
        assert_eq!(replace_placeholders("${file}", &vars), "bin/app.bin");
        assert_eq!(
            replace_placeholders("-b${block_size}:${file}", &vars),
            "-b34:bin/app.bin"
        );
        assert_eq!(replace_placeholders("${other}", &vars), "${other}");
        assert_eq!(replace_placeholders("plain", &vars), "plain");
    }

    #[test]
    fn test_copy_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bin");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("b.bin"), [2]).unwrap();
        fs::write(src.join("a.bin"), [1]).unwrap();

        let dst = dir.path().join("bin_orig");
        fs::create_dir(&dst).unwrap();
        fs::write(dst.join("stale.bin"), [0]).unwrap();
        copy_dir(&src, &dst).unwrap();

        let names: Vec<_> = list_files(&dst)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.bin", "b.bin"]);

        assert_eq!(expand_inputs(&[src.clone()]).unwrap().len(), 2);
        let single = vec![src.join("a.bin")];
        assert_eq!(expand_inputs(&single).unwrap(), single);
    }

    #[cfg(unix)]
    #[test]
    fn test_host_runner_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = HostRunner::new(dir.path());
        let out = runner
            .run(
                Path::new("sh"),
                &["-c".into(), "echo hello; exit 3".into()],
            )
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.output.trim(), "hello");
    }
}
