//! Support code for e2e tests, which run cc2 as a binary.

mod basic;
mod failures;
mod generator;
mod incremental;

pub fn cc2_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join(format!("cc2{}", std::env::consts::EXE_SUFFIX))
}

pub fn cc2_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(cc2_binary());
    cmd.args(args);
    // Keep stdout free of log lines regardless of the caller's environment.
    cmd.env_remove("CC2_LOG");
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", std::str::from_utf8(&out.stdout).unwrap());
    print!("{}", std::str::from_utf8(&out.stderr).unwrap());
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if out.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// A toolchain made of shell builtins: "compiling" copies the source to the
/// object, "linking" concatenates the objects and libraries.  A source
/// containing the word FAIL does not compile.
#[cfg(unix)]
pub const SHELL_TOOLCHAIN: &str = r#"
[toolchain]
name = "sh"

[toolchain.config]
compile_command = "! grep -q FAIL {input} && cp {input} {output}"
executable_link_command = "cat {compiled_sources} {lib_deps} > {output}"
static_library_link_command = "cat {compiled_sources} > {output}"
executable_ext = ".out"
"#;

/// Manages a temporary directory for invoking cc2.
pub struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Write a file into the working space, creating parent directories.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        let path = self.dir.path().join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    /// Write the build description: the shell toolchain plus `rest`.
    #[cfg(unix)]
    pub fn write_manifest(&self, rest: &str) -> std::io::Result<()> {
        self.write("build.toml", &[SHELL_TOOLCHAIN, rest].join("\n"))
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    /// Set the modification time of a file, in seconds since the epoch.
    pub fn touch(&self, path: &str, secs: i64) -> std::io::Result<()> {
        filetime::set_file_mtime(
            self.dir.path().join(path),
            filetime::FileTime::from_unix_time(secs, 0),
        )
    }

    /// Invoke cc2, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}
