//! Shared test utilities for shardimg tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

use shardimg::build::BuildContext;
use shardimg::config::Config;
use shardimg::error::BuildError;
use shardimg::manifest::{ImageType, Manifest};
use shardimg::process::{CommandResult, Executor, Invocation, Runner};

/// Public key as minisign writes it: comment line, then the key.
pub const PUBLIC_KEY: &str = "untrusted comment: minisign public key 1DE3A5AB33D6C4D2\nRWTSxNYzq6XjHQ0Bc2O4t6ekUcb6+ZnCVYaTMRBE4VjCRpUNYyB2C1ad\n";

/// Signature bytes the fake minisign writes.
pub const SIGNATURE: &[u8] = b"untrusted comment: signature from minisign secret key\nRUTSxNYzq6XjHc2ig==\n";

/// Test environment: a project directory with keys, a manifest and a build dir.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Project directory holding manifest.json
    pub base_dir: PathBuf,
    pub build_dir: PathBuf,
    pub key_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();

        Self {
            build_dir: base_dir.join("build"),
            key_dir: base_dir.join("keys"),
            base_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Configuration pointing keys and repo into the environment.
    pub fn config(&self) -> Config {
        self.config_with(&[])
    }

    pub fn config_with(&self, extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert(
            "SHARDIMG_KEY_DIR".into(),
            self.key_dir.to_string_lossy().into_owned(),
        );
        vars.insert("SHARDIMG_REPO".into(), "repo".into());
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        Config::from_vars(&vars, &self.base_dir)
    }

    /// Install a minisign keypair in the key directory.
    pub fn write_keys(&self) {
        fs::create_dir_all(&self.key_dir).expect("Failed to create key dir");
        fs::write(self.key_dir.join("minisign.key"), "secret").expect("Failed to write key");
        fs::write(self.key_dir.join("minisign.pub"), PUBLIC_KEY).expect("Failed to write key");
    }

    /// Write `manifest` to `<base>/manifest.json` and return the path.
    pub fn write_manifest(&self, manifest: &Manifest) -> PathBuf {
        let path = self.base_dir.join("manifest.json");
        manifest.save(&path).expect("Failed to write manifest");
        path
    }

    pub fn build_context(&self) -> BuildContext {
        BuildContext::new(&self.build_dir).expect("Failed to create build context")
    }

    /// Runner backed by `recorder`, honouring dry-run etc. from `config`.
    pub fn runner(&self, recorder: &RecordingExecutor, config: &Config) -> Runner {
        Runner::with_executor(recorder.clone(), config)
    }
}

/// The scenario manifest: `al.getcryst.test`, system, packages `[base]`.
pub fn test_manifest(image_type: ImageType) -> Manifest {
    let mut manifest = Manifest::new("test", "al.getcryst.test", "1.0", "axtlos", image_type);
    manifest.packages = vec!["base".to_string()];
    manifest
}

type Responder = Rc<dyn Fn(&Invocation)>;

/// Executor that records invocations instead of running them.
///
/// Succeeds by default. `fail_when` makes matching command lines exit with a
/// given code; `on` runs a side effect standing in for the real program.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    calls: Rc<RefCell<Vec<Invocation>>>,
    failures: Rc<RefCell<Vec<(String, i32)>>>,
    responders: Rc<RefCell<Vec<(String, Responder)>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any command whose command line contains `needle`.
    pub fn fail_when(&self, needle: &str, code: i32) -> &Self {
        self.failures.borrow_mut().push((needle.to_string(), code));
        self
    }

    /// Run `effect` for every command with `word` among its arguments.
    pub fn on(&self, word: &str, effect: impl Fn(&Invocation) + 'static) -> &Self {
        self.responders
            .borrow_mut()
            .push((word.to_string(), Rc::new(effect)));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.command_line()).collect()
    }

    /// Index of the first command line containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lines().iter().position(|l| l.contains(needle))
    }

    /// Number of commands with `word` among their arguments.
    pub fn count(&self, word: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.has_arg(word)).count()
    }

    pub fn ran(&self, word: &str) -> bool {
        self.count(word) > 0
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<CommandResult, BuildError> {
        self.calls.borrow_mut().push(invocation.clone());

        let responders: Vec<Responder> = self
            .responders
            .borrow()
            .iter()
            .filter(|(word, _)| invocation.has_arg(word))
            .map(|(_, effect)| effect.clone())
            .collect();
        for effect in responders {
            effect(invocation);
        }

        let line = invocation.command_line();
        let code = self
            .failures
            .borrow()
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        Ok(CommandResult {
            code,
            ..CommandResult::synthetic()
        })
    }
}

/// Argument following `flag` in an invocation.
pub fn arg_after<'a>(invocation: &'a Invocation, flag: &str) -> Option<&'a str> {
    let pos = invocation.argv.iter().position(|a| a == flag)?;
    invocation.argv.get(pos + 1).map(String::as_str)
}

/// Make the fake minisign write its detached signature.
pub fn fake_minisign(recorder: &RecordingExecutor) {
    recorder.on("minisign", |inv| {
        let out = arg_after(inv, "-x").expect("minisign called without -x");
        fs::write(out, SIGNATURE).expect("Failed to write signature");
    });
}

/// Make the fake pacman install `files` (root-relative) into its `--root`.
pub fn fake_pacman(recorder: &RecordingExecutor, files: &'static [(&'static str, &'static str)]) {
    recorder.on("-Syu", move |inv| {
        let root = Path::new(arg_after(inv, "--root").expect("pacman called without --root"));
        for (path, content) in files {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).expect("Failed to create dir");
            }
            fs::write(target, content).expect("Failed to write file");
        }
    });
}

/// Counts of `mount` and `umount` invocations.
pub fn mount_balance(recorder: &RecordingExecutor) -> (usize, usize) {
    (recorder.count("mount"), recorder.count("umount"))
}

pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

pub fn assert_dir_exists(path: &Path) {
    assert!(path.is_dir(), "Expected directory to exist: {}", path.display());
}
