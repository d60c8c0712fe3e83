//! Language runtimes installed through an external version manager

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::AgentError;
use crate::models::deployment::RuntimeSpec;

/// Runtimes a blueprint may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Node,
    Python,
    Bun,
    Go,
    Ruby,
    Deno,
    /// Pre-built files, no interpreter to install
    Static,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node",
            RuntimeKind::Python => "python",
            RuntimeKind::Bun => "bun",
            RuntimeKind::Go => "go",
            RuntimeKind::Ruby => "ruby",
            RuntimeKind::Deno => "deno",
            RuntimeKind::Static => "static",
        }
    }

    pub fn needs_install(&self) -> bool {
        !matches!(self, RuntimeKind::Static)
    }
}

impl FromStr for RuntimeKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" | "nodejs" => Ok(RuntimeKind::Node),
            "python" | "python3" => Ok(RuntimeKind::Python),
            "bun" => Ok(RuntimeKind::Bun),
            "go" | "golang" => Ok(RuntimeKind::Go),
            "ruby" => Ok(RuntimeKind::Ruby),
            "deno" => Ok(RuntimeKind::Deno),
            "static" => Ok(RuntimeKind::Static),
            other => Err(AgentError::ValidationError(format!(
                "unsupported runtime type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime resolved from a blueprint's `runtime` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    pub kind: RuntimeKind,
    pub version: String,
}

impl Runtime {
    /// `None` when the blueprint names no runtime at all
    pub fn from_spec(spec: &RuntimeSpec) -> Result<Option<Self>, AgentError> {
        if spec.kind.trim().is_empty() {
            return Ok(None);
        }
        let kind = spec.kind.parse()?;
        let version = match spec.version.trim() {
            "" => "latest".to_string(),
            v => v.to_string(),
        };
        Ok(Some(Self { kind, version }))
    }

    /// Version manager tool spec, e.g. `node@20`
    pub fn tool(&self) -> String {
        format!("{}@{}", self.kind, self.version)
    }
}

/// Builds version manager invocations (`mise` by default)
#[derive(Debug, Clone)]
pub struct VersionManager {
    binary: String,
}

impl VersionManager {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Arguments for `<binary> install <tool>`
    pub fn install_args(&self, runtime: &Runtime) -> Vec<String> {
        vec!["install".to_string(), runtime.tool()]
    }

    /// Shell snippet putting the runtime on `PATH` for the rest of the script
    pub fn activate_script(&self, runtime: &Runtime) -> String {
        format!(
            "eval \"$({} env -s bash {})\"",
            shell_quote(&self.binary),
            runtime.tool()
        )
    }

    /// Activation, optionally followed by the build command run in `dir`
    pub fn build_script(&self, runtime: &Runtime, dir: &Path, build_cmd: Option<&str>) -> String {
        let activate = self.activate_script(runtime);
        match build_cmd.map(str::trim).filter(|c| !c.is_empty()) {
            Some(build) => format!(
                "{} && cd {} && {}",
                activate,
                shell_quote(&dir.to_string_lossy()),
                build
            ),
            None => activate,
        }
    }

    /// Argv of the long-running service process.
    ///
    /// The run command always goes through `sh -c` so shell syntax in it
    /// keeps working; non-static runtimes are wrapped in `<binary> exec`.
    pub fn service_argv(&self, runtime: Option<&Runtime>, run_cmd: &str) -> Result<Vec<String>, AgentError> {
        let shell = resolve_executable("sh")?;
        let shell_argv = vec![
            shell.to_string_lossy().to_string(),
            "-c".to_string(),
            run_cmd.to_string(),
        ];

        match runtime {
            Some(runtime) if runtime.kind.needs_install() => {
                let manager = resolve_executable(&self.binary)?;
                let mut argv = vec![
                    manager.to_string_lossy().to_string(),
                    "exec".to_string(),
                    runtime.tool(),
                    "--".to_string(),
                ];
                argv.extend(shell_argv);
                Ok(argv)
            }
            _ => Ok(shell_argv),
        }
    }
}

/// Absolute path of an executable, looked up on `PATH` when not already a path
pub fn resolve_executable(name: &str) -> Result<PathBuf, AgentError> {
    which::which(name).map_err(|e| {
        AgentError::DeployError(format!("executable {} not found: {}", name, e))
    })
}

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
