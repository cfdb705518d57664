//! Build context: where one build reads sources, stages files, and writes its archive.

use std::{
    io,
    path::{self, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Packages already present in the Lambda Python runtime; they are left out of
/// layer archives unless the caller supplies a different list.
pub const DEFAULT_RUNTIME_PACKAGES: &[&str] = &[
    "boto3",
    "botocore",
    "s3transfer",
    "urllib3",
    "setuptools",
    "pip",
    "wheel",
    "twine",
    "_pytest",
    "pytest",
];

const STAGE_DIR: &str = "stage";
const LAYER_PYTHON_DIR: &str = "python";
const DIST_DIR: &str = "dist";
const LOCK_FILENAME: &str = ".lamb.lock";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Layer,
    Source,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Layer => "layer",
            Self::Source => "source",
        }
    }

    #[must_use]
    pub fn archive_file_name(self) -> &'static str {
        match self {
            Self::Layer => "layer.zip",
            Self::Source => "source.zip",
        }
    }
}

/// How the staging directory gets populated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum BuildStrategy {
    /// Copy the filtered source roots into the staging directory.
    StageAndZip,
    /// `pip install -r <requirements> -t <stage>`.
    PipRequirements { requirements: PathBuf },
    /// `pip install <project_root> --no-dependencies --target <stage>`.
    PipProject { project_root: PathBuf },
    /// `poetry build -f wheel`, then install the wheel into the stage without deps.
    PoetryWheel { project_root: PathBuf },
    /// `python -m build --wheel`, then install the wheel into the stage without deps.
    PythonBuild { project_root: PathBuf },
}

impl BuildStrategy {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::StageAndZip => "stage-and-zip",
            Self::PipRequirements { .. } => "pip-requirements",
            Self::PipProject { .. } => "pip-project",
            Self::PoetryWheel { .. } => "poetry-wheel",
            Self::PythonBuild { .. } => "python-build",
        }
    }

    fn absolute(&self) -> io::Result<Self> {
        Ok(match self {
            Self::StageAndZip => Self::StageAndZip,
            Self::PipRequirements { requirements } => Self::PipRequirements {
                requirements: path::absolute(requirements)?,
            },
            Self::PipProject { project_root } => Self::PipProject {
                project_root: path::absolute(project_root)?,
            },
            Self::PoetryWheel { project_root } => Self::PoetryWheel {
                project_root: path::absolute(project_root)?,
            },
            Self::PythonBuild { project_root } => Self::PythonBuild {
                project_root: path::absolute(project_root)?,
            },
        })
    }
}

/// Gitignore-style include/exclude globs. Excludes win over includes; when any
/// include is present, files matching no include are dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRules {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub default_ignores: bool,
}

fn default_true() -> bool {
    true
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            default_ignores: true,
        }
    }
}

impl IgnoreRules {
    #[must_use]
    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(patterns.into_iter().map(Into::into));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub pip: PathBuf,
    pub python: PathBuf,
    pub poetry: PathBuf,
}

impl ToolPaths {
    /// Bare program names stay as they are so `PATH` lookup still applies.
    fn absolute(&self) -> io::Result<Self> {
        Ok(Self {
            pip: absolute_tool(&self.pip)?,
            python: absolute_tool(&self.python)?,
            poetry: absolute_tool(&self.poetry)?,
        })
    }
}

fn absolute_tool(tool: &Path) -> io::Result<PathBuf> {
    if tool.components().count() > 1 {
        path::absolute(tool)
    } else {
        Ok(tool.to_path_buf())
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pip: PathBuf::from("pip"),
            python: PathBuf::from("python3"),
            poetry: PathBuf::from("poetry"),
        }
    }
}

/// Everything one build invocation needs. A context is never shared between
/// concurrent builds; each owns its `dir_build`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub kind: ArtifactKind,
    /// Source roots copied by [`BuildStrategy::StageAndZip`]; directories land
    /// under their own name, files at the stage root.
    pub sources: Vec<PathBuf>,
    pub dir_build: PathBuf,
    /// Selection rules applied to `sources` (relative to each source root).
    pub rules: IgnoreRules,
    pub strategy: BuildStrategy,
    pub tools: ToolPaths,
    /// Packages provided by the runtime; pass-through, never interpreted.
    pub runtime_packages: Vec<String>,
    /// Extra arguments appended to the build tool invocation.
    pub extra_args: Vec<String>,
    /// Lambda handler script copied into the stage root (source artifacts).
    pub entry_point: Option<PathBuf>,
    pub quiet: bool,
}

impl BuildContext {
    #[must_use]
    pub fn new(kind: ArtifactKind, dir_build: impl Into<PathBuf>, strategy: BuildStrategy) -> Self {
        let runtime_packages = match kind {
            ArtifactKind::Layer => DEFAULT_RUNTIME_PACKAGES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            ArtifactKind::Source => Vec::new(),
        };
        Self {
            kind,
            sources: Vec::new(),
            dir_build: dir_build.into(),
            rules: IgnoreRules::default(),
            strategy,
            tools: ToolPaths::default(),
            runtime_packages,
            extra_args: Vec::new(),
            entry_point: None,
            quiet: false,
        }
    }

    #[must_use]
    pub fn with_sources<I, P>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sources.extend(sources.into_iter().map(Into::into));
        self
    }

    /// `${dir_build}/stage`
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.dir_build.join(STAGE_DIR)
    }

    /// Directory build tools install into. Layers nest under `python/` so the
    /// runtime finds them on `sys.path`.
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        match self.kind {
            ArtifactKind::Layer => self.staging_dir().join(LAYER_PYTHON_DIR),
            ArtifactKind::Source => self.staging_dir(),
        }
    }

    /// `${dir_build}/dist`, where wheel-building strategies put their wheel.
    #[must_use]
    pub fn dist_dir(&self) -> PathBuf {
        self.dir_build.join(DIST_DIR)
    }

    /// `${dir_build}/layer.zip` or `${dir_build}/source.zip`
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.dir_build.join(self.kind.archive_file_name())
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir_build.join(LOCK_FILENAME)
    }

    /// Rules applied to the staged tree before hashing and zipping: the default
    /// ignore set plus one anchored exclude per runtime-provided package.
    #[must_use]
    pub fn staged_rules(&self) -> IgnoreRules {
        let prefix = match self.kind {
            ArtifactKind::Layer => format!("/{LAYER_PYTHON_DIR}/"),
            ArtifactKind::Source => "/".to_string(),
        };
        IgnoreRules::default().with_exclude(
            self.runtime_packages
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(|name| format!("{prefix}{name}*")),
        )
    }

    /// The same context with every path resolved against the current
    /// directory. Build tools run in other directories, so relative paths
    /// would otherwise be resolved twice.
    pub fn absolute(&self) -> io::Result<Self> {
        Ok(Self {
            sources: self
                .sources
                .iter()
                .map(path::absolute)
                .collect::<io::Result<_>>()?,
            dir_build: path::absolute(&self.dir_build)?,
            strategy: self.strategy.absolute()?,
            tools: self.tools.absolute()?,
            entry_point: self.entry_point.as_deref().map(path::absolute).transpose()?,
            ..self.clone()
        })
    }
}
