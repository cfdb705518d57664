//! Turns a [`BuildContext`] into one deterministic archive.
//!
//! Every strategy fills the staging directory; the staged tree is then filtered
//! (default ignores plus runtime-provided packages), hashed, and zipped from
//! the same file list.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{anyhow, bail, Context, Result};
use lamb_domain::{ArtifactKind, BuildContext, BuildStrategy, ContentDigest};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    archive::write_archive,
    hasher::{collect_files, collect_files_skipping, digest_entries},
    lock::BuildLock,
    process::CommandRunner,
    DeployError,
};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltArtifact {
    pub kind: ArtifactKind,
    pub archive_path: PathBuf,
    pub staging_dir: PathBuf,
    pub digest: ContentDigest,
    pub file_count: usize,
    pub size: u64,
}

/// Builds the archive described by `ctx`.
///
/// # Errors
///
/// Fails with [`DeployError::Build`] when another build holds the build
/// directory or a build tool fails, and with [`DeployError::InvalidInput`] when
/// a source path is missing.
pub fn build(ctx: &BuildContext, runner: &dyn CommandRunner) -> Result<BuiltArtifact> {
    let ctx = &ctx
        .absolute()
        .with_context(|| format!("failed to resolve paths under {}", ctx.dir_build.display()))?;
    fs::create_dir_all(&ctx.dir_build)
        .with_context(|| format!("failed to create {}", ctx.dir_build.display()))?;
    let Some(_lock) = BuildLock::try_acquire(&ctx.lock_path())? else {
        bail!(DeployError::build(format!(
            "another build is using {}",
            ctx.dir_build.display()
        )));
    };

    let staging = ctx.staging_dir();
    reset_dir(&staging)?;
    let archive_path = ctx.archive_path();
    if archive_path.exists() {
        fs::remove_file(&archive_path)
            .with_context(|| format!("failed to remove {}", archive_path.display()))?;
    }
    let install_dir = ctx.install_dir();
    fs::create_dir_all(&install_dir)
        .with_context(|| format!("failed to create {}", install_dir.display()))?;

    info!(
        kind = ctx.kind.as_str(),
        strategy = ctx.strategy.label(),
        dir = %ctx.dir_build.display(),
        "staging artifact"
    );
    match &ctx.strategy {
        BuildStrategy::StageAndZip => stage_sources(ctx)?,
        BuildStrategy::PipRequirements { requirements } => {
            pip_requirements(ctx, runner, requirements)?;
        }
        BuildStrategy::PipProject { project_root } => pip_project(ctx, runner, project_root)?,
        BuildStrategy::PoetryWheel { project_root } => poetry_wheel(ctx, runner, project_root)?,
        BuildStrategy::PythonBuild { project_root } => python_build(ctx, runner, project_root)?,
    }
    if let Some(entry_point) = &ctx.entry_point {
        copy_entry_point(entry_point, &staging)?;
    }

    let staged = collect_files(&staging, &ctx.staged_rules())?;
    let digest = digest_entries(&staged)?;
    let size = write_archive(&staged, &archive_path)?;
    info!(
        files = staged.len(),
        bytes = size,
        digest = digest.short(12),
        archive = %archive_path.display(),
        "artifact built"
    );
    Ok(BuiltArtifact {
        kind: ctx.kind,
        archive_path,
        staging_dir: staging,
        digest,
        file_count: staged.len(),
        size,
    })
}

fn reset_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("failed to clear {}", path.display()))?;
    }
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

fn stage_sources(ctx: &BuildContext) -> Result<()> {
    if ctx.sources.is_empty() {
        bail!(DeployError::InvalidInput(
            "stage-and-zip needs at least one source path".to_string()
        ));
    }
    let build_dir = ctx
        .dir_build
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", ctx.dir_build.display()))?;
    let install_dir = ctx.install_dir();
    let mut seen = BTreeSet::new();
    for source in &ctx.sources {
        let root = source.canonicalize().map_err(|_| {
            anyhow!(DeployError::InvalidInput(format!(
                "source path {} does not exist",
                source.display()
            )))
        })?;
        let name = root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("source path {} has no usable name", root.display()))?
            .to_string();
        let prefix = if root.is_file() {
            None
        } else {
            Some(name)
        };
        for entry in collect_files_skipping(&root, &ctx.rules, Some(&build_dir))? {
            let relative = match &prefix {
                Some(prefix) => format!("{prefix}/{}", entry.relative),
                None => entry.relative,
            };
            if !seen.insert(relative.clone()) {
                bail!(DeployError::InvalidInput(format!(
                    "more than one source provides {relative}"
                )));
            }
            let dest = relative
                .split('/')
                .fold(install_dir.clone(), |path, part| path.join(part));
            copy_file(&entry.path, &dest)?;
        }
    }
    debug!(files = seen.len(), "sources staged");
    Ok(())
}

fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::copy(src, dest).with_context(|| {
        format!("failed to copy {} to {}", src.display(), dest.display())
    })?;
    Ok(())
}

fn copy_entry_point(entry_point: &Path, staging: &Path) -> Result<()> {
    if !entry_point.is_file() {
        bail!(DeployError::InvalidInput(format!(
            "entry point {} is not a file",
            entry_point.display()
        )));
    }
    let name = entry_point
        .file_name()
        .ok_or_else(|| anyhow!("entry point {} has no file name", entry_point.display()))?;
    copy_file(entry_point, &staging.join(name))
}

fn pip_requirements(
    ctx: &BuildContext,
    runner: &dyn CommandRunner,
    requirements: &Path,
) -> Result<()> {
    if !requirements.is_file() {
        bail!(DeployError::InvalidInput(format!(
            "requirements file {} does not exist",
            requirements.display()
        )));
    }
    let mut args = vec![
        "install".to_string(),
        "-r".to_string(),
        path_arg(requirements),
        "-t".to_string(),
        path_arg(&ctx.install_dir()),
    ];
    push_common_args(ctx, &mut args);
    let cwd = requirements
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(ctx.dir_build.as_path());
    run_tool(runner, &path_arg(&ctx.tools.pip), &args, cwd)
}

fn pip_project(ctx: &BuildContext, runner: &dyn CommandRunner, project_root: &Path) -> Result<()> {
    ensure_project_root(project_root)?;
    let mut args = vec![
        "install".to_string(),
        path_arg(project_root),
        "--no-dependencies".to_string(),
        "--target".to_string(),
        path_arg(&ctx.install_dir()),
    ];
    push_common_args(ctx, &mut args);
    run_tool(runner, &path_arg(&ctx.tools.pip), &args, project_root)
}

fn poetry_wheel(ctx: &BuildContext, runner: &dyn CommandRunner, project_root: &Path) -> Result<()> {
    ensure_project_root(project_root)?;
    let started = SystemTime::now();
    let mut build_args = vec!["build".to_string(), "-f".to_string(), "wheel".to_string()];
    if ctx.quiet {
        build_args.push("--quiet".to_string());
    }
    run_tool(runner, &path_arg(&ctx.tools.poetry), &build_args, project_root)?;

    let wheel = newest_wheel(&project_root.join("dist"), started, "poetry")?;
    install_wheel(ctx, runner, &wheel, project_root)
}

fn python_build(ctx: &BuildContext, runner: &dyn CommandRunner, project_root: &Path) -> Result<()> {
    ensure_project_root(project_root)?;
    let dist = ctx.dist_dir();
    reset_dir(&dist)?;
    let started = SystemTime::now();
    let build_args = vec![
        "-m".to_string(),
        "build".to_string(),
        "--wheel".to_string(),
        "--outdir".to_string(),
        path_arg(&dist),
        path_arg(project_root),
    ];
    run_tool(runner, &path_arg(&ctx.tools.python), &build_args, project_root)?;

    let wheel = newest_wheel(&dist, started, "python -m build")?;
    install_wheel(ctx, runner, &wheel, project_root)
}

fn install_wheel(
    ctx: &BuildContext,
    runner: &dyn CommandRunner,
    wheel: &Path,
    cwd: &Path,
) -> Result<()> {
    debug!(wheel = %wheel.display(), "installing built wheel");
    let mut args = vec![
        "install".to_string(),
        path_arg(wheel),
        "--no-dependencies".to_string(),
        "--target".to_string(),
        path_arg(&ctx.install_dir()),
    ];
    push_common_args(ctx, &mut args);
    run_tool(runner, &path_arg(&ctx.tools.pip), &args, cwd)
}

/// The wheel written by the last build; older wheels in `dist/` are ignored
/// when a fresh one exists.
fn newest_wheel(dist: &Path, started: SystemTime, tool: &str) -> Result<PathBuf> {
    let mut wheels = Vec::new();
    if dist.is_dir() {
        for entry in fs::read_dir(dist).with_context(|| format!("failed to read {}", dist.display()))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "whl") {
                let modified = entry.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                wheels.push((modified, path));
            }
        }
    }
    wheels.sort();
    let fresh = wheels.iter().rev().find(|(modified, _)| *modified >= started);
    fresh
        .or_else(|| wheels.last())
        .map(|(_, path)| path.clone())
        .ok_or_else(|| {
            anyhow!(DeployError::build(format!(
                "{tool} did not produce a wheel in {}",
                dist.display()
            )))
        })
}

fn ensure_project_root(project_root: &Path) -> Result<()> {
    if project_root.is_dir() {
        Ok(())
    } else {
        bail!(DeployError::InvalidInput(format!(
            "project root {} is not a directory",
            project_root.display()
        )))
    }
}

fn push_common_args(ctx: &BuildContext, args: &mut Vec<String>) {
    if ctx.quiet {
        args.push("--quiet".to_string());
    }
    args.extend(ctx.extra_args.iter().cloned());
}

fn tool_env() -> Vec<(String, String)> {
    vec![
        ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
        ("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string()),
    ]
}

fn run_tool(runner: &dyn CommandRunner, program: &str, args: &[String], cwd: &Path) -> Result<()> {
    let output = runner
        .run(program, args, &tool_env(), cwd)
        .map_err(|err| anyhow!(DeployError::build(format!("{program} could not run: {err:#}"))))?;
    if !output.success() {
        bail!(DeployError::build(format!(
            "{program} {} exited with status {}: {}",
            args.first().map(String::as_str).unwrap_or_default(),
            output.code,
            output.tail(STDERR_TAIL_LINES)
        )));
    }
    Ok(())
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
