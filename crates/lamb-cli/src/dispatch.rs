use std::fs;

use anyhow::{Context, Result};
use lamb_core::{
    api as ops, diag_commands as commands, ArtifactUpload, Config, DeployError, Effects,
    ExecutionOutcome, LayerDeployRequest, SourceDeployRequest, SystemEffects,
};
use lamb_domain::{
    ArtifactKind, BuildContext, BuildStrategy, IgnoreRules, PermissionGrant, StorageLayout,
};
use lamb_store::ObjectMetadata;
use serde_json::json;
use tracing::debug;

use crate::cli::{
    BuildArgs, CommandGroupCli, DigestArgs, KindArg, LatestCommand, PermissionArgs, RevokeArgs,
    SelectionArgs, StrategyArg, UploadArgs,
};

/// Runs one subcommand. Every error, configuration included, is rendered as
/// an outcome.
pub fn dispatch_command(group: &CommandGroupCli) -> (&'static str, ExecutionOutcome) {
    let name = command_name(group);
    let outcome = match run(group) {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(error = ?err, "command failed");
            ExecutionOutcome::from_error(&err)
        }
    };
    (name, outcome)
}

fn command_name(group: &CommandGroupCli) -> &'static str {
    match group {
        CommandGroupCli::Digest(_) => commands::DIGEST,
        CommandGroupCli::Latest(_) => commands::LATEST,
        CommandGroupCli::Build(_) => commands::BUILD,
        CommandGroupCli::Upload(_) => commands::UPLOAD,
        CommandGroupCli::Publish(_) => commands::PUBLISH,
        CommandGroupCli::DeployLayer(_) => commands::DEPLOY_LAYER,
        CommandGroupCli::DeploySource(_) => commands::DEPLOY_SOURCE,
        CommandGroupCli::Grant(_) => commands::GRANT,
        CommandGroupCli::Revoke(_) => commands::REVOKE,
        CommandGroupCli::Verify(_) => commands::VERIFY,
    }
}

struct Session {
    config: Config,
    effects: SystemEffects,
    layout: StorageLayout,
}

impl Session {
    fn open() -> Result<Self> {
        let config = Config::from_env()?;
        let effects = SystemEffects::from_config(&config);
        let layout = config.layout();
        debug!(
            storage = %config.storage_root.display(),
            registry = %config.registry_root.display(),
            prefix = layout.root(),
            "configuration loaded"
        );
        Ok(Self {
            config,
            effects,
            layout,
        })
    }
}

fn run(group: &CommandGroupCli) -> Result<ExecutionOutcome> {
    let session = Session::open()?;
    let effects: &dyn Effects = &session.effects;
    match group {
        CommandGroupCli::Digest(args) => digest(args),
        CommandGroupCli::Latest(LatestCommand::Layer { name }) => {
            match ops::get_latest_layer_version(effects, name)? {
                Some(record) => Ok(ExecutionOutcome::success(
                    format!("{name} is at version {}", record.version),
                    serde_json::to_value(&record)?,
                )),
                None => Ok(ExecutionOutcome::success(
                    format!("{name} has no published versions"),
                    json!({ "layer_name": name, "version": null }),
                )),
            }
        }
        CommandGroupCli::Latest(LatestCommand::Source { name }) => {
            match ops::get_latest_source_version(effects, &session.layout, name)? {
                Some(latest) => Ok(ExecutionOutcome::success(
                    format!("{name} is at version {}", latest.version),
                    serde_json::to_value(&latest)?,
                )),
                None => Ok(ExecutionOutcome::success(
                    format!("{name} has no stored versions"),
                    json!({ "name": name, "version": null }),
                )),
            }
        }
        CommandGroupCli::Build(args) => {
            let context = build_context(&session.config, kind(args.kind), &args.build);
            let built = ops::build_artifact(effects, &context)?;
            Ok(ExecutionOutcome::success(
                format!(
                    "built {} ({} files, digest {})",
                    built.archive_path.display(),
                    built.file_count,
                    built.digest.short(12)
                ),
                serde_json::to_value(&built)?,
            ))
        }
        CommandGroupCli::Upload(args) => upload(effects, &session.layout, args),
        CommandGroupCli::Publish(args) => {
            let verified = ops::verify_artifact(effects, &args.key)?;
            let record =
                ops::publish_layer(effects, &args.layer, &args.key, &verified.digest, &args.runtimes)?;
            Ok(ExecutionOutcome::success(
                format!("published {}", record.arn),
                serde_json::to_value(&record)?,
            ))
        }
        CommandGroupCli::DeployLayer(args) => {
            let request = LayerDeployRequest {
                layer_name: args.name.clone(),
                context: build_context(&session.config, ArtifactKind::Layer, &args.build),
                compatible_runtimes: args.runtimes.clone(),
                metadata: metadata(&args.metadata),
            };
            let deployed = ops::deploy_layer(effects, &session.layout, &request)?;
            let message = if deployed.is_new {
                format!("published {} version {}", deployed.layer_name, deployed.layer_version)
            } else {
                format!(
                    "{} is unchanged at version {}",
                    deployed.layer_name, deployed.layer_version
                )
            };
            Ok(ExecutionOutcome::success(message, serde_json::to_value(&deployed)?))
        }
        CommandGroupCli::DeploySource(args) => {
            let request = SourceDeployRequest {
                name: args.name.clone(),
                version: args.version.clone(),
                context: build_context(&session.config, ArtifactKind::Source, &args.build),
                metadata: metadata(&args.metadata),
            };
            let deployed = ops::deploy_source_artifacts(effects, &session.layout, &request)?;
            let message = if deployed.is_new {
                format!("stored {} version {}", deployed.name, deployed.version)
            } else {
                format!("{} is unchanged at version {}", deployed.name, deployed.version)
            };
            Ok(ExecutionOutcome::success(message, serde_json::to_value(&deployed)?))
        }
        CommandGroupCli::Grant(args) => {
            let grant = permission_grant(args);
            let change = ops::grant_permission(effects, &grant)?;
            Ok(ExecutionOutcome::success(
                format!("{} {}", grant.statement_id, change.as_str()),
                json!({ "change": change, "grant": grant }),
            ))
        }
        CommandGroupCli::Revoke(args) => revoke(effects, args),
        CommandGroupCli::Verify(args) => {
            let record = ops::verify_artifact(effects, &args.key)?;
            Ok(ExecutionOutcome::success(
                format!("{} matches digest {}", record.key, record.digest.short(12)),
                serde_json::to_value(&record)?,
            ))
        }
    }
}

fn digest(args: &DigestArgs) -> Result<ExecutionOutcome> {
    let digest = ops::compute_digest_of_paths(&args.paths, &ignore_rules(&args.selection))?;
    Ok(ExecutionOutcome::success(
        digest.to_string(),
        json!({
            "digest": digest,
            "paths": args.paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        }),
    ))
}

fn upload(effects: &dyn Effects, layout: &StorageLayout, args: &UploadArgs) -> Result<ExecutionOutcome> {
    let bytes = fs::read(&args.archive)
        .with_context(|| format!("failed to read {}", args.archive.display()))?;
    let digest = lamb_core::digest_archive(&bytes)?;
    let key = match (kind(args.kind), &args.version) {
        (ArtifactKind::Layer, _) => layout.layer_key(&args.name, &digest),
        (ArtifactKind::Source, Some(version)) => layout.source_key(&args.name, version, &digest),
        (ArtifactKind::Source, None) => {
            return Err(DeployError::InvalidInput(
                "source uploads need --version".to_string(),
            )
            .into())
        }
    };
    let metadata = metadata(&args.metadata);
    let stored = ops::upload_artifact(
        effects,
        &ArtifactUpload {
            name: &args.name,
            version: args.version.as_deref(),
            key: &key,
            digest: &digest,
            archive: &args.archive,
            metadata: &metadata,
        },
    )?;
    let message = if stored.uploaded {
        format!("uploaded {key}")
    } else {
        format!("{key} already stored")
    };
    Ok(ExecutionOutcome::success(message, serde_json::to_value(&stored)?))
}

fn revoke(effects: &dyn Effects, args: &RevokeArgs) -> Result<ExecutionOutcome> {
    let (statement_id, change) = match (&args.statement_id, &args.principal) {
        (Some(statement_id), _) => (
            statement_id.clone(),
            ops::revoke_statement(effects, &args.layer, args.version, statement_id)?,
        ),
        (None, Some(principal)) => {
            let grant = PermissionGrant::new(
                &args.layer,
                args.version,
                principal,
                args.action,
                args.organization.as_deref(),
            );
            let change = ops::revoke_permission(effects, &grant)?;
            (grant.statement_id, change)
        }
        (None, None) => {
            return Err(DeployError::InvalidInput(
                "pass --principal or --statement-id".to_string(),
            )
            .into())
        }
    };
    Ok(ExecutionOutcome::success(
        format!("{statement_id} {}", change.as_str()),
        json!({
            "change": change,
            "layer_name": args.layer,
            "version": args.version,
            "statement_id": statement_id,
        }),
    ))
}

fn permission_grant(args: &PermissionArgs) -> PermissionGrant {
    let grant = PermissionGrant::new(
        &args.layer,
        args.version,
        &args.principal,
        args.action,
        args.organization.as_deref(),
    );
    match &args.statement_id {
        Some(statement_id) => grant.with_statement_id(statement_id),
        None => grant,
    }
}

fn kind(arg: KindArg) -> ArtifactKind {
    match arg {
        KindArg::Layer => ArtifactKind::Layer,
        KindArg::Source => ArtifactKind::Source,
    }
}

fn ignore_rules(selection: &SelectionArgs) -> IgnoreRules {
    IgnoreRules {
        default_ignores: !selection.no_default_ignores,
        ..IgnoreRules::default()
    }
    .with_include(selection.include.iter().cloned())
    .with_exclude(selection.exclude.iter().cloned())
}

fn metadata(pairs: &[(String, String)]) -> ObjectMetadata {
    pairs.iter().cloned().collect()
}

pub(crate) fn build_context(config: &Config, kind: ArtifactKind, args: &BuildArgs) -> BuildContext {
    let strategy = match args.strategy {
        StrategyArg::StageAndZip => BuildStrategy::StageAndZip,
        StrategyArg::PipRequirements => BuildStrategy::PipRequirements {
            requirements: args
                .requirements
                .clone()
                .unwrap_or_else(|| "requirements.txt".into()),
        },
        StrategyArg::PipProject => BuildStrategy::PipProject {
            project_root: args.project_root.clone().unwrap_or_else(|| ".".into()),
        },
        StrategyArg::PoetryWheel => BuildStrategy::PoetryWheel {
            project_root: args.project_root.clone().unwrap_or_else(|| ".".into()),
        },
        StrategyArg::PythonBuild => BuildStrategy::PythonBuild {
            project_root: args.project_root.clone().unwrap_or_else(|| ".".into()),
        },
    };
    let mut context = BuildContext::new(kind, &args.build_dir, strategy)
        .with_sources(args.sources.iter().cloned());
    context.rules = ignore_rules(&args.selection);
    context.tools = config.tools.clone();
    if let Some(pip) = &args.pip {
        context.tools.pip = pip.clone();
    }
    if let Some(poetry) = &args.poetry {
        context.tools.poetry = poetry.clone();
    }
    if let Some(python) = &args.python {
        context.tools.python = python.clone();
    }
    if args.keep_runtime_packages {
        context.runtime_packages.clear();
    } else if !args.runtime_packages.is_empty() {
        context.runtime_packages = args.runtime_packages.clone();
    }
    context.extra_args = args.extra_args.clone();
    context.entry_point = args.entry_point.clone();
    context
}
