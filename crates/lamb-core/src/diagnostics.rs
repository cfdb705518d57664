pub mod codes {
    pub const GENERIC: &str = "LMB000";
    pub const BUILD: &str = "LMB100";
    pub const TRANSIENT: &str = "LMB200";
    pub const PERMISSION_DENIED: &str = "LMB300";
    pub const INTEGRITY: &str = "LMB400";
    pub const MISSING_ARTIFACT: &str = "LMB401";
    pub const VERSION_CONFLICT: &str = "LMB500";
    pub const INVALID_INPUT: &str = "LMB501";
    pub const PROVIDER: &str = "LMB600";
}

pub mod commands {
    pub const DIGEST: &str = "digest";
    pub const LATEST: &str = "latest";
    pub const BUILD: &str = "build";
    pub const UPLOAD: &str = "upload";
    pub const PUBLISH: &str = "publish";
    pub const DEPLOY_LAYER: &str = "deploy-layer";
    pub const DEPLOY_SOURCE: &str = "deploy-source";
    pub const GRANT: &str = "grant";
    pub const REVOKE: &str = "revoke";
    pub const VERIFY: &str = "verify";
}
