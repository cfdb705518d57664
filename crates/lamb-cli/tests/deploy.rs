mod common;

use common::{bucket_objects, Sandbox};

const LAYER_ARGS: &[&str] = &["deploy-layer", "shared", "--source", "src", "--runtime", "python3.12"];

#[test]
fn deploy_layer_twice_publishes_once() {
    let sandbox = Sandbox::new("lamb-deploy-layer");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");

    let (assert, first) = sandbox.json(LAYER_ARGS);
    assert.success();
    assert_eq!(first["status"], "ok");
    let details = &first["details"];
    assert_eq!(details["is_new"], true);
    assert_eq!(details["layer_version"], 1);
    let digest = details["digest"].as_str().expect("digest").to_string();
    assert_eq!(
        details["storage_key"],
        format!("lambda/layer/shared/{digest}.zip")
    );

    let (assert, second) = sandbox.json(LAYER_ARGS);
    assert.success();
    assert_eq!(second["details"]["is_new"], false);
    assert_eq!(second["details"]["layer_version"], 1);
    assert_eq!(second["details"]["digest"], digest.as_str());
    assert_eq!(bucket_objects(&sandbox.bucket()).len(), 1);
}

#[test]
fn changed_content_publishes_next_version() {
    let sandbox = Sandbox::new("lamb-deploy-change");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");
    let (assert, first) = sandbox.json(LAYER_ARGS);
    assert.success();

    sandbox.write("src/mylib/__init__.py", "VALUE = 2\n");
    let (assert, second) = sandbox.json(LAYER_ARGS);
    assert.success();
    assert_eq!(second["details"]["is_new"], true);
    assert_eq!(second["details"]["layer_version"], 2);
    assert_ne!(second["details"]["digest"], first["details"]["digest"]);

    let (assert, latest) = sandbox.json(&["latest", "layer", "shared"]);
    assert.success();
    assert_eq!(latest["details"]["version"], 2);
    assert_eq!(latest["details"]["digest"], second["details"]["digest"]);
}

#[test]
fn deploy_source_counts_versions() {
    let sandbox = Sandbox::new("lamb-deploy-source");
    sandbox.write("src/mylib/handler.py", "def handler(event, context):\n    return 1\n");
    let args = ["deploy-source", "api", "--source", "src"];

    let (assert, first) = sandbox.json(&args);
    assert.success();
    assert_eq!(first["details"]["version"], "000001");
    assert_eq!(first["details"]["is_new"], true);

    let (assert, again) = sandbox.json(&args);
    assert.success();
    assert_eq!(again["details"]["version"], "000001");
    assert_eq!(again["details"]["is_new"], false);

    sandbox.write("src/mylib/handler.py", "def handler(event, context):\n    return 2\n");
    let (assert, next) = sandbox.json(&args);
    assert.success();
    assert_eq!(next["details"]["version"], "000002");

    let (assert, latest) = sandbox.json(&["latest", "source", "api"]);
    assert.success();
    assert_eq!(latest["details"]["version"], "000002");
    assert_eq!(bucket_objects(&sandbox.bucket()).len(), 2);
}

#[test]
fn stale_explicit_version_is_a_user_error() {
    let sandbox = Sandbox::new("lamb-source-conflict");
    sandbox.write("src/mylib/handler.py", "A = 1\n");
    sandbox
        .json(&["deploy-source", "api", "--source", "src", "--version", "2.0.0"])
        .0
        .success();

    sandbox.write("src/mylib/handler.py", "A = 2\n");
    let (assert, payload) =
        sandbox.json(&["deploy-source", "api", "--source", "src", "--version", "1.5.0"]);
    assert.code(1);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["code"], "LMB500");
}

#[test]
fn human_output_names_the_version() {
    let sandbox = Sandbox::new("lamb-human");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");
    let assert = sandbox.lamb().args(LAYER_ARGS).assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(
        stdout.contains("lamb deploy-layer: published shared version 1"),
        "unexpected output: {stdout}"
    );
    assert!(stdout.contains("layer_version_arn:"), "unexpected output: {stdout}");

    let assert = sandbox.lamb().arg("--quiet").args(LAYER_ARGS).assert().success();
    assert!(assert.get_output().stdout.is_empty());
}
