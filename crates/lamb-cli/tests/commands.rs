mod common;

use std::{fs, io::Write};

use common::Sandbox;

#[test]
fn digest_ignores_caches() {
    let sandbox = Sandbox::new("lamb-digest");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");
    let (assert, before) = sandbox.json(&["digest", "src"]);
    assert.success();

    sandbox.write("src/mylib/__pycache__/__init__.cpython-312.pyc", "junk");
    let (assert, after) = sandbox.json(&["digest", "src"]);
    assert.success();
    assert_eq!(before["details"]["digest"], after["details"]["digest"]);

    let (assert, all) = sandbox.json(&["digest", "src", "--no-default-ignores"]);
    assert.success();
    assert_ne!(before["details"]["digest"], all["details"]["digest"]);
}

#[test]
fn digest_of_missing_path_is_a_user_error() {
    let sandbox = Sandbox::new("lamb-digest-missing");
    let (assert, payload) = sandbox.json(&["digest", "nowhere"]);
    assert.code(1);
    assert_eq!(payload["details"]["code"], "LMB501");
}

#[test]
fn upload_publish_and_verify_step_by_step() {
    let sandbox = Sandbox::new("lamb-steps");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");

    let (assert, built) = sandbox.json(&["build", "--source", "src"]);
    assert.success();
    let archive = built["details"]["archive_path"]
        .as_str()
        .expect("archive path")
        .to_string();

    let (assert, stored) = sandbox.json(&["upload", "shared", &archive]);
    assert.success();
    assert_eq!(stored["details"]["uploaded"], true);
    let key = stored["details"]["record"]["key"]
        .as_str()
        .expect("key")
        .to_string();
    assert_eq!(stored["details"]["record"]["digest"], built["details"]["digest"]);

    let (assert, again) = sandbox.json(&["upload", "shared", &archive]);
    assert.success();
    assert_eq!(again["details"]["uploaded"], false);

    let (assert, published) = sandbox.json(&["publish", "shared", "--key", &key]);
    assert.success();
    assert_eq!(published["details"]["version"], 1);
    assert_eq!(published["details"]["digest"], built["details"]["digest"]);

    let (assert, verified) = sandbox.json(&["verify", &key]);
    assert.success();
    assert_eq!(verified["details"]["key"], key.as_str());
}

#[test]
fn verify_detects_tampering() {
    let sandbox = Sandbox::new("lamb-tamper");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");
    let (assert, deployed) =
        sandbox.json(&["deploy-layer", "shared", "--source", "src"]);
    assert.success();
    let key = deployed["details"]["storage_key"]
        .as_str()
        .expect("key")
        .to_string();

    let file = fs::File::create(sandbox.bucket().join(&key)).expect("replace stored object");
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("mylib/__init__.py", zip::write::FileOptions::default())
        .expect("start entry");
    writer.write_all(b"VALUE = 666\n").expect("write entry");
    writer.finish().expect("finish archive");

    let (assert, payload) = sandbox.json(&["verify", &key]);
    assert.code(2);
    assert_eq!(payload["details"]["code"], "LMB400");
}

#[test]
fn verify_missing_key_reports_missing_artifact() {
    let sandbox = Sandbox::new("lamb-verify-missing");
    let (assert, payload) = sandbox.json(&["verify", "lambda/layer/shared/nothing.zip"]);
    assert.code(2);
    assert_eq!(payload["details"]["code"], "LMB401");
}

#[test]
fn source_upload_requires_version() {
    let sandbox = Sandbox::new("lamb-upload-source");
    sandbox.write("src/mylib/handler.py", "A = 1\n");
    let (assert, built) = sandbox.json(&["build", "--kind", "source", "--source", "src"]);
    assert.success();
    let archive = built["details"]["archive_path"].as_str().expect("archive");

    let (assert, payload) = sandbox.json(&["upload", "api", archive, "--kind", "source"]);
    assert.code(1);
    assert_eq!(payload["details"]["code"], "LMB501");
}

#[test]
fn grant_and_revoke_are_idempotent() {
    let sandbox = Sandbox::new("lamb-perms");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");
    sandbox
        .json(&["deploy-layer", "shared", "--source", "src"])
        .0
        .success();

    let grant = ["grant", "shared", "1", "--principal", "123456789012"];
    let (assert, first) = sandbox.json(&grant);
    assert.success();
    assert_eq!(first["details"]["change"], "added");
    let (assert, second) = sandbox.json(&grant);
    assert.success();
    assert_eq!(second["details"]["change"], "already-present");

    let revoke = ["revoke", "shared", "1", "--principal", "123456789012"];
    let (assert, removed) = sandbox.json(&revoke);
    assert.success();
    assert_eq!(removed["details"]["change"], "removed");
    let (assert, absent) = sandbox.json(&revoke);
    assert.success();
    assert_eq!(absent["details"]["change"], "already-absent");
}

#[test]
fn grant_and_revoke_by_statement_id() {
    let sandbox = Sandbox::new("lamb-perms-sid");
    sandbox.write("src/mylib/__init__.py", "VALUE = 1\n");
    sandbox
        .json(&["deploy-layer", "shared", "--source", "src"])
        .0
        .success();

    let (assert, granted) = sandbox.json(&[
        "grant",
        "shared",
        "1",
        "--principal",
        "123456789012",
        "--statement-id",
        "share-with-billing",
    ]);
    assert.success();
    assert_eq!(granted["details"]["change"], "added");
    assert_eq!(granted["details"]["grant"]["statement_id"], "share-with-billing");

    let revoke = ["revoke", "shared", "1", "--statement-id", "share-with-billing"];
    let (assert, removed) = sandbox.json(&revoke);
    assert.success();
    assert_eq!(removed["details"]["change"], "removed");
    let (assert, absent) = sandbox.json(&revoke);
    assert.success();
    assert_eq!(absent["details"]["change"], "already-absent");
}

#[test]
fn latest_without_deployments_is_empty() {
    let sandbox = Sandbox::new("lamb-latest-empty");
    let (assert, layer) = sandbox.json(&["latest", "layer", "shared"]);
    assert.success();
    assert!(layer["details"]["version"].is_null());

    let (assert, source) = sandbox.json(&["latest", "source", "api"]);
    assert.success();
    assert!(source["details"]["version"].is_null());
}
