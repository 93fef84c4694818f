//! Validator and packager against scripted tools

mod support;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use sa_channel_core::config::{ArchiverConfig, LinterConfig, SignerConfig};
use sa_channel_core::packaging::PackagingStep;
use sa_channel_core::{PackagingError, ReleasePackager, SyntaxValidator, ValidationError};
use support::ScriptedRunner;

fn write_artifact(dir: &Path) -> std::path::PathBuf {
    let artifact = dir.join("spam-core.cf");
    fs::write(&artifact, "body A_RULE /a_rule/i\nscore A_RULE 2.5\n").unwrap();
    artifact
}

fn packager(runner: &Arc<ScriptedRunner>) -> ReleasePackager {
    ReleasePackager::new(runner.clone(), ArchiverConfig::default(), SignerConfig::default())
}

#[test]
fn lint_command_substitutes_artifact_path() {
    let runner = Arc::new(ScriptedRunner::passing());
    let validator = SyntaxValidator::new(runner.clone(), LinterConfig::default());
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());

    let result = validator.validate(&artifact).unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0], "--lint");
    assert_eq!(calls[0].args[1], format!("--cf=include {}", artifact.display()));
    assert_eq!(calls[0].timeout, support::TIMEOUT);
    assert_eq!(result.artifact, artifact);
    assert!(result.diagnostics.is_empty());
}

#[test]
fn lint_rejection_carries_diagnostics() {
    let runner = Arc::new(ScriptedRunner::passing().exit(
        "spamassassin",
        1,
        "config: failed to parse line, skipping, in \"spam-core.cf\": score A_RULE x\n",
    ));
    let validator = SyntaxValidator::new(runner, LinterConfig::default());
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());

    match validator.validate(&artifact).unwrap_err() {
        ValidationError::ValidationFailed {
            artifact: rejected,
            exit_code,
            diagnostics,
        } => {
            assert_eq!(rejected, artifact);
            assert_eq!(exit_code, Some(1));
            assert!(diagnostics.ends_with("score A_RULE x"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn missing_or_hung_linter_is_unavailable() {
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());

    for runner in [
        ScriptedRunner::passing().missing("spamassassin"),
        ScriptedRunner::passing().timing_out("spamassassin"),
    ] {
        let validator = SyntaxValidator::new(Arc::new(runner), LinterConfig::default());
        let err = validator.validate(&artifact).unwrap_err();
        assert!(
            matches!(err, ValidationError::ValidatorUnavailable { .. }),
            "unexpected error {:?}",
            err
        );
    }
}

#[test]
fn package_writes_archive_then_signature() {
    let runner = Arc::new(ScriptedRunner::passing());
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());

    let bundle = packager(&runner).package(&artifact, out.path(), "releases@example.org").unwrap();

    assert_eq!(runner.programs(), ["tar", "gpg"]);
    let sign = &runner.calls()[1];
    assert!(sign.args.contains(&"--detach-sign".to_string()));
    let key = sign.args.iter().position(|a| a == "--default-key").unwrap();
    assert_eq!(sign.args[key + 1], "releases@example.org");

    assert!(bundle.archive.is_file());
    assert!(fs::read_to_string(&bundle.signature)
        .unwrap()
        .starts_with("-----BEGIN PGP SIGNATURE-----"));
    assert!(!out.path().join(".spam-core.tar.bz2.partial").exists());
    assert!(!out.path().join(".spam-core.tar.bz2.asc.partial").exists());
}

#[test]
fn archive_failure_never_signs() {
    let runner = Arc::new(ScriptedRunner::passing().exit("tar", 2, "tar: spam-core.cf: Cannot stat"));
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());

    let err = packager(&runner).package(&artifact, out.path(), "k").unwrap_err();

    let PackagingError::PackagingFailed {
        step,
        exit_code,
        stderr,
    } = err;
    assert_eq!(step, PackagingStep::Archive);
    assert_eq!(exit_code, Some(2));
    assert!(stderr.contains("Cannot stat"));
    assert_eq!(runner.programs(), ["tar"]);

    let names: Vec<_> = fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["spam-core.cf"]);
}

#[test]
fn sign_failure_leaves_no_archive() {
    let runner = Arc::new(ScriptedRunner::passing().exit("gpg", 2, "gpg: signing failed: No secret key"));
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());

    let err = packager(&runner).package(&artifact, out.path(), "k").unwrap_err();

    assert!(err.to_string().contains("sign step"));
    assert!(!out.path().join("spam-core.tar.bz2").exists());
    assert!(!out.path().join("spam-core.tar.bz2.asc").exists());
    assert!(!out.path().join(".spam-core.tar.bz2.partial").exists());
}

#[test]
fn signer_timeout_is_a_packaging_failure() {
    let runner = Arc::new(ScriptedRunner::passing().timing_out("gpg"));
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());

    let PackagingError::PackagingFailed {
        step, exit_code, ..
    } = packager(&runner).package(&artifact, out.path(), "k").unwrap_err();
    assert_eq!(step, PackagingStep::Sign);
    assert_eq!(exit_code, None);
    assert!(!out.path().join("spam-core.tar.bz2").exists());
}

#[test]
fn repackaging_replaces_stale_bundle() {
    let runner = Arc::new(ScriptedRunner::passing());
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());
    fs::write(out.path().join("spam-core.tar.bz2"), "old archive").unwrap();
    fs::write(out.path().join("spam-core.tar.bz2.asc"), "old signature").unwrap();

    let bundle = packager(&runner).package(&artifact, out.path(), "k").unwrap();

    assert_ne!(fs::read_to_string(&bundle.archive).unwrap(), "old archive");
    assert_ne!(fs::read_to_string(&bundle.signature).unwrap(), "old signature");
}

#[test]
fn failed_repackaging_keeps_previous_bundle() {
    let runner = Arc::new(ScriptedRunner::passing().exit("gpg", 2, "gpg: signing failed"));
    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());
    fs::write(out.path().join("spam-core.tar.bz2"), "old archive").unwrap();
    fs::write(out.path().join("spam-core.tar.bz2.asc"), "old signature").unwrap();

    packager(&runner).package(&artifact, out.path(), "k").unwrap_err();

    assert_eq!(fs::read_to_string(out.path().join("spam-core.tar.bz2")).unwrap(), "old archive");
    assert_eq!(
        fs::read_to_string(out.path().join("spam-core.tar.bz2.asc")).unwrap(),
        "old signature"
    );
}

#[cfg(unix)]
#[test]
fn linter_killed_by_signal_is_unavailable() {
    use sa_channel_core::SystemRunner;

    let out = tempfile::tempdir().unwrap();
    let artifact = write_artifact(out.path());
    let linter = LinterConfig {
        bin: "sh".into(),
        args: vec!["-c".into(), "kill -9 $$".into(), "{artifact}".into()],
        timeout_secs: 5,
    };

    let err = SyntaxValidator::new(Arc::new(SystemRunner), linter)
        .validate(&artifact)
        .unwrap_err();
    match err {
        ValidationError::ValidatorUnavailable { linter, reason } => {
            assert_eq!(linter, "sh");
            assert_eq!(reason, "terminated by signal");
        }
        other => panic!("unexpected error {:?}", other),
    }
}
