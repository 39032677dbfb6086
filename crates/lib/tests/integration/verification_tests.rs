//! Output hash verification.

use brick_lib::config::VerificationMode;
use brick_lib::schedule::FailureCause;
use brick_lib::target::TargetState;

use super::common::{TestEnv, l, target};

fn pinned(hashes: &[&str]) -> TestEnv {
  let env = TestEnv::new();
  let mut desc = target("//dl:archive");
  desc.accepted_hashes = hashes.iter().map(|h| h.to_string()).collect();
  env.add(desc);
  env.add(target("//app:app").with_dep(l("//dl:archive")));
  env
}

#[tokio::test]
async fn unaccepted_hash_fails_in_strict_mode() {
  let env = pinned(&["abc"]);
  let summary = env.build(&["//app:app"]).await;

  let outcome = summary.outcome(&l("//dl:archive")).unwrap();
  assert_eq!(outcome.state, TargetState::Failed);
  assert!(matches!(outcome.cause, Some(FailureCause::HashMismatch { .. })));
  assert_eq!(summary.state(&l("//app:app")), Some(TargetState::Failed));
  assert_eq!(env.runner.calls("//app:app"), 0);
}

#[tokio::test]
async fn unaccepted_hash_warns_in_lenient_mode() {
  let env = pinned(&["abc"]);
  let mut config = env.config();
  config.verification = VerificationMode::Lenient;

  let summary = env.scheduler(config).run(&[l("//app:app")]).await.unwrap();
  assert_eq!(summary.state(&l("//dl:archive")), Some(TargetState::Built));
  assert_eq!(summary.state(&l("//app:app")), Some(TargetState::Built));
}

/// Output digest of `//dl:archive` built without pins.
async fn archive_digest() -> String {
  let env = pinned(&[]);
  let summary = env.build(&["//dl:archive"]).await;
  summary.outcome(&l("//dl:archive")).unwrap().output_hash.clone().unwrap().0
}

#[tokio::test]
async fn full_digest_is_accepted() {
  let digest = archive_digest().await;

  let env = pinned(&["0000000000", &format!("sha256:{}", digest.to_uppercase())]);
  let summary = env.build(&["//app:app"]).await;
  assert!(summary.is_success());
}

#[tokio::test]
async fn digest_prefix_is_rejected() {
  let digest = archive_digest().await;

  let env = pinned(&[&digest[..12]]);
  let summary = env.build(&["//app:app"]).await;
  let outcome = summary.outcome(&l("//dl:archive")).unwrap();
  assert_eq!(outcome.state, TargetState::Failed);
  assert!(matches!(outcome.cause, Some(FailureCause::HashMismatch { .. })));
}

#[tokio::test]
async fn cached_artifact_is_verified_against_current_pins() {
  let unpinned = pinned(&[]);
  let first = unpinned.build(&["//dl:archive"]).await;
  assert_eq!(first.state(&l("//dl:archive")), Some(TargetState::Built));

  // Same target and cache, now pinned to a different digest.
  let mut strict = pinned(&["abc"]);
  strict.cache = unpinned.cache.clone();
  let summary = strict.build(&["//dl:archive"]).await;
  let outcome = summary.outcome(&l("//dl:archive")).unwrap();
  assert_eq!(outcome.state, TargetState::Failed);
  assert!(matches!(outcome.cause, Some(FailureCause::HashMismatch { .. })));
  assert_eq!(strict.runner.calls("//dl:archive"), 0);

  let mut config = strict.config();
  config.verification = VerificationMode::Lenient;
  let summary = strict.scheduler(config).run(&[l("//dl:archive")]).await.unwrap();
  assert_eq!(summary.state(&l("//dl:archive")), Some(TargetState::Cached));
}
