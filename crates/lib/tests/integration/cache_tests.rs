//! Cache idempotence, invalidation and corruption.

use std::sync::Arc;

use brick_lib::cache::{Cache, DirCache};
use brick_lib::events::Reporter;
use brick_lib::schedule::{BuildError, Scheduler};
use brick_lib::target::TargetState;

use super::common::{TestEnv, assert_all_terminal, l, target};

#[tokio::test]
async fn unchanged_rebuild_is_fully_cached() {
  let env = TestEnv::new();
  env.write_source("lib/lib.c", "int x;");
  env.add(target("//lib:lib").with_source("lib/lib.c"));
  env.add(target("//app:app").with_dep(l("//lib:lib")));

  let first = env.build(&["//app:app"]).await;
  assert_eq!(first.count(TargetState::Built), 2);
  let calls = env.runner.total_calls();

  let second = env.build(&["//app:app"]).await;
  assert_all_terminal(&second, &env.graph);
  assert_eq!(second.count(TargetState::Cached), 2);
  assert!(second.outcomes.values().all(|o| o.cache_hit));
  assert_eq!(env.runner.total_calls(), calls);
  assert_eq!(
    first.outcome(&l("//app:app")).unwrap().output_hash,
    second.outcome(&l("//app:app")).unwrap().output_hash
  );
}

#[tokio::test]
async fn changed_source_rebuilds_target_and_dependents() {
  let env = TestEnv::new();
  env.write_source("lib/lib.c", "int x;");
  env.add(target("//lib:lib").with_source("lib/lib.c"));
  env.add(target("//app:app").with_dep(l("//lib:lib")));
  env.add(target("//other:other"));

  env.build(&["//app:app", "//other:other"]).await;

  env.write_source("lib/lib.c", "int y;");
  env.runner.set_content("//lib:lib", "lib v2");
  let summary = env.build(&["//app:app", "//other:other"]).await;

  assert_eq!(summary.state(&l("//lib:lib")), Some(TargetState::Built));
  assert_eq!(summary.state(&l("//app:app")), Some(TargetState::Built));
  assert_eq!(summary.state(&l("//other:other")), Some(TargetState::Cached));
  assert_eq!(env.runner.calls("//lib:lib"), 2);
  assert_eq!(env.runner.calls("//app:app"), 2);
  assert_eq!(env.runner.calls("//other:other"), 1);
}

#[tokio::test]
async fn identical_output_after_rebuild_is_reused() {
  let env = TestEnv::new();
  env.write_source("lib/lib.c", "int x;");
  env.add(target("//lib:lib").with_source("lib/lib.c"));

  let scheduler = env.scheduler(env.config());
  let first = scheduler.run(&[l("//lib:lib")]).await.unwrap();
  assert_eq!(first.state(&l("//lib:lib")), Some(TargetState::Built));

  // A comment-only edit: new fingerprint, same output.
  env.write_source("lib/lib.c", "int x; // note");
  let second = scheduler.run(&[l("//lib:lib")]).await.unwrap();
  assert_eq!(second.state(&l("//lib:lib")), Some(TargetState::Reused));
  assert_eq!(env.runner.calls("//lib:lib"), 2);
}

#[tokio::test]
async fn corrupted_entry_aborts_the_build() {
  let env = TestEnv::new();
  env.add(target("//lib:lib"));
  env.add(target("//app:app").with_dep(l("//lib:lib")));

  let cache = Arc::new(DirCache::new(env.dir.path().join("cache")));
  let run = |cache: Arc<DirCache>| {
    Scheduler::new(
      env.graph.clone(),
      cache as Arc<dyn Cache>,
      env.runner.clone(),
      env.config(),
      Reporter::disabled(),
    )
  };

  run(cache.clone()).run(&[l("//app:app")]).await.unwrap();
  let fingerprint = env.graph.target(&l("//lib:lib")).unwrap().fingerprint().unwrap();
  std::fs::write(cache.entry_path(&fingerprint).join("out"), "tampered").unwrap();

  let scheduler = run(cache);
  let err = scheduler.run(&[l("//app:app")]).await.unwrap_err();
  assert!(matches!(err, BuildError::CacheCorruption { ref label, .. } if *label == l("//lib:lib")));

  let lib = env.graph.target(&l("//lib:lib")).unwrap();
  assert_eq!(lib.state(), TargetState::Failed);
  assert_eq!(env.graph.target(&l("//app:app")).unwrap().state(), TargetState::Failed);
  assert_eq!(env.runner.calls("//lib:lib"), 1);
}
