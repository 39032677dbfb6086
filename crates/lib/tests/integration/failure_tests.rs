//! Failure propagation in strict and best-effort mode.

use std::time::Duration;

use brick_lib::config::FailureMode;
use brick_lib::schedule::{BuildError, FailureCause};
use brick_lib::target::TargetState;

use super::common::{Step, TestEnv, assert_all_terminal, l, target};

fn setup() -> TestEnv {
  let env = TestEnv::new();
  env.add(target("//bad:bad"));
  env.add(target("//bad:user").with_dep(l("//bad:bad")));
  env.add(target("//slow:slow"));
  env.add(target("//slow:user").with_dep(l("//slow:slow")));
  env.runner.script("//bad:bad", vec![Step::Fail]);
  env.runner.delay("//slow:slow", Duration::from_millis(100));
  env
}

#[tokio::test]
async fn strict_mode_stops_dispatching() {
  let env = setup();
  let mut config = env.config();
  config.parallelism = 2;

  let roots = [l("//bad:user"), l("//slow:user")];
  let summary = env.scheduler(config).run(&roots).await.unwrap();
  assert_all_terminal(&summary, &env.graph);

  let bad = summary.outcome(&l("//bad:bad")).unwrap();
  assert_eq!(bad.state, TargetState::Failed);
  assert!(matches!(bad.cause, Some(FailureCause::Action { .. })));

  let user = summary.outcome(&l("//bad:user")).unwrap();
  assert_eq!(user.cause, Some(FailureCause::DependencyFailed { dependency: l("//bad:bad") }));
  assert_eq!(env.runner.calls("//bad:user"), 0);

  // Already running when the failure happened: allowed to finish.
  assert_eq!(summary.state(&l("//slow:slow")), Some(TargetState::Built));
  // Became ready after the failure: never dispatched.
  let slow_user = summary.outcome(&l("//slow:user")).unwrap();
  assert_eq!(slow_user.state, TargetState::Failed);
  assert_eq!(slow_user.cause, Some(FailureCause::Cancelled));
  assert_eq!(slow_user.attempts, 0);
  assert!(!summary.is_success());
}

#[tokio::test]
async fn best_effort_builds_unrelated_targets() {
  let env = setup();
  let mut config = env.config();
  config.parallelism = 2;
  config.failure_mode = FailureMode::BestEffort;

  let roots = [l("//bad:user"), l("//slow:user")];
  let summary = env.scheduler(config).run(&roots).await.unwrap();
  assert_all_terminal(&summary, &env.graph);

  assert_eq!(summary.state(&l("//bad:user")), Some(TargetState::Failed));
  assert_eq!(summary.state(&l("//slow:user")), Some(TargetState::Built));
  assert_eq!(summary.failed().count(), 2);
}

#[tokio::test]
async fn failure_propagates_transitively() {
  let env = TestEnv::new();
  env.add(target("//a:a"));
  env.add(target("//b:b").with_dep(l("//a:a")));
  env.add(target("//c:c").with_dep(l("//b:b")));
  env.runner.script("//a:a", vec![Step::Fail]);

  let summary = env.build(&["//c:c"]).await;
  assert_eq!(
    summary.outcome(&l("//c:c")).unwrap().cause,
    Some(FailureCause::DependencyFailed { dependency: l("//b:b") })
  );
  assert_eq!(env.runner.total_calls(), 1);
}

#[tokio::test]
async fn cycle_is_rejected_before_anything_runs() {
  let env = TestEnv::new();
  env.add(target("//a:a").with_dep(l("//b:b")));
  env.add(target("//b:b").with_dep(l("//a:a")));

  let err = env
    .scheduler(env.config())
    .run(&[l("//a:a")])
    .await
    .unwrap_err();
  match err {
    BuildError::Dependency(e) => assert!(e.to_string().contains("cycle")),
    other => panic!("expected a cycle, got {other:?}"),
  }
  assert_eq!(env.runner.total_calls(), 0);
  assert_eq!(env.graph.target(&l("//a:a")).unwrap().state(), TargetState::Inactive);
}

#[tokio::test]
async fn failed_target_is_retried_on_next_build() {
  let env = TestEnv::new();
  env.add(target("//a:a"));
  env.runner.script("//a:a", vec![Step::Fail]);

  let first = env.build(&["//a:a"]).await;
  assert_eq!(first.state(&l("//a:a")), Some(TargetState::Failed));

  let second = env.build(&["//a:a"]).await;
  assert_eq!(second.state(&l("//a:a")), Some(TargetState::Built));
  assert_eq!(env.runner.calls("//a:a"), 2);
}
