//! Flaky targets and their retry budget.

use std::sync::Arc;

use brick_lib::config::FailureMode;
use brick_lib::events::{EventObserver, Reporter};
use brick_lib::hooks::{HookError, PostBuildContext};
use brick_lib::schedule::FailureCause;
use brick_lib::target::TargetState;

use super::common::{EventLog, Step, TestEnv, l, target};

#[tokio::test]
async fn flaky_target_succeeds_within_budget() {
  let env = TestEnv::new();
  let mut flaky = target("//t:flaky");
  flaky.flaky = 2;
  env.add(flaky);
  env.add(target("//t:user").with_dep(l("//t:flaky")));
  env.runner.script("//t:flaky", vec![Step::Fail, Step::Fail, Step::Succeed]);

  let log = Arc::new(EventLog::default());
  let reporter = Reporter::init(vec![log.clone() as Arc<dyn EventObserver>], 64);
  let summary = env
    .scheduler_with(env.config(), reporter.clone())
    .run(&[l("//t:user")])
    .await
    .unwrap();
  reporter.shutdown().await;

  let outcome = summary.outcome(&l("//t:flaky")).unwrap();
  assert_eq!(outcome.state, TargetState::Built);
  assert_eq!(outcome.attempts, 3);
  assert_eq!(env.runner.calls("//t:flaky"), 3);
  assert_eq!(summary.state(&l("//t:user")), Some(TargetState::Built));

  // Dependents only ever see the final result.
  assert_eq!(log.labels(), vec![l("//t:flaky"), l("//t:user")]);
}

#[tokio::test]
async fn exhausted_budget_fails() {
  let env = TestEnv::new();
  let mut flaky = target("//t:flaky");
  flaky.flaky = 1;
  env.add(flaky);
  env.runner.script("//t:flaky", vec![Step::Fail, Step::Fail, Step::Succeed]);

  let summary = env.build(&["//t:flaky"]).await;
  let outcome = summary.outcome(&l("//t:flaky")).unwrap();
  assert_eq!(outcome.state, TargetState::Failed);
  assert_eq!(outcome.attempts, 2);
}

#[tokio::test]
async fn timeouts_use_the_same_budget() {
  let env = TestEnv::new();
  let mut flaky = target("//t:slow");
  flaky.flaky = 1;
  env.add(flaky);
  env.add(target("//t:strict"));
  env.runner.script("//t:slow", vec![Step::Timeout, Step::Succeed]);
  env.runner.script("//t:strict", vec![Step::Timeout]);

  let mut config = env.config();
  config.failure_mode = FailureMode::BestEffort;
  let summary = env
    .scheduler(config)
    .run(&[l("//t:slow"), l("//t:strict")])
    .await
    .unwrap();

  assert_eq!(summary.state(&l("//t:slow")), Some(TargetState::Built));
  let strict = summary.outcome(&l("//t:strict")).unwrap();
  assert_eq!(strict.attempts, 1);
  assert!(matches!(strict.cause, Some(FailureCause::Timeout { .. })));
}

#[tokio::test]
async fn failing_tests_are_retried() {
  let env = TestEnv::new();
  let mut test = target("//t:test").with_post_build(
    |ctx: &mut PostBuildContext, stdout: &str| -> Result<(), HookError> {
      let failed = stdout.trim().parse().unwrap_or(0);
      ctx.set_test_results(5, failed);
      Ok(())
    },
  );
  test.test = true;
  test.flaky = 1;
  env.add(test);
  env.runner.script("//t:test", vec![Step::Stdout("2".into()), Step::Stdout("0".into())]);

  let summary = env.build(&["//t:test"]).await;
  let outcome = summary.outcome(&l("//t:test")).unwrap();
  assert_eq!(outcome.state, TargetState::Built);
  assert_eq!(outcome.attempts, 2);
  let tests = outcome.tests.clone().unwrap();
  assert_eq!((tests.num_tests, tests.failed, tests.cached), (5, 0, false));
}
