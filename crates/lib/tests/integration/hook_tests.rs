//! Pre- and post-build hooks, including graph growth during a build.

use std::sync::Arc;

use brick_lib::events::{EventObserver, Reporter};
use brick_lib::graph::GraphMutationError;
use brick_lib::hooks::{HookError, PostBuildContext, PreBuildContext};
use brick_lib::schedule::{BuildError, FailureCause};
use brick_lib::target::TargetState;

use super::common::{EventLog, Step, TestEnv, assert_all_terminal, l, target};

#[tokio::test]
async fn pre_build_hook_rewrites_command_from_properties() {
  let env = TestEnv::new();
  env.add(target("//cc:opt").with_label("cc:flag=-O2"));
  env.add(target("//cc:warn").with_label("cc:flag=-Wall"));
  env.add(
    target("//app:app")
      .with_dep(l("//cc:opt"))
      .with_dep(l("//cc:warn"))
      .with_pre_build(|ctx: &mut PreBuildContext| -> Result<(), HookError> {
        let props = ctx.properties("cc")?;
        let flags = props.values("flag").join(" ");
        ctx.set_command("default", format!("cc {flags} -o out"));
        Ok(())
      }),
  );

  let summary = env.build(&["//app:app"]).await;
  assert!(summary.is_success());
  assert_eq!(env.runner.command("//app:app").as_deref(), Some("cc -O2 -Wall -o out"));
}

#[tokio::test]
async fn post_build_hook_registers_discovered_outputs() {
  let env = TestEnv::new();
  env.add(target("//gen:gen").with_post_build(
    |ctx: &mut PostBuildContext, stdout: &str| -> Result<(), HookError> {
      for line in stdout.lines() {
        ctx.add_output(line);
      }
      Ok(())
    },
  ));
  env.runner.extra_file("//gen:gen", "gen.h");
  env.runner.script("//gen:gen", vec![Step::Stdout("gen.h\n".into())]);

  let summary = env.build(&["//gen:gen"]).await;
  assert!(summary.is_success());
  assert!(env.dir.path().join("brick-out/gen/gen/gen.h").exists());
  assert!(env.dir.path().join("brick-out/gen/gen/out").exists());
}

#[tokio::test]
async fn post_build_hook_adds_target_and_waits_for_it() {
  let env = TestEnv::new();
  env.add(target("//app:app").with_post_build(
    |ctx: &mut PostBuildContext, _stdout: &str| -> Result<(), HookError> {
      let added = ctx.add_target(target("//app:generated"))?;
      ctx.add_dependency(&added)?;
      Ok(())
    },
  ));
  env.add(target("//app:user").with_dep(l("//app:app")));

  let log = Arc::new(EventLog::default());
  let reporter = Reporter::init(vec![log.clone() as Arc<dyn EventObserver>], 64);
  let summary = env
    .scheduler_with(env.config(), reporter.clone())
    .run(&[l("//app:user")])
    .await
    .unwrap();
  reporter.shutdown().await;

  assert_all_terminal(&summary, &env.graph);
  assert_eq!(summary.state(&l("//app:generated")), Some(TargetState::Built));
  assert_eq!(summary.state(&l("//app:app")), Some(TargetState::Built));
  assert_eq!(summary.state(&l("//app:user")), Some(TargetState::Built));
  assert_eq!(
    log.labels(),
    vec![l("//app:generated"), l("//app:app"), l("//app:user")]
  );

  // The next build starts from the declared graph again; a cache hit skips
  // the hook, so the generated target is not re-added.
  let again = env.build(&["//app:user"]).await;
  assert!(again.is_success());
  assert_eq!(again.state(&l("//app:app")), Some(TargetState::Cached));
  assert!(again.outcome(&l("//app:generated")).is_none());
  assert!(env.graph.target(&l("//app:generated")).is_none());
}

#[tokio::test]
async fn failed_late_dependency_leaves_nothing_cached() {
  let env = TestEnv::new();
  env.add(target("//app:app").with_post_build(
    |ctx: &mut PostBuildContext, _stdout: &str| -> Result<(), HookError> {
      let added = ctx.add_target(target("//app:generated"))?;
      ctx.add_dependency(&added)?;
      Ok(())
    },
  ));
  env.runner.script("//app:generated", vec![Step::Fail, Step::Fail]);

  let first = env.build(&["//app:app"]).await;
  assert_all_terminal(&first, &env.graph);
  assert_eq!(first.state(&l("//app:generated")), Some(TargetState::Failed));
  let outcome = first.outcome(&l("//app:app")).unwrap();
  assert_eq!(outcome.state, TargetState::Failed);
  assert_eq!(
    outcome.cause,
    Some(FailureCause::DependencyFailed {
      dependency: l("//app:generated")
    })
  );
  assert!(outcome.output_hash.is_none());
  assert!(!env.dir.path().join("brick-out/gen/app/out").exists());

  // No cache entry was written, so the hook runs again and fails again.
  let second = env.build(&["//app:app"]).await;
  assert_eq!(second.state(&l("//app:app")), Some(TargetState::Failed));
  assert_eq!(second.state(&l("//app:generated")), Some(TargetState::Failed));
  assert_eq!(env.runner.calls("//app:app"), 2);
}

#[tokio::test]
async fn post_build_cycle_is_fatal() {
  let env = TestEnv::new();
  env.add(target("//a:a").with_post_build(
    |ctx: &mut PostBuildContext, _stdout: &str| -> Result<(), HookError> {
      // //b:b already depends on //a:a.
      ctx.add_dependency(&l("//b:b"))?;
      Ok(())
    },
  ));
  env.add(target("//b:b").with_dep(l("//a:a")));

  let err = env
    .scheduler(env.config())
    .run(&[l("//b:b")])
    .await
    .unwrap_err();
  match err {
    BuildError::GraphMutation { label, source } => {
      assert_eq!(label, l("//a:a"));
      assert!(matches!(source, GraphMutationError::Cycle { .. }));
    }
    other => panic!("expected a graph mutation error, got {other:?}"),
  }
  assert_eq!(env.graph.target(&l("//a:a")).unwrap().state(), TargetState::Failed);
  assert_eq!(env.graph.target(&l("//b:b")).unwrap().state(), TargetState::Failed);
  assert_eq!(env.runner.calls("//b:b"), 0);
}

#[tokio::test]
async fn swallowed_mutation_error_is_still_fatal() {
  let env = TestEnv::new();
  env.add(target("//a:a").with_post_build(
    |ctx: &mut PostBuildContext, _stdout: &str| -> Result<(), HookError> {
      let _ = ctx.add_dependency(&l("//a:a"));
      Ok(())
    },
  ));

  let err = env.scheduler(env.config()).run(&[l("//a:a")]).await.unwrap_err();
  assert!(matches!(err, BuildError::GraphMutation { .. }));
}

#[tokio::test]
async fn hook_failure_fails_only_the_target() {
  let env = TestEnv::new();
  env.add(target("//a:a").with_pre_build(|_: &mut PreBuildContext| -> Result<(), HookError> {
    Err(HookError::failed("missing toolchain"))
  }));

  let summary = env.build(&["//a:a"]).await;
  let outcome = summary.outcome(&l("//a:a")).unwrap();
  assert_eq!(
    outcome.cause,
    Some(FailureCause::Hook {
      message: "missing toolchain".into()
    })
  );
  assert_eq!(env.runner.calls("//a:a"), 0);
}
