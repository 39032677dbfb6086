//! Dependency ordering, parallelism and requires/provides substitution.

use std::time::Duration;

use brick_lib::graph::BuildGraph;
use brick_lib::target::TargetState;

use super::common::{TestEnv, assert_all_terminal, l, target};

#[tokio::test]
async fn dependencies_finish_before_dependents() {
  let env = TestEnv::new();
  // Diamond: app -> {left, right} -> base
  env.add(target("//base:base"));
  env.add(target("//left:left").with_dep(l("//base:base")));
  env.add(target("//right:right").with_dep(l("//base:base")));
  env.add(target("//app:app").with_dep(l("//left:left")).with_dep(l("//right:right")));
  env.runner.delay("//left:left", Duration::from_millis(30));

  let summary = env.build(&["//app:app"]).await;
  assert!(summary.is_success());
  assert_all_terminal(&summary, &env.graph);
  assert_eq!(summary.count(TargetState::Built), 4);

  let finished = env.runner.finished();
  let pos = |s: &str| finished.iter().position(|x| *x == l(s)).unwrap();
  assert!(pos("//base:base") < pos("//left:left"));
  assert!(pos("//base:base") < pos("//right:right"));
  assert!(pos("//left:left") < pos("//app:app"));
  assert!(pos("//right:right") < pos("//app:app"));
  assert_eq!(env.runner.calls("//base:base"), 1);
}

#[tokio::test]
async fn unreachable_targets_stay_inactive() {
  let env = TestEnv::new();
  env.add(target("//a:a"));
  env.add(target("//b:b"));

  let summary = env.build(&["//a:a"]).await;
  assert_eq!(summary.outcomes.len(), 1);
  assert_eq!(env.graph.target(&l("//b:b")).unwrap().state(), TargetState::Inactive);
  assert_eq!(env.runner.calls("//b:b"), 0);
}

#[tokio::test]
async fn parallelism_bounds_concurrent_actions() {
  let env = TestEnv::new();
  let mut roots = Vec::new();
  for i in 0..8 {
    let label = format!("//p:t{i}");
    env.add(target(&label));
    env.runner.delay(&label, Duration::from_millis(20));
    roots.push(label);
  }

  let mut config = env.config();
  config.parallelism = 3;
  let roots = roots.iter().map(|r| l(r)).collect::<Vec<_>>();
  let summary = env.scheduler(config).run(&roots).await.unwrap();

  assert_eq!(summary.count(TargetState::Built), 8);
  assert!(env.runner.max_running() <= 3);
  assert!(env.runner.max_running() >= 2);
}

#[tokio::test]
async fn substituted_dependency_replaces_declared_one() {
  let env = TestEnv::with_graph(BuildGraph::new());
  env.add(target("//py:py3"));
  env.add(target("//py:interp").with_provides("py3", l("//py:py3")));
  env.add(target("//app:tool").with_requires("py3").with_dep(l("//py:interp")));

  let summary = env.build(&["//app:tool"]).await;
  assert!(summary.is_success());
  assert_eq!(summary.state(&l("//py:py3")), Some(TargetState::Built));
  assert!(summary.outcome(&l("//py:interp")).is_none());
  assert_eq!(env.runner.calls("//py:interp"), 0);
  assert_eq!(env.graph.resolve_edges(&l("//app:tool")).unwrap(), vec![l("//py:py3")]);
}

#[tokio::test]
async fn exported_dependencies_are_waited_for() {
  let env = TestEnv::new();
  env.add(target("//rt:rt"));
  env.add(target("//lib:lib").with_exported_dep(l("//rt:rt")));
  env.add(target("//app:app").with_dep(l("//lib:lib")));
  env.runner.delay("//rt:rt", Duration::from_millis(20));

  let summary = env.build(&["//app:app"]).await;
  assert!(summary.is_success());
  let finished = env.runner.finished();
  assert_eq!(finished.last(), Some(&l("//app:app")));
}
