use l4_dataplane_core::Locality;
use l4_dataplane_index::Decision;
use l4_dataplane_test::{endpoints, init_tracing, service, TestEnv};
use std::sync::Arc;

const MANIFESTS: &[&str] = &[
    r#"
kind: AuthorizationPolicy
metadata:
  namespace: sample
  name: deny-8080
spec:
  action: DENY
  selector:
    matchLabels:
      app: helloworld
  rules:
    - to:
        - operation:
            ports: ["8080"]
"#,
    r#"
kind: AuthorizationPolicy
metadata:
  namespace: mesh-system
  name: allow-cluster
spec:
  rules:
    - from:
        - source:
            ipBlocks: ["10.0.0.0/8"]
"#,
];

fn client() -> Locality {
    Locality::new("region", "zone1", "subzone1")
}

fn outcomes(env: &TestEnv) -> Vec<Decision> {
    [
        ("10.0.0.9", "10.96.0.10:8080"),
        ("10.0.0.9", "10.96.0.10:5000"),
        ("192.0.2.1", "10.96.0.10:5000"),
        ("10.0.0.9", "10.0.1.1:5000"),
        ("10.0.0.9", "192.0.2.7:443"),
    ]
    .into_iter()
    .map(|(src, dst)| env.connect(src, dst, &client()))
    .collect()
}

fn setup(env: &TestEnv) {
    env.apply(&service("sample", "helloworld", "10.96.0.10", Some("Local")));
    env.apply(&endpoints("sample", "helloworld", 5000, [("10.0.1.1", &client())]));
    for manifest in MANIFESTS {
        env.apply(manifest);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn reapplying_is_a_noop() {
    let _tracing = init_tracing();
    let env = TestEnv::default();
    setup(&env);
    let before = outcomes(&env);
    let policies = env.reader().policies();
    let registry = env.reader().registry();

    setup(&env);
    assert_eq!(outcomes(&env), before);
    assert!(Arc::ptr_eq(&policies, &env.reader().policies()));
    assert!(Arc::ptr_eq(&registry, &env.reader().registry()));

    assert!(matches!(before[0], Decision::Deny { .. }));
    assert!(matches!(before[1], Decision::Forward { .. }));
    assert!(matches!(before[2], Decision::Deny { .. }));
    assert!(matches!(before[3], Decision::Forward { .. }));
    assert_eq!(before[4], Decision::Passthrough);
}

#[tokio::test(flavor = "current_thread")]
async fn policy_order_does_not_matter() {
    let _tracing = init_tracing();
    let forward = TestEnv::default();
    setup(&forward);

    let reverse = TestEnv::default();
    for manifest in MANIFESTS.iter().rev() {
        reverse.apply(manifest);
    }
    reverse.apply(&endpoints("sample", "helloworld", 5000, [("10.0.1.1", &client())]));
    reverse.apply(&service("sample", "helloworld", "10.96.0.10", Some("Local")));

    assert_eq!(outcomes(&forward), outcomes(&reverse));
}
