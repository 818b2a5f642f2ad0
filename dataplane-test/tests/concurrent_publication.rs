use l4_dataplane_api::Kind;
use l4_dataplane_core::Locality;
use l4_dataplane_index::Decision;
use l4_dataplane_test::{endpoints, init_tracing, service, TestEnv};
use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};

const READERS: usize = 4;
const UPDATES: usize = 200;
const TRAILING_CONNECTS: usize = 100;

const DENY_ALL: &str = r#"
kind: AuthorizationPolicy
metadata:
  namespace: sample
  name: deny-all
spec:
  action: DENY
  selector:
    matchLabels:
      app: helloworld
  rules:
    - {}
"#;

fn locality() -> Locality {
    Locality::new("region", "zone1", "subzone1")
}

fn publish(env: &TestEnv, addrs: &[&str]) {
    let locality = locality();
    env.apply(&endpoints(
        "sample",
        "helloworld",
        5000,
        addrs.iter().map(|addr| (*addr, &locality)),
    ));
}

fn socket_addrs(addrs: &[&str]) -> HashSet<SocketAddr> {
    addrs
        .iter()
        .map(|addr| format!("{addr}:5000").parse().unwrap())
        .collect()
}

#[test]
fn readers_never_observe_torn_or_stale_tables() {
    let _tracing = init_tracing();
    let env = TestEnv::default();
    env.apply(&service("sample", "helloworld", "10.96.0.10", None));

    let a = ["10.0.1.1", "10.0.1.2"];
    let b = ["10.0.2.1", "10.0.2.2"];
    let last = ["10.0.3.1"];
    publish(&env, &a);

    let known = socket_addrs(&a)
        .into_iter()
        .chain(socket_addrs(&b))
        .chain(socket_addrs(&last))
        .collect::<HashSet<_>>();
    let last = socket_addrs(&last);
    let done = AtomicBool::new(false);

    let (env, done, known, last) = (&env, &done, &known, &last);
    std::thread::scope(|s| {
        let readers = (0..READERS)
            .map(move |_| {
                s.spawn(move || {
                    let client = locality();
                    let mut trailing = 0;
                    while trailing < TRAILING_CONNECTS {
                        let published = done.load(Ordering::Acquire);
                        match env.connect("10.0.0.9", "10.96.0.10:5000", &client) {
                            Decision::Forward { addr, endpoint } => {
                                assert_eq!(addr, endpoint.addr);
                                assert!(known.contains(&addr), "unknown endpoint {addr}");
                                if published {
                                    assert!(last.contains(&addr), "stale endpoint {addr}");
                                }
                            }
                            Decision::Deny { .. } => {
                                assert!(!published, "denied after the policy was deleted")
                            }
                            decision => panic!("unexpected decision {decision:?}"),
                        }
                        if published {
                            trailing += 1;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for i in 0..UPDATES {
            publish(env, if i % 2 == 0 { &b } else { &a });
            if i % 3 == 0 {
                env.apply(DENY_ALL);
            } else {
                env.delete(Kind::AuthorizationPolicy, "sample", "deny-all");
            }
        }
        env.delete(Kind::AuthorizationPolicy, "sample", "deny-all");
        publish(env, &["10.0.3.1"]);
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
    });

    assert_eq!(env.reader().registry().endpoints_len(), 1);
}
