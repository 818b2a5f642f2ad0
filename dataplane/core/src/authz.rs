//! Connection admission.
//!
//! Policies are compiled by the index and grouped per destination service into a [`PolicySet`].
//! Evaluation follows deny-overrides semantics:
//!
//! 1. If any DENY policy matches the connection, the connection is denied.
//! 2. If there are no ALLOW policies, the connection is allowed.
//! 3. If any ALLOW policy matches the connection, the connection is allowed.
//! 4. Otherwise, the connection is denied.
//!
//! A destination without any policies is always allowed.

use crate::{endpoint::ServiceRef, network_match::NetworkMatch, ports::PortSet};
use ahash::AHashMap as HashMap;
use serde::Serialize;
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    num::NonZeroU16,
    sync::Arc,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Allow,
    Deny,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PolicyRef {
    pub namespace: String,
    pub name: String,
}

/// A compiled authorization policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub reference: PolicyRef,
    pub action: Action,

    /// The policy matches a connection if any of its rules match. A policy without rules matches
    /// nothing.
    pub rules: Vec<Rule>,
}

/// A conjunction of clauses. A rule without clauses matches every connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rule {
    pub clauses: Vec<Clause>,
}

/// A single connection constraint. Each clause matches if any of its values match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Clause {
    DestPort(PortSet),
    SourceIp(Vec<NetworkMatch>),
    DestIp(Vec<NetworkMatch>),
}

/// The L4 properties of a connection attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    pub src: IpAddr,
    pub dst: SocketAddr,
}

/// Records which dimensions of a connection satisfied a rule.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Match {
    pub port: Option<u16>,
    pub source: Option<IpAddr>,
    pub destination: Option<IpAddr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Denial {
    /// A DENY policy matched the connection.
    Policy { policy: PolicyRef, matched: Match },

    /// ALLOW policies exist for the destination but none matched.
    NotAllowed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(Denial),
}

/// The policies that apply to a single destination, partitioned by action.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicySet {
    deny: Vec<Arc<Policy>>,
    allow: Vec<Arc<Policy>>,
}

/// Policies by destination service.
#[derive(Clone, Debug, Default)]
pub struct PolicyTable {
    by_service: HashMap<ServiceRef, Arc<PolicySet>>,
}

// === impl Action ===

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => "ALLOW".fmt(f),
            Self::Deny => "DENY".fmt(f),
        }
    }
}

// === impl PolicyRef ===

impl PolicyRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Policy ===

impl Policy {
    /// Returns the first matching rule's match, if any.
    pub fn matches(&self, conn: &Connection) -> Option<Match> {
        self.rules.iter().find_map(|rule| rule.matches(conn))
    }
}

// === impl Rule ===

impl Rule {
    pub fn matches(&self, conn: &Connection) -> Option<Match> {
        let mut matched = Match::default();
        for clause in &self.clauses {
            match clause {
                Clause::DestPort(ports) => {
                    let port = NonZeroU16::new(conn.dst.port())?;
                    if !ports.contains(&port) {
                        return None;
                    }
                    matched.port = Some(port.get());
                }
                Clause::SourceIp(nets) => {
                    if !nets.iter().any(|net| net.contains(conn.src)) {
                        return None;
                    }
                    matched.source = Some(conn.src);
                }
                Clause::DestIp(nets) => {
                    let dst = conn.dst.ip();
                    if !nets.iter().any(|net| net.contains(dst)) {
                        return None;
                    }
                    matched.destination = Some(dst);
                }
            }
        }
        Some(matched)
    }
}

// === impl Match ===

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn family(ip: &IpAddr) -> &'static str {
            if ip.is_ipv4() {
                "IPv4"
            } else {
                "IPv6"
            }
        }

        fn sep(f: &mut fmt::Formatter<'_>, first: &mut bool) -> fmt::Result {
            if !std::mem::replace(first, false) {
                f.write_str(", ")?;
            }
            Ok(())
        }

        let mut first = true;
        if let Some(port) = self.port {
            sep(f, &mut first)?;
            write!(f, "port {port}")?;
        }
        if let Some(ip) = self.source.as_ref() {
            sep(f, &mut first)?;
            write!(f, "{} match srcip {ip}", family(ip))?;
        }
        if let Some(ip) = self.destination.as_ref() {
            sep(f, &mut first)?;
            write!(f, "{} match dstip {ip}", family(ip))?;
        }
        if first {
            f.write_str("any connection")?;
        }
        Ok(())
    }
}

// === impl Denial ===

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy { policy, matched } => {
                write!(f, "policy {policy} matched {matched}, action: DENY")
            }
            Self::NotAllowed => f.write_str("no ALLOW policy matched, action: DENY"),
        }
    }
}

// === impl Verdict ===

impl Verdict {
    #[inline]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

// === impl PolicySet ===

impl PolicySet {
    /// Adds a policy, keeping each partition ordered by reference so that evaluation (and the
    /// denial it reports) does not depend on insertion order. A policy that is already present is
    /// not added again.
    pub fn insert(&mut self, policy: Arc<Policy>) {
        let policies = match policy.action {
            Action::Allow => &mut self.allow,
            Action::Deny => &mut self.deny,
        };
        if let Err(idx) = policies.binary_search_by(|p| p.reference.cmp(&policy.reference)) {
            policies.insert(idx, policy);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deny.is_empty() && self.allow.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deny.len() + self.allow.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.deny.iter().chain(&self.allow)
    }

    pub fn evaluate(&self, conn: &Connection) -> Verdict {
        for policy in &self.deny {
            if let Some(matched) = policy.matches(conn) {
                return Verdict::Deny(Denial::Policy {
                    policy: policy.reference.clone(),
                    matched,
                });
            }
        }

        if self.allow.is_empty() || self.allow.iter().any(|p| p.matches(conn).is_some()) {
            return Verdict::Allow;
        }

        Verdict::Deny(Denial::NotAllowed)
    }
}

impl FromIterator<Arc<Policy>> for PolicySet {
    fn from_iter<T: IntoIterator<Item = Arc<Policy>>>(iter: T) -> Self {
        let mut set = Self::default();
        for policy in iter {
            set.insert(policy);
        }
        set
    }
}

// === impl PolicyTable ===

impl PolicyTable {
    pub fn insert(&mut self, service: ServiceRef, policies: PolicySet) {
        if policies.is_empty() {
            self.by_service.remove(&service);
        } else {
            self.by_service.insert(service, Arc::new(policies));
        }
    }

    pub fn get(&self, service: &ServiceRef) -> Option<&PolicySet> {
        self.by_service.get(service).map(|set| &**set)
    }

    /// Evaluates a connection to `service`. Destinations without policies are allowed.
    pub fn evaluate(&self, service: &ServiceRef, conn: &Connection) -> Verdict {
        match self.by_service.get(service) {
            Some(policies) => policies.evaluate(conn),
            None => Verdict::Allow,
        }
    }

    /// Evaluates a connection addressed to a workload that backs each of `services`.
    ///
    /// The connection is checked against the union of the services' policies, so a DENY from
    /// any of them wins and an ALLOW from any of them admits the connection.
    pub fn evaluate_all(&self, services: &[ServiceRef], conn: &Connection) -> Verdict {
        match services {
            [] => Verdict::Allow,
            [service] => self.evaluate(service, conn),
            services => services
                .iter()
                .filter_map(|service| self.by_service.get(service))
                .flat_map(|policies| policies.iter().cloned())
                .collect::<PolicySet>()
                .evaluate(conn),
        }
    }

    /// The number of services with at least one policy.
    pub fn len(&self) -> usize {
        self.by_service.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_service.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(ports: impl IntoIterator<Item = u16>) -> Clause {
        Clause::DestPort(ports.into_iter().filter_map(NonZeroU16::new).collect())
    }

    fn sources(nets: impl IntoIterator<Item = &'static str>) -> Clause {
        Clause::SourceIp(nets.into_iter().map(|n| n.parse().unwrap()).collect())
    }

    fn destinations(nets: impl IntoIterator<Item = &'static str>) -> Clause {
        Clause::DestIp(nets.into_iter().map(|n| n.parse().unwrap()).collect())
    }

    fn mk_policy(name: &str, action: Action, rules: Vec<Vec<Clause>>) -> Arc<Policy> {
        Arc::new(Policy {
            reference: PolicyRef::new("ns-0", name),
            action,
            rules: rules.into_iter().map(|clauses| Rule { clauses }).collect(),
        })
    }

    fn conn(src: &str, dst: &str) -> Connection {
        Connection {
            src: src.parse().unwrap(),
            dst: dst.parse().unwrap(),
        }
    }

    #[test]
    fn no_policies_allow() {
        let set = PolicySet::default();
        assert_eq!(set.evaluate(&conn("10.0.0.1", "10.0.1.1:8080")), Verdict::Allow);

        let table = PolicyTable::default();
        assert_eq!(
            table.evaluate(&ServiceRef::new("ns-0", "svc"), &conn("10.0.0.1", "10.0.1.1:8080")),
            Verdict::Allow
        );
    }

    #[test]
    fn deny_by_port() {
        let set = PolicySet::from_iter([mk_policy("deny-by-dstport", Action::Deny, vec![vec![ports([8080])]])]);

        let verdict = set.evaluate(&conn("10.0.0.1", "10.0.1.1:8080"));
        assert_eq!(
            verdict,
            Verdict::Deny(Denial::Policy {
                policy: PolicyRef::new("ns-0", "deny-by-dstport"),
                matched: Match {
                    port: Some(8080),
                    ..Default::default()
                },
            })
        );
        assert_eq!(set.evaluate(&conn("10.0.0.1", "10.0.1.1:9090")), Verdict::Allow);
    }

    #[test]
    fn clauses_are_conjunctive() {
        let set = PolicySet::from_iter([mk_policy(
            "deny",
            Action::Deny,
            vec![vec![ports([8080]), sources(["10.0.0.0/24"])]],
        )]);

        assert!(!set.evaluate(&conn("10.0.0.7", "10.0.1.1:8080")).is_allow());
        assert!(set.evaluate(&conn("10.0.9.7", "10.0.1.1:8080")).is_allow());
        assert!(set.evaluate(&conn("10.0.0.7", "10.0.1.1:8081")).is_allow());
    }

    #[test]
    fn rules_are_disjunctive() {
        let set = PolicySet::from_iter([mk_policy(
            "deny",
            Action::Deny,
            vec![vec![ports([8080])], vec![destinations(["10.0.2.2"])]],
        )]);

        assert!(!set.evaluate(&conn("10.0.0.7", "10.0.1.1:8080")).is_allow());
        assert!(!set.evaluate(&conn("10.0.0.7", "10.0.2.2:22")).is_allow());
        assert!(set.evaluate(&conn("10.0.0.7", "10.0.2.3:22")).is_allow());
    }

    #[test]
    fn deny_overrides_allow() {
        let allow = mk_policy("allow-all", Action::Allow, vec![vec![]]);
        let deny = mk_policy("deny-src", Action::Deny, vec![vec![sources(["192.0.2.0/24"])]]);

        for set in [
            PolicySet::from_iter([allow.clone(), deny.clone()]),
            PolicySet::from_iter([deny, allow]),
        ] {
            assert_eq!(
                set.evaluate(&conn("192.0.2.9", "10.0.1.1:80")),
                Verdict::Deny(Denial::Policy {
                    policy: PolicyRef::new("ns-0", "deny-src"),
                    matched: Match {
                        source: Some("192.0.2.9".parse().unwrap()),
                        ..Default::default()
                    },
                })
            );
            assert_eq!(set.evaluate(&conn("198.51.100.1", "10.0.1.1:80")), Verdict::Allow);
        }
    }

    #[test]
    fn unmatched_allow_denies() {
        let set = PolicySet::from_iter([mk_policy(
            "allow-cluster",
            Action::Allow,
            vec![vec![sources(["10.0.0.0/8"])]],
        )]);

        assert!(set.evaluate(&conn("10.3.0.1", "10.0.1.1:80")).is_allow());
        assert_eq!(
            set.evaluate(&conn("192.0.2.1", "10.0.1.1:80")),
            Verdict::Deny(Denial::NotAllowed)
        );
    }

    #[test]
    fn policy_without_rules_matches_nothing() {
        let deny = mk_policy("deny-nothing", Action::Deny, vec![]);
        assert_eq!(deny.matches(&conn("10.0.0.1", "10.0.1.1:80")), None);

        let set = PolicySet::from_iter([deny]);
        assert!(set.evaluate(&conn("10.0.0.1", "10.0.1.1:80")).is_allow());
    }

    #[test]
    fn match_display() {
        let port = Match {
            port: Some(8080),
            ..Default::default()
        };
        assert_eq!(port.to_string(), "port 8080");

        let all = Match {
            port: Some(443),
            source: Some("10.0.0.1".parse().unwrap()),
            destination: Some("fd00::1".parse().unwrap()),
        };
        assert_eq!(
            all.to_string(),
            "port 443, IPv4 match srcip 10.0.0.1, IPv6 match dstip fd00::1"
        );
        assert_eq!(Match::default().to_string(), "any connection");

        let denial = Denial::Policy {
            policy: PolicyRef::new("default", "deny-by-dstport"),
            matched: port,
        };
        assert_eq!(
            denial.to_string(),
            "policy default/deny-by-dstport matched port 8080, action: DENY"
        );
    }

    #[test]
    fn table_drops_empty_sets() {
        let svc = ServiceRef::new("ns-0", "svc");
        let mut table = PolicyTable::default();
        table.insert(svc.clone(), PolicySet::from_iter([mk_policy("deny", Action::Deny, vec![vec![]])]));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&svc).map(PolicySet::len), Some(1));

        table.insert(svc.clone(), PolicySet::default());
        assert!(table.is_empty());
        assert!(table.get(&svc).is_none());
    }

    #[test]
    fn shared_workloads_evaluate_every_owner() {
        let web = ServiceRef::new("ns-0", "web");
        let api = ServiceRef::new("ns-0", "api");
        let root = mk_policy("root-allow-8080", Action::Allow, vec![vec![ports([8080])]]);

        let mut table = PolicyTable::default();
        table.insert(
            web.clone(),
            PolicySet::from_iter([
                mk_policy("deny-all", Action::Deny, vec![vec![]]),
                root.clone(),
            ]),
        );
        table.insert(api.clone(), PolicySet::from_iter([root]));

        let c = conn("10.0.0.1", "10.0.1.1:8080");
        assert_eq!(table.evaluate(&api, &c), Verdict::Allow);
        for owners in [[web.clone(), api.clone()], [api.clone(), web.clone()]] {
            assert!(matches!(
                table.evaluate_all(&owners, &c),
                Verdict::Deny(Denial::Policy { ref policy, .. }) if policy.name == "deny-all"
            ));
        }
        assert_eq!(table.evaluate_all(&[], &c), Verdict::Allow);
        assert_eq!(table.evaluate_all(&[api.clone()], &c), Verdict::Allow);

        // A policy shared by both owners is only evaluated once, and any owner's ALLOW admits.
        table.insert(
            web.clone(),
            PolicySet::from_iter([mk_policy("allow-9090", Action::Allow, vec![vec![ports([9090])]])]),
        );
        let owners = [web, api];
        assert_eq!(table.evaluate_all(&owners, &c), Verdict::Allow);
        assert_eq!(
            table.evaluate_all(&owners, &conn("10.0.0.1", "10.0.1.1:9090")),
            Verdict::Allow
        );
        assert_eq!(
            table.evaluate_all(&owners, &conn("10.0.0.1", "10.0.1.1:7070")),
            Verdict::Deny(Denial::NotAllowed)
        );
    }

    #[test]
    fn duplicate_policies_are_ignored() {
        let deny = mk_policy("deny", Action::Deny, vec![vec![]]);
        let set = PolicySet::from_iter([deny.clone(), deny]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().count(), 1);
    }
}
