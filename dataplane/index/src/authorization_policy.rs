use crate::{index::Index, Error, IndexResource};
use l4_dataplane_api::{self as api, authorization_policy as policy, labels::Selector};
use l4_dataplane_core::{
    ports::{parse_port, PortSet},
    Action, Clause, NetworkMatch, Policy, PolicyRef, Rule,
};
use std::sync::Arc;

/// A compiled policy along with the services it selects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PolicySpec {
    pub selector: Option<Selector>,
    pub policy: Arc<Policy>,
}

impl IndexResource<api::AuthorizationPolicy> for Index {
    fn apply(&mut self, policy: api::AuthorizationPolicy) {
        let namespace = api::manifest::namespace(&policy.metadata).to_string();
        let name = policy.metadata.name.clone().unwrap_or_default();
        let reference = PolicyRef::new(namespace, name);

        let spec = match compile(reference.clone(), policy.spec) {
            Ok(spec) => spec,
            Err(error) => {
                tracing::warn!(namespace = %reference.namespace, name = %reference.name, %error, "Invalid AuthorizationPolicy");
                self.rejected(api::Kind::AuthorizationPolicy);
                return;
            }
        };

        self.apply_policy(reference, spec);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy(PolicyRef::new(namespace, name));
    }
}

pub(crate) fn compile(
    reference: PolicyRef,
    spec: policy::AuthorizationPolicySpec,
) -> Result<PolicySpec, Error> {
    let action = match spec.action {
        policy::Action::Allow => Action::Allow,
        policy::Action::Deny => Action::Deny,
    };

    let rules = spec
        .rules
        .into_iter()
        .map(compile_rule)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PolicySpec {
        selector: spec.selector,
        policy: Arc::new(Policy {
            reference,
            action,
            rules,
        }),
    })
}

fn compile_rule(rule: policy::Rule) -> Result<Rule, Error> {
    let mut clauses = Vec::new();

    // Sources (and operations) are alternatives; one that sets no constraint matches anything.
    if let Some(blocks) = any_of(rule.from.into_iter().map(|f| f.source.ip_blocks)) {
        clauses.push(Clause::SourceIp(networks(blocks)?));
    }
    if let Some(ports) = any_of(rule.to.into_iter().map(|t| t.operation.ports)) {
        clauses.push(Clause::DestPort(portset(ports)?));
    }

    for policy::Condition { key, values } in rule.when {
        if values.is_empty() {
            return Err(Error::EmptyCondition(key));
        }
        let clause = match key.as_str() {
            "source.ip" => Clause::SourceIp(networks(values)?),
            "destination.ip" => Clause::DestIp(networks(values)?),
            "destination.port" => Clause::DestPort(portset(values)?),
            _ => return Err(Error::UnsupportedCondition(key)),
        };
        clauses.push(clause);
    }

    Ok(Rule { clauses })
}

/// Unions a list of alternatives. Returns `None` when there are no alternatives or when any
/// alternative is unconstrained.
fn any_of(alternatives: impl IntoIterator<Item = Vec<String>>) -> Option<Vec<String>> {
    let mut union = Vec::new();
    let mut constrained = false;
    for values in alternatives {
        if values.is_empty() {
            return None;
        }
        constrained = true;
        union.extend(values);
    }
    constrained.then_some(union)
}

fn networks(values: Vec<String>) -> Result<Vec<NetworkMatch>, Error> {
    values
        .into_iter()
        .map(|value| {
            value
                .parse::<NetworkMatch>()
                .map_err(|source| Error::InvalidNetwork { value, source })
        })
        .collect()
}

fn portset(values: Vec<String>) -> Result<PortSet, Error> {
    values
        .into_iter()
        .map(|value| parse_port(&value).map_err(|_| Error::InvalidPort(value)))
        .collect()
}
