//! §4.D `merge(master) -> MergeableIngresses` — the master/minion path
//! merge algorithm (§3 MergeRole, §8 P3, scenarios 3-4).

use crate::key::Key;
use crate::model::{IngressEx, MergeableIngresses, ResolvedRule};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("master must carry exactly one host rule, found {0}")]
    InvalidMasterHostCount(usize),
    #[error("master must carry exactly one host and no paths")]
    InvalidMaster,
}

#[derive(Debug, Clone)]
pub struct DroppedPath {
    pub minion_key: Key,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct RejectedMinion {
    pub minion_key: Key,
    pub reason: &'static str,
}

/// A minion candidate, already resolved (`build`) and tagged with its
/// creation time for the oldest-wins ordering (§3, §8 P3).
pub struct MinionCandidate {
    pub creation_timestamp: i64,
    pub ex: IngressEx,
}

pub struct MergeOutcome {
    pub mergeable: MergeableIngresses,
    pub dropped: Vec<DroppedPath>,
    pub rejected: Vec<RejectedMinion>,
}

/// `master_host` is the master's single host rule, already validated and
/// extracted by the caller. `master_host_count` is the number of host
/// rules the master's raw spec carries (§3 MergeRole: "a master holds at
/// most one host rule with no paths"); anything other than exactly one is
/// rejected here rather than silently taking the first.
pub fn merge(
    master_host: &str,
    master_host_count: usize,
    mut master_ex: IngressEx,
    mut candidates: Vec<MinionCandidate>,
) -> Result<MergeOutcome, MergeError> {
    if master_host_count != 1 {
        return Err(MergeError::InvalidMasterHostCount(master_host_count));
    }
    if !master_ex.rules.is_empty() {
        return Err(MergeError::InvalidMaster);
    }

    // Oldest creation time first; ties broken by key for determinism,
    // independent of task-queue arrival order (§8 P3, §9 open question a).
    candidates.sort_by(|a, b| {
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.ex.key.cmp(&b.ex.key))
    });

    let mut rejected = Vec::new();
    let mut dropped = Vec::new();
    let mut minions = Vec::new();
    let mut seen_paths: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for candidate in candidates {
        let hosts: std::collections::BTreeSet<&str> =
            candidate.ex.rules.iter().map(|r| r.host.as_str()).collect();
        if hosts.len() != 1 || !hosts.contains(master_host) {
            rejected.push(RejectedMinion {
                minion_key: candidate.ex.key.clone(),
                reason: "minion must carry exactly one host rule matching its master",
            });
            continue;
        }
        if candidate.ex.rules.is_empty() {
            rejected.push(RejectedMinion {
                minion_key: candidate.ex.key.clone(),
                reason: "minion must contribute at least one path",
            });
            continue;
        }
        if !candidate.ex.tls_secrets.is_empty() {
            rejected.push(RejectedMinion {
                minion_key: candidate.ex.key.clone(),
                reason: "minions may not carry TLS secrets",
            });
            continue;
        }

        let mut kept_rules: Vec<ResolvedRule> = Vec::new();
        for rule in candidate.ex.rules {
            if seen_paths.contains(&rule.path) {
                dropped.push(DroppedPath {
                    minion_key: candidate.ex.key.clone(),
                    path: rule.path.clone(),
                });
                continue;
            }
            seen_paths.insert(rule.path.clone());
            kept_rules.push(rule);
        }

        master_ex.rules.extend(kept_rules.iter().cloned());
        minions.push(IngressEx {
            rules: kept_rules,
            ..candidate.ex
        });
    }

    Ok(MergeOutcome {
        mergeable: MergeableIngresses {
            master: master_ex,
            minions,
        },
        dropped,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackendRef, ServicePort};

    fn minion(key: &str, ts: i64, path: &str) -> MinionCandidate {
        MinionCandidate {
            creation_timestamp: ts,
            ex: IngressEx {
                key: key.parse().unwrap(),
                source: Default::default(),
                rules: vec![ResolvedRule {
                    host: "cafe.example.com".into(),
                    path: path.into(),
                    backend: BackendRef {
                        service_name: "svc".into(),
                        service_port: ServicePort::Number(80),
                    },
                    endpoints: vec!["10.0.0.1:80".into()],
                }],
                default_backend: None,
                tls_secrets: Default::default(),
                jwk_secret: None,
                health_checks: Default::default(),
                external_names: Default::default(),
            },
        }
    }

    fn empty_master(key: &str) -> IngressEx {
        IngressEx {
            key: key.parse().unwrap(),
            source: Default::default(),
            rules: vec![],
            default_backend: None,
            tls_secrets: Default::default(),
            jwk_secret: None,
            health_checks: Default::default(),
            external_names: Default::default(),
        }
    }

    #[test]
    fn oldest_creation_time_wins_ordering() {
        let outcome = merge(
            "cafe.example.com",
            1,
            empty_master("default/cafe-master"),
            vec![minion("default/cafe-tea", 10, "/tea"), minion("default/cafe-coffee", 5, "/coffee")],
        )
        .unwrap();
        let paths: Vec<_> = outcome.mergeable.master.rules.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/coffee", "/tea"]);
    }

    #[test]
    fn duplicate_paths_oldest_wins_younger_dropped() {
        let outcome = merge(
            "cafe.example.com",
            1,
            empty_master("default/cafe-master"),
            vec![minion("default/cafe-tea-old", 5, "/tea"), minion("default/cafe-tea-new", 10, "/tea")],
        )
        .unwrap();
        assert_eq!(outcome.mergeable.master.rules.len(), 1);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].minion_key.to_string(), "default/cafe-tea-new");
    }

    #[test]
    fn minion_with_tls_is_rejected() {
        let mut tls_minion = minion("default/cafe-secure", 1, "/secure");
        tls_minion.ex.tls_secrets.insert(
            "cafe.example.com".into(),
            crate::model::TlsSecret {
                cert: vec![],
                key: vec![],
            },
        );
        let outcome = merge(
            "cafe.example.com",
            1,
            empty_master("default/cafe-master"),
            vec![tls_minion],
        )
        .unwrap();
        assert!(outcome.mergeable.master.rules.is_empty());
        assert_eq!(outcome.rejected.len(), 1);
    }

    #[test]
    fn master_with_more_than_one_host_is_rejected() {
        let err = merge(
            "cafe.example.com",
            2,
            empty_master("default/cafe-master"),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::InvalidMasterHostCount(2)));
    }
}
