//! End-to-end pipeline tests over the full six-stage deployment graph,
//! driven entirely through recording test doubles.

use converge::cert::CertificateStatus;
use converge::config::{ComputeConfig, NetworkConfig, SecurityConfig, ValidationConfig};
use converge::errors::ConvergeError;
use converge::prelude::*;
use converge::testing::{RecordingProvider, ScriptedAuthority, ScriptedRegistrar};
use std::sync::Arc;

const ALL_STAGES: [&str; 6] = [
    ids::NETWORK,
    ids::SECURITY,
    ids::ZONE,
    ids::DELEGATION,
    ids::CERTIFICATE,
    ids::EDGE,
];

struct Harness {
    provider: Arc<RecordingProvider>,
    registrar: Arc<ScriptedRegistrar>,
    authority: Arc<ScriptedAuthority>,
    store: Arc<MemoryStateStore>,
}

impl Harness {
    fn new(authority: ScriptedAuthority) -> Self {
        Self {
            provider: Arc::new(RecordingProvider::new()),
            registrar: Arc::new(ScriptedRegistrar::serving(vec![
                "parked-1.registrar.test".to_string(),
                "parked-2.registrar.test".to_string(),
            ])),
            authority: Arc::new(authority),
            store: Arc::new(MemoryStateStore::new()),
        }
    }

    fn issuing() -> Self {
        Self::new(ScriptedAuthority::with_statuses(vec![
            CertificateStatus::Pending,
            CertificateStatus::Issued {
                certificate_id: "cert-issued".to_string(),
            },
        ]))
    }

    fn sequencer(&self) -> Sequencer {
        self.sequencer_with(SecurityConfig::default())
    }

    fn sequencer_with(&self, security_config: SecurityConfig) -> Sequencer {
        let network_config = NetworkConfig {
            vpc_cidr: "10.0.0.0/16".to_string(),
            public_subnet_cidrs: vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()],
            private_subnet_cidrs: vec!["10.0.101.0/24".to_string()],
            enable_nat: true,
        };
        let compute_config = ComputeConfig {
            ami_id: "ami-0abc".to_string(),
            instance_type: "t3.micro".to_string(),
        };
        let validation = ValidationConfig {
            max_wait_secs: 2,
            initial_poll_secs: 0,
            max_poll_secs: 0,
        };

        let network = NetworkProvisioner::new(
            self.provider.clone(),
            "webstack",
            "eu-west-1",
            network_config,
        );
        let security =
            SecurityProvisioner::new(self.provider.clone(), "webstack", security_config);
        let zone = ZoneProvisioner::new(self.provider.clone(), "example.com");
        let delegation = DelegationProvisioner::new(
            DelegationClient::new(self.registrar.clone()),
            "example.com",
        );
        let certificate = CertificateProvisioner::new(
            self.provider.clone(),
            self.authority.clone(),
            "example.com",
            validation,
        );
        let edge = EdgeProvisioner::new(
            self.provider.clone(),
            "webstack",
            "example.com",
            compute_config,
        );

        Sequencer::new(self.store.clone())
            .stage(StageSpec::new(Arc::new(network)))
            .stage(StageSpec::new(Arc::new(security)).depends_on(ids::NETWORK))
            .stage(StageSpec::new(Arc::new(zone)).depends_on(ids::NETWORK))
            .stage(StageSpec::new(Arc::new(delegation)).depends_on(ids::ZONE))
            .stage(StageSpec::new(Arc::new(certificate)).depends_on(ids::DELEGATION))
            .stage(
                StageSpec::new(Arc::new(edge))
                    .depends_on(ids::CERTIFICATE)
                    .depends_on(ids::SECURITY),
            )
    }
}

#[test]
fn plan_orders_the_deployment_graph() {
    let harness = Harness::issuing();
    let order = harness.sequencer().plan().expect("plan");
    assert_eq!(order, ALL_STAGES);
}

#[tokio::test]
async fn apply_converges_end_to_end() {
    let harness = Harness::issuing();
    let report = harness.sequencer().apply().await.expect("apply");

    assert_eq!(report.executed, ALL_STAGES);
    assert!(report.skipped.is_empty());

    // The zone's nameservers were pushed to the registrar.
    assert_eq!(harness.registrar.replace_calls(), 1);

    // The edge handle surfaces the public entry point.
    let edge = report.handles.get(ids::EDGE).expect("edge handle");
    assert!(edge
        .output_str("load_balancer_dns_name")
        .is_some_and(|name| name.ends_with(".elb.test")));

    // Every stage is recorded in convergence state.
    let state = harness.store.load().await.expect("state");
    for stage in ALL_STAGES {
        assert!(state.get(stage).is_some(), "missing record for {stage}");
    }
}

#[tokio::test]
async fn reapply_with_unchanged_inputs_makes_zero_provider_calls() {
    let harness = Harness::issuing();
    let sequencer = harness.sequencer();

    let first = sequencer.apply().await.expect("first apply");
    let calls_after_first = harness.provider.call_count();
    let registrar_writes_after_first = harness.registrar.replace_calls();

    let second = sequencer.apply().await.expect("second apply");

    assert!(second.executed.is_empty());
    assert_eq!(second.skipped, ALL_STAGES);
    assert_eq!(harness.provider.call_count(), calls_after_first);
    assert_eq!(harness.registrar.replace_calls(), registrar_writes_after_first);

    // Cached handles are returned, not re-derived.
    assert_eq!(
        first.handles.get(ids::EDGE),
        second.handles.get(ids::EDGE)
    );
}

#[tokio::test]
async fn changing_one_stage_input_reruns_only_that_stage() {
    let harness = Harness::issuing();
    harness.sequencer().apply().await.expect("first apply");

    let changed = SecurityConfig {
        ssh_cidr: Some("203.0.113.0/24".to_string()),
        ..SecurityConfig::default()
    };
    let report = harness
        .sequencer_with(changed)
        .apply()
        .await
        .expect("second apply");

    assert_eq!(report.executed, vec![ids::SECURITY]);
    assert_eq!(report.skipped.len(), ALL_STAGES.len() - 1);
}

#[tokio::test]
async fn certificate_failure_halts_before_edge() {
    let harness = Harness::new(ScriptedAuthority::with_statuses(vec![
        CertificateStatus::Failed {
            reason: "challenge records not visible".to_string(),
        },
    ]));

    let err = harness.sequencer().apply().await.expect_err("cert fails");
    let ConvergeError::StageFailed { stage, source } = &err else {
        panic!("expected StageFailed, got {err}");
    };
    assert_eq!(stage, ids::CERTIFICATE);
    assert!(matches!(**source, ConvergeError::ValidationFailed { .. }));

    // Edge never executed.
    assert_eq!(harness.provider.created_count(ResourceKind::LoadBalancer), 0);
    assert_eq!(harness.provider.created_count(ResourceKind::Instance), 0);

    // Upstream stages are marked complete and survive the failure.
    let state = harness.store.load().await.expect("state");
    for stage in [ids::NETWORK, ids::SECURITY, ids::ZONE, ids::DELEGATION] {
        assert!(state.get(stage).is_some(), "missing record for {stage}");
    }
    assert!(state.get(ids::CERTIFICATE).is_none());
    assert!(state.get(ids::EDGE).is_none());
}

#[tokio::test]
async fn rerun_after_failure_resumes_at_the_failure_point() {
    let harness = Harness::new(ScriptedAuthority::with_statuses(vec![
        CertificateStatus::Failed {
            reason: "challenge records not visible".to_string(),
        },
    ]));
    harness.sequencer().apply().await.expect_err("first run fails");

    // Same declared inputs, healthy authority: the resumed run skips
    // everything already recorded and picks up at the certificate.
    let resumed = Harness {
        provider: harness.provider.clone(),
        registrar: harness.registrar.clone(),
        authority: Arc::new(ScriptedAuthority::with_statuses(vec![
            CertificateStatus::Issued {
                certificate_id: "cert-retry".to_string(),
            },
        ])),
        store: harness.store.clone(),
    };

    let report = resumed.sequencer().apply().await.expect("resume");
    assert_eq!(report.executed, vec![ids::CERTIFICATE, ids::EDGE]);
    assert_eq!(report.skipped.len(), 4);

    // The registrar was not touched again.
    assert_eq!(harness.registrar.replace_calls(), 1);
}

#[tokio::test]
async fn destroy_tears_down_in_reverse_order() {
    let harness = Harness::issuing();
    let sequencer = harness.sequencer();
    sequencer.apply().await.expect("apply");

    let report = sequencer.destroy().await.expect("destroy");

    let mut expected: Vec<&str> = ALL_STAGES.to_vec();
    expected.reverse();
    assert_eq!(report.destroyed, expected);
    assert!(report.skipped.is_empty());

    // Teardown ends at the root: the VPC goes last.
    assert_eq!(
        harness.provider.deleted_kinds().last(),
        Some(&ResourceKind::Vpc)
    );

    let state = harness.store.load().await.expect("state");
    assert!(state.is_empty());
}

#[tokio::test]
async fn destroy_without_state_is_a_silent_noop() {
    let harness = Harness::issuing();
    let report = harness.sequencer().destroy().await.expect("destroy");

    assert!(report.destroyed.is_empty());
    assert_eq!(report.skipped.len(), ALL_STAGES.len());
    assert_eq!(harness.provider.call_count(), 0);
}
