//! End-to-end reconciliation passes against the in-memory store.

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;

use claimsync::gateway::PayoutOutcome;
use claimsync::notify::{Channel, Notification};
use claimsync::operator::Operator;
use claimsync::reconcile::{ReconcilerConfig, RunTrigger};
use claimsync::errors::ReconcileError;
use claimsync_common::{
    Actor, AuditDetail, AuditKind, ClaimStatus, FailureType, ManualRetryOutcome, PayoutId,
    PayoutStatus, ReconciliationRule,
};

use common::*;

async fn pass(h: &Harness) -> claimsync::reconcile::RunReport {
    h.reconciler.run_pass(RunTrigger::Scheduled).await.unwrap()
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn second_pass_over_unchanged_store_writes_nothing() {
    let h = Harness::new();
    h.store
        .insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Completed, 5));
    h.store.insert_claim(
        claim("c2", ClaimStatus::Pending, 60).with_review_lock("adjuster-1", minutes_ago(45)),
    );
    h.store
        .insert_claim(claim("c3", ClaimStatus::Settling, 40));
    h.store.insert_claim(claim("c4", ClaimStatus::Processing, 5));
    h.store.insert_payout(
        payout("p4", "c4", PayoutStatus::Failed, 5).with_retry_count(3),
    );

    let first = pass(&h).await;
    assert!(first.state_fixes() > 0);
    let mutations = h.store.mutation_count();
    let entries = h.store.audit_log().len();

    h.clock.advance(Duration::minutes(1));
    let second = pass(&h).await;
    assert_eq!(second.state_fixes(), 0);
    assert_eq!(second.expired_locks_cleared, 0);
    assert_eq!(second.escalated_to_admin, 0);
    assert_eq!(second.failed_operations_retried, 0);
    assert_eq!(h.store.mutation_count(), mutations);
    assert_eq!(h.store.audit_log().len(), entries);
    assert_eq!(h.store.reports().len(), 2);
}

// =============================================================================
// Review locks
// =============================================================================

#[tokio::test]
async fn only_locks_older_than_ttl_are_cleared() {
    let h = Harness::new();
    h.store.insert_claim(
        claim("old", ClaimStatus::Pending, 60).with_review_lock("adjuster-1", minutes_ago(11)),
    );
    h.store.insert_claim(
        claim("fresh", ClaimStatus::Pending, 60).with_review_lock("adjuster-2", minutes_ago(9)),
    );

    let report = pass(&h).await;
    assert_eq!(report.expired_locks_cleared, 1);
    assert!(h.store.claim("old").unwrap().review_lock.is_none());
    assert_eq!(
        h.store.claim("fresh").unwrap().review_lock.unwrap().locked_by,
        "adjuster-2"
    );
    assert_eq!(h.store.claim("old").unwrap().status, ClaimStatus::Pending);

    let log = h.store.audit_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].claim_id.as_ref().unwrap().as_str(), "old");
    assert!(matches!(
        log[0].detail,
        AuditDetail::StateReconciliation {
            rule: ReconciliationRule::ExpiredReviewLock,
            previous_status: ClaimStatus::Pending,
            new_status: ClaimStatus::Pending,
        }
    ));
}

#[tokio::test]
async fn swept_lock_does_not_hide_stale_settling_claim() {
    let h = Harness::with_gateway(ScriptedGateway::declining("card_declined"));
    h.store.insert_claim(
        claim("c1", ClaimStatus::Settling, 20).with_review_lock("adjuster-1", minutes_ago(45)),
    );
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Failed, 25));

    let report = pass(&h).await;
    assert_eq!(report.expired_locks_cleared, 1);
    assert_eq!(report.stale_settling_fixed, 1);
    let claim = h.store.claim("c1").unwrap();
    assert!(claim.review_lock.is_none());
    assert_eq!(claim.status, ClaimStatus::Processing);
}

// =============================================================================
// Mismatch correction
// =============================================================================

#[tokio::test]
async fn completed_payout_settles_claim_with_one_audit_entry() {
    let h = Harness::new();
    h.store
        .insert_claim(claim("c1", ClaimStatus::Processing, 2));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Completed, 2));

    let report = pass(&h).await;
    assert_eq!(report.mismatched_states_fixed, 1);

    let claim = h.store.claim("c1").unwrap();
    assert_eq!(claim.status, ClaimStatus::Settled);
    assert_eq!(claim.settled_at, Some(now()));
    assert_eq!(claim.reconciled_at, Some(now()));

    let log = h.store.audit_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].actor, Actor::System);
    assert_eq!(log[0].payout_id, Some(PayoutId::new("p1")));
    assert_eq!(
        log[0].detail,
        AuditDetail::StateReconciliation {
            rule: ReconciliationRule::CompletedPayoutFound,
            previous_status: ClaimStatus::Processing,
            new_status: ClaimStatus::Settled,
        }
    );
}

#[tokio::test]
async fn stale_settling_with_failed_payout_reverts_to_processing() {
    let h = Harness::with_gateway(ScriptedGateway::declining("card_declined"));
    h.store
        .insert_claim(claim("c1", ClaimStatus::Settling, 20));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Failed, 25));

    let report = pass(&h).await;
    assert_eq!(report.stale_settling_fixed, 1);
    assert_eq!(report.orphaned_settling_fixed, 0);
    assert_eq!(h.store.claim("c1").unwrap().status, ClaimStatus::Processing);

    let corrections: Vec<_> = h
        .store
        .audit_log()
        .into_iter()
        .filter(|e| e.kind() == AuditKind::StateReconciliation)
        .collect();
    assert_eq!(corrections.len(), 1);
    assert!(matches!(
        corrections[0].detail,
        AuditDetail::StateReconciliation {
            rule: ReconciliationRule::StaleSettlingFailed,
            ..
        }
    ));
}

#[tokio::test]
async fn settling_claim_younger_than_threshold_is_left_alone() {
    let h = Harness::with_gateway(ScriptedGateway::declining("card_declined"));
    h.store
        .insert_claim(claim("c1", ClaimStatus::Settling, 10));
    h.store.insert_payout(
        payout("p1", "c1", PayoutStatus::Failed, 12).with_retry_count(3),
    );

    let report = pass(&h).await;
    assert_eq!(report.state_fixes(), 0);
    assert_eq!(h.store.claim("c1").unwrap().status, ClaimStatus::Settling);
}

#[tokio::test]
async fn orphaned_settling_without_payout_reverts_to_processing() {
    let h = Harness::new();
    h.store
        .insert_claim(claim("c1", ClaimStatus::Settling, 40));

    let report = pass(&h).await;
    assert_eq!(report.orphaned_settling_fixed, 1);
    assert_eq!(report.stale_settling_fixed, 0);
    let claim = h.store.claim("c1").unwrap();
    assert_eq!(claim.status, ClaimStatus::Processing);
    assert_eq!(
        claim.reconciled_reason.as_deref(),
        Some(ReconciliationRule::OrphanedSettling.reason())
    );
}

#[tokio::test]
async fn stale_settling_waits_while_latest_payout_is_in_flight() {
    let h = Harness::new();
    h.store
        .insert_claim(claim("c1", ClaimStatus::Settling, 20));
    h.store
        .insert_payout(payout("p0", "c1", PayoutStatus::Failed, 60).with_retry_count(3));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Pending, 22));

    let report = pass(&h).await;
    assert_eq!(report.stale_settling_fixed, 0);
    assert_eq!(report.orphaned_settling_fixed, 0);
    assert_eq!(h.store.claim("c1").unwrap().status, ClaimStatus::Settling);
    assert!(
        h.store
            .audit_log()
            .iter()
            .all(|e| e.kind() != AuditKind::StateReconciliation)
    );
}

#[tokio::test]
async fn orphaned_settling_with_pending_retry_payout_reverts_to_processing() {
    let h = Harness::with_gateway(ScriptedGateway::declining("card_declined"));
    h.store
        .insert_claim(claim("c1", ClaimStatus::Settling, 40));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::PendingRetry, 45));

    let report = pass(&h).await;
    assert_eq!(report.stale_settling_fixed, 0);
    assert_eq!(report.orphaned_settling_fixed, 1);
    assert_eq!(h.store.claim("c1").unwrap().status, ClaimStatus::Processing);

    let corrections: Vec<_> = h
        .store
        .audit_log()
        .into_iter()
        .filter(|e| e.kind() == AuditKind::StateReconciliation)
        .collect();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].payout_id, Some(PayoutId::new("p1")));
    assert!(matches!(
        corrections[0].detail,
        AuditDetail::StateReconciliation {
            rule: ReconciliationRule::OrphanedSettling,
            previous_status: ClaimStatus::Settling,
            new_status: ClaimStatus::Processing,
        }
    ));
}

#[tokio::test]
async fn settled_and_denied_claims_are_never_touched() {
    let h = Harness::new();
    h.store.insert_claim(claim("c1", ClaimStatus::Settled, 90));
    h.store.insert_claim(claim("c2", ClaimStatus::Denied, 90));
    h.store
        .insert_payout(payout("p2", "c2", PayoutStatus::Completed, 90));

    let report = pass(&h).await;
    assert_eq!(report.state_fixes(), 0);
    assert_eq!(h.store.mutation_count(), 0);
    assert_eq!(h.store.claim("c2").unwrap().status, ClaimStatus::Denied);
}

// =============================================================================
// Retries and escalation
// =============================================================================

#[tokio::test]
async fn payout_out_of_attempts_is_escalated_without_retry() {
    let config = ReconcilerConfig {
        admin_email: Some("admin@example.com".to_string()),
        ..Default::default()
    };
    let h = Harness::build(
        ScriptedGateway::approving(),
        RecordingNotifier::delivering(),
        config,
    );
    h.store.insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store.insert_payout(
        payout("p1", "c1", PayoutStatus::Failed, 60)
            .with_retry_count(3)
            .with_last_error("card_declined"),
    );

    let report = pass(&h).await;
    assert_eq!(report.escalated_to_admin, 1);
    assert_eq!(report.failed_operations_retried, 0);
    assert!(h.gateway.requests().is_empty());

    let payout = h.store.payout("p1").unwrap();
    assert_eq!(payout.status, PayoutStatus::Escalated);
    assert_eq!(payout.escalated_at, Some(now()));
    assert_eq!(payout.retry_count, 3);

    let log = h.store.audit_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].reason, "max_retries_exceeded");
    assert!(matches!(
        log[0].detail,
        AuditDetail::Escalation {
            retry_count: 3,
            requires_manual_intervention: true,
            ..
        }
    ));

    assert_eq!(
        h.notifier.escalations(),
        vec![
            Channel::Chat,
            Channel::Email {
                to: "admin@example.com".to_string()
            }
        ]
    );
}

#[tokio::test]
async fn undelivered_escalation_alert_does_not_fail_the_pass() {
    let h = Harness::build(
        ScriptedGateway::approving(),
        RecordingNotifier::failing(),
        ReconcilerConfig::default(),
    );
    h.store.insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store.insert_payout(
        payout("p1", "c1", PayoutStatus::PendingRetry, 60).with_retry_count(4),
    );

    let report = pass(&h).await;
    assert_eq!(report.escalated_to_admin, 1);
    assert!(report.errors.is_empty());
    assert_eq!(h.store.payout("p1").unwrap().status, PayoutStatus::Escalated);
}

#[tokio::test]
async fn retries_reuse_the_stored_idempotency_key() {
    let h = Harness::with_gateway(ScriptedGateway::declining("processor_unavailable"));
    h.store.insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Failed, 60));

    let first = pass(&h).await;
    h.clock.advance(Duration::minutes(15));
    let second = pass(&h).await;

    assert_eq!(first.failed_operations_retried, 1);
    assert_eq!(second.failed_operations_retried, 1);
    assert_eq!(
        h.gateway.idempotency_keys(),
        vec!["payout-p1".to_string(), "payout-p1".to_string()]
    );

    let payout = h.store.payout("p1").unwrap();
    assert_eq!(payout.status, PayoutStatus::PendingRetry);
    assert_eq!(payout.retry_count, 2);
    assert_eq!(payout.last_error.as_deref(), Some("processor_unavailable"));
    assert_eq!(payout.last_retry_at, Some(now() + Duration::minutes(15)));

    let attempts: Vec<_> = h
        .store
        .audit_log()
        .into_iter()
        .filter(|e| e.kind() == AuditKind::RetryAttempt)
        .collect();
    assert_eq!(attempts.len(), 2);
}

#[tokio::test]
async fn successful_retry_completes_payout_and_settles_claim() {
    let h = Harness::with_gateway(
        ScriptedGateway::declining("unused").then(PayoutOutcome::Succeeded {
            transaction_id: "tx_42".to_string(),
        }),
    );
    h.store.insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store.insert_payout(
        payout("p1", "c1", PayoutStatus::PendingRetry, 60).with_retry_count(1),
    );

    let report = pass(&h).await;
    assert_eq!(report.failed_operations_retried, 1);
    assert_eq!(report.successful_retries, 1);

    let payout = h.store.payout("p1").unwrap();
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.transaction_id.as_deref(), Some("tx_42"));
    assert_eq!(h.store.claim("c1").unwrap().status, ClaimStatus::Settled);

    let log = h.store.audit_log();
    assert!(log.iter().any(|e| matches!(
        &e.detail,
        AuditDetail::RetrySuccess { retry_count: 2, transaction_id: Some(tx), .. } if tx == "tx_42"
    )));
}

#[tokio::test]
async fn completed_payout_is_audited_even_when_claim_write_fails() {
    let h = Harness::new();
    h.store.insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Failed, 60));
    h.store.fail_claim_writes("c1");

    let report = pass(&h).await;
    assert_eq!(report.successful_retries, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].operation, "settle_claim");
    assert_eq!(report.errors[0].payout_id, Some(PayoutId::new("p1")));

    assert_eq!(h.store.payout("p1").unwrap().status, PayoutStatus::Completed);
    assert_eq!(h.store.claim("c1").unwrap().status, ClaimStatus::Processing);
    let successes: Vec<_> = h
        .store
        .audit_log()
        .into_iter()
        .filter(|e| e.kind() == AuditKind::RetrySuccess)
        .collect();
    assert_eq!(successes.len(), 1);
    assert!(matches!(
        successes[0].detail,
        AuditDetail::RetrySuccess { retry_count: 1, .. }
    ));
}

#[tokio::test]
async fn retry_is_aborted_when_claim_no_longer_awaits_payout() {
    let h = Harness::new();
    h.store.insert_claim(claim("c1", ClaimStatus::Denied, 5));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Failed, 60));

    let report = pass(&h).await;
    assert_eq!(report.failed_operations_retried, 1);
    assert_eq!(report.successful_retries, 0);
    assert!(h.gateway.requests().is_empty());
    assert_eq!(h.store.payout("p1").unwrap().retry_count, 0);
    assert!(h.store.audit_log().is_empty());
}

#[tokio::test]
async fn notification_retry_emails_owner_and_completes_payout() {
    let h = Harness::new();
    h.store.insert_claim(claim("c1", ClaimStatus::Settled, 5));
    h.store.insert_payout(
        payout("p1", "c1", PayoutStatus::Failed, 60)
            .with_failure_type(FailureType::NotificationDelivery),
    );

    let report = pass(&h).await;
    assert_eq!(report.successful_retries, 1);
    assert!(h.gateway.requests().is_empty());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].0,
        Channel::Email {
            to: "sam@example.com".to_string()
        }
    );
    assert!(matches!(
        &sent[0].1,
        Notification::PayoutProcessed { owner_name, .. } if owner_name == "Sam Lee"
    ));

    let payout = h.store.payout("p1").unwrap();
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.notification_sent_at, Some(now()));
}

#[tokio::test]
async fn one_failing_payout_does_not_stop_the_batch() {
    let h = Harness::new();
    for i in 1..=10 {
        let claim_id = format!("c{:02}", i);
        let payout_id = format!("p{:02}", i);
        h.store
            .insert_claim(claim(&claim_id, ClaimStatus::Processing, 5));
        h.store
            .insert_payout(payout(&payout_id, &claim_id, PayoutStatus::Failed, 100 - i));
    }
    h.store.fail_payout("p03");

    let report = pass(&h).await;
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].payout_id, Some(PayoutId::new("p03")));
    assert_eq!(report.errors[0].operation, "retry");
    assert_eq!(report.failed_operations_retried, 9);
    assert_eq!(report.successful_retries, 9);
    assert_eq!(h.gateway.requests().len(), 10);

    for i in (1..=10).filter(|i| *i != 3) {
        let payout = h.store.payout(&format!("p{:02}", i)).unwrap();
        assert_eq!(payout.status, PayoutStatus::Completed);
    }
    assert_eq!(h.store.payout("p03").unwrap().status, PayoutStatus::Failed);
}

// =============================================================================
// Manual retry
// =============================================================================

#[tokio::test]
async fn operator_can_retry_escalated_payout_past_the_threshold() {
    let h = Harness::new();
    h.store.insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store.insert_payout(
        payout("p1", "c1", PayoutStatus::Escalated, 600).with_retry_count(5),
    );

    let result = h
        .reconciler
        .manual_retry(&PayoutId::new("p1"), &Operator::new("alice"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.outcome, ManualRetryOutcome::Success);
    assert_eq!(h.store.payout("p1").unwrap().status, PayoutStatus::Completed);
    assert_eq!(h.store.claim("c1").unwrap().status, ClaimStatus::Settled);

    let log = h.store.audit_log();
    let manual: Vec<_> = log
        .iter()
        .filter(|e| e.kind() == AuditKind::ManualRetry)
        .collect();
    assert_eq!(manual.len(), 1);
    assert_eq!(manual[0].actor, Actor::Operator("alice".to_string()));
    assert_eq!(
        manual[0].detail,
        AuditDetail::ManualRetry {
            outcome: ManualRetryOutcome::Success
        }
    );
    assert!(log
        .iter()
        .filter(|e| e.kind() == AuditKind::RetrySuccess)
        .all(|e| e.actor == Actor::Operator("alice".to_string())));
}

#[tokio::test]
async fn manual_retry_of_completed_payout_is_skipped_but_audited() {
    let h = Harness::new();
    h.store.insert_claim(claim("c1", ClaimStatus::Settled, 5));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Completed, 60));

    let result = h
        .reconciler
        .manual_retry(&PayoutId::new("p1"), &Operator::new("bob"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.outcome, ManualRetryOutcome::Skipped);
    assert!(h.gateway.requests().is_empty());
    assert_eq!(h.store.audit_log().len(), 1);
}

#[tokio::test]
async fn manual_retry_of_unknown_payout_is_not_found() {
    let h = Harness::new();
    let err = h
        .reconciler
        .manual_retry(&PayoutId::new("missing"), &Operator::new("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::PayoutNotFound { .. }));
    assert!(h.store.audit_log().is_empty());
}

// =============================================================================
// Deadline and summary
// =============================================================================

#[tokio::test]
async fn exhausted_deadline_stops_before_any_write() {
    let config = ReconcilerConfig {
        pass_deadline: StdDuration::ZERO,
        ..Default::default()
    };
    let h = Harness::build(
        ScriptedGateway::approving(),
        RecordingNotifier::delivering(),
        config,
    );
    h.store.insert_claim(claim("c1", ClaimStatus::Processing, 5));
    h.store
        .insert_payout(payout("p1", "c1", PayoutStatus::Completed, 5));

    let report = pass(&h).await;
    assert!(report.deadline_exceeded);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].operation, "deadline_exceeded");
    assert_eq!(h.store.mutation_count(), 0);
    assert_eq!(h.store.reports().len(), 1);
}

#[tokio::test]
async fn busy_pass_posts_a_summary_and_quiet_pass_does_not() {
    let config = ReconcilerConfig {
        summary_mismatch_threshold: 1,
        ..Default::default()
    };
    let h = Harness::build(
        ScriptedGateway::approving(),
        RecordingNotifier::delivering(),
        config,
    );

    pass(&h).await;
    assert_eq!(h.notifier.summaries(), 0);

    for id in ["c1", "c2"] {
        h.store.insert_claim(claim(id, ClaimStatus::Processing, 5));
        h.store.insert_payout(payout(
            &id.replace('c', "p"),
            id,
            PayoutStatus::Completed,
            5,
        ));
    }
    let report = pass(&h).await;
    assert_eq!(report.mismatched_states_fixed, 2);
    assert_eq!(h.notifier.summaries(), 1);
    assert!(h
        .notifier
        .sent()
        .iter()
        .all(|(channel, _)| *channel == Channel::Chat));
}

#[tokio::test]
async fn manual_trigger_is_recorded_on_the_report() {
    let h = Harness::new();
    let report = h
        .reconciler
        .run_pass(RunTrigger::Manual {
            operator: "alice".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(
        report.trigger,
        RunTrigger::Manual {
            operator: "alice".to_string()
        }
    );
    assert_eq!(report.completed_at, Some(now()));
    let stored = h.reconciler.audit().list_runs(5).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].run_id, report.run_id);
}
