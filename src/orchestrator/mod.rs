//! Payment Orchestrator
//!
//! Owns the payment lifecycle: initiate, reconcile the asynchronous gateway
//! callback (or an active status query) against the in-flight record,
//! finalize, and drive refunds. The orchestrator is the only writer to the
//! payment record store and the transaction ledger.
//!
//! The callback handler and the status query are two independent entry
//! points into the same state machine and may race for the same record. A
//! per-record async lock makes the read-modify-write of status a
//! single-writer critical section; the loser observes the already-terminal
//! status and degrades to the idempotent ledger-only path.


use crate::database::error::DbResult;
use crate::database::ledger_repository::{LedgerEntry, LedgerEntryType, NewLedgerEntry};
use crate::database::payment_repository::{
    PaymentDirection, PaymentPurpose, PaymentRecord, PaymentStatus,
};
use crate::database::repository::{LedgerStore, PaymentStore, TransitionDetails};
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::gateway::traits::PaymentGateway;
use crate::gateway::types::{
    CallbackEvent, CallbackKind, CollectionRequest, DisbursementRequest, GatewayExchange,
    InitiationOutcome, QueryOutcome,
};
use crate::notifications::{NotificationSink, PaymentEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// The authenticated caller, resolved by the upstream auth layer
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: String,
}

/// Orchestrator settings carried over from application config
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub currency: String,
    pub refund_privileged_roles: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            currency: "KES".to_string(),
            refund_privileged_roles: vec!["admin".to_string(), "partner".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateCollectionRequest {
    pub payer_reference: String,
    pub amount: i64,
    pub purpose: PaymentPurpose,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionInitiated {
    pub payment_id: Uuid,
    pub correlation_id: String,
    pub customer_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundInitiated {
    pub refund_payment_id: Uuid,
    pub correlation_id: String,
}

/// Outcome of processing one callback delivery
#[derive(Debug, Clone, Serialize)]
pub struct CallbackAck {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// True when the record was already terminal and the delivery was
    /// absorbed as a duplicate
    pub duplicate: bool,
}

pub struct PaymentOrchestrator {
    payments: Arc<dyn PaymentStore>,
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Arc<dyn NotificationSink>,
    config: OrchestratorConfig,
    record_locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PaymentOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Arc<dyn NotificationSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            payments,
            ledger,
            gateway,
            notifications,
            config,
            record_locks: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Collection initiation
    // =========================================================================

    /// Validate input, create a PENDING record, and push the payment request
    /// to the gateway. Returns as soon as the gateway accepts; settlement
    /// arrives later via callback. A rejected or timed-out initiation leaves
    /// the record FAILED, never silently PENDING.
    pub async fn initiate_collection(
        &self,
        request: InitiateCollectionRequest,
    ) -> AppResult<CollectionInitiated> {
        if request.amount <= 0 {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: request.amount,
            }));
        }
        let payer_reference = normalize_payer_reference(&request.payer_reference)?;

        let record = PaymentRecord::new_pending(
            PaymentDirection::Collection,
            request.amount,
            self.config.currency.clone(),
            payer_reference.clone(),
            request.purpose,
            request.description.clone(),
            None,
            request.metadata,
        );
        let record = self.payments.create(&record).await?;

        info!(payment_id = %record.id, amount = record.amount, "collection record created");

        let gateway_request = CollectionRequest {
            amount: record.amount,
            currency: record.currency.clone(),
            payer_reference,
            account_reference: record.id.to_string(),
            description: request
                .description
                .unwrap_or_else(|| record.purpose.as_str().to_string()),
        };

        match self.gateway.initiate_collection(gateway_request.clone()).await {
            Ok(result) => {
                self.append_exchange(
                    LedgerEntryType::CollectionRequest,
                    Some(record.id),
                    &result.exchange,
                    &result.outcome,
                )
                .await?;

                match result.outcome {
                    InitiationOutcome::Accepted {
                        correlation_id,
                        customer_message,
                    } => {
                        self.payments
                            .assign_correlation(record.id, &correlation_id)
                            .await?;
                        self.advance_from_pending(record.id).await?;

                        info!(
                            payment_id = %record.id,
                            %correlation_id,
                            "gateway accepted collection request"
                        );

                        Ok(CollectionInitiated {
                            payment_id: record.id,
                            correlation_id,
                            customer_message,
                        })
                    }
                    InitiationOutcome::Rejected { code, message } => {
                        self.fail_initiation(record.id, &code, &message).await?;
                        Err(AppError::external(
                            crate::error::ExternalError::GatewayRejection { code, message },
                        ))
                    }
                }
            }
            Err(err) => {
                // Timeout included: the push may have reached the provider
                // anyway, so the failed attempt is ledgered for operators to
                // reconcile against provider statements
                self.ledger
                    .append(NewLedgerEntry {
                        transaction_type: LedgerEntryType::CollectionRequest,
                        related_payment_id: Some(record.id),
                        request_payload: json!({
                            "amount": gateway_request.amount,
                            "currency": gateway_request.currency,
                            "payer_reference": gateway_request.payer_reference,
                            "account_reference": gateway_request.account_reference,
                        }),
                        response_payload: None,
                        success: false,
                        duration_ms: None,
                        gateway_code: Some(err.code().to_string()),
                        gateway_message: Some(err.to_string()),
                    })
                    .await?;

                self.fail_initiation(record.id, err.code(), &err.to_string())
                    .await?;
                Err(err)
            }
        }
    }

    // =========================================================================
    // Callback reconciliation
    // =========================================================================

    /// Process a gateway collection callback delivered to the public
    /// endpoint. Validation (schema + authenticity) happens before any
    /// record is touched; unmatched callbacks are ledgered and rejected and
    /// never create a record.
    pub async fn handle_collection_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<CallbackAck> {
        self.handle_callback(CallbackKind::Collection, payload, signature)
            .await
    }

    /// Disbursement counterpart to [`handle_collection_callback`], matched
    /// in the disbursement correlation-id namespace. A successful
    /// disbursement additionally rolls its amount up into the original
    /// collection's refunded total.
    pub async fn handle_disbursement_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<CallbackAck> {
        self.handle_callback(CallbackKind::Disbursement, payload, signature)
            .await
    }

    async fn handle_callback(
        &self,
        kind: CallbackKind,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<CallbackAck> {
        let event = match self.gateway.validate_callback(kind, payload, signature) {
            Ok(event) => event,
            Err(err) => {
                // Still ledgered: rejected deliveries are evidence
                self.ledger
                    .append(NewLedgerEntry {
                        transaction_type: LedgerEntryType::RejectedCallback,
                        related_payment_id: None,
                        request_payload: raw_payload_value(payload),
                        response_payload: None,
                        success: false,
                        duration_ms: None,
                        gateway_code: Some(err.code().to_string()),
                        gateway_message: Some(err.to_string()),
                    })
                    .await?;
                return Err(err);
            }
        };

        let direction = match kind {
            CallbackKind::Collection => PaymentDirection::Collection,
            CallbackKind::Disbursement => PaymentDirection::Disbursement,
        };

        let record = match self
            .payments
            .find_by_correlation_id(direction, &event.correlation_id)
            .await?
        {
            Some(record) => record,
            None => {
                warn!(
                    correlation_id = %event.correlation_id,
                    "callback matched no payment record"
                );
                self.ledger
                    .append(NewLedgerEntry {
                        transaction_type: LedgerEntryType::OrphanCallback,
                        related_payment_id: None,
                        request_payload: event.payload.clone(),
                        response_payload: None,
                        success: false,
                        duration_ms: None,
                        gateway_code: Some(event.result_code.clone()),
                        gateway_message: Some(event.result_message.clone()),
                    })
                    .await?;
                return Err(AppError::domain(DomainError::ReconciliationMismatch {
                    correlation_id: event.correlation_id,
                }));
            }
        };

        let entry_type = match kind {
            CallbackKind::Collection => LedgerEntryType::CollectionCallback,
            CallbackKind::Disbursement => LedgerEntryType::DisbursementCallback,
        };

        let lock = self.record_lock(record.id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.reconcile_callback(record.id, entry_type, &event).await
        };
        drop(lock);
        self.release_record_lock(record.id).await;
        outcome
    }

    /// Body of the callback critical section: fresh read, terminal check,
    /// transition, ledger entry
    async fn reconcile_callback(
        &self,
        payment_id: Uuid,
        entry_type: LedgerEntryType,
        event: &CallbackEvent,
    ) -> AppResult<CallbackAck> {
        // Fresh read inside the critical section; a racing query may have
        // finished the record already
        let current = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            }))?;

        if current.status.is_terminal() {
            // Gateways retry deliveries; absorb the duplicate but keep the
            // evidence
            self.append_callback_entry(entry_type, &current, event).await?;
            info!(
                payment_id = %current.id,
                status = %current.status,
                "duplicate callback absorbed"
            );
            return Ok(CallbackAck {
                payment_id: current.id,
                status: current.status,
                duplicate: true,
            });
        }

        let updated = if event.is_success() {
            let details = TransitionDetails {
                gateway_receipt_id: event.receipt_id.clone(),
                settled_at: event.settled_at,
                ..TransitionDetails::default()
            };
            self.finalize(&current, PaymentStatus::Completed, details)
                .await?
        } else {
            let details =
                TransitionDetails::failure(event.result_code.clone(), event.result_message.clone());
            self.finalize(&current, PaymentStatus::Failed, details)
                .await?
        };

        self.append_callback_entry(entry_type, &updated, event).await?;

        if updated.status == PaymentStatus::Completed
            && updated.direction == PaymentDirection::Disbursement
        {
            self.settle_refund(&updated).await?;
        }

        self.dispatch_terminal_notification(&updated);

        info!(
            payment_id = %updated.id,
            status = %updated.status,
            result_code = %event.result_code,
            "callback reconciled"
        );

        Ok(CallbackAck {
            payment_id: updated.id,
            status: updated.status,
            duplicate: false,
        })
    }

    // =========================================================================
    // Status query
    // =========================================================================

    /// Return the record's current status, actively polling the gateway for
    /// records still in flight (used when a callback may have been lost).
    /// Terminal records are returned from the store without contacting the
    /// gateway.
    pub async fn query_status(&self, payment_id: Uuid) -> AppResult<PaymentRecord> {
        let record = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            }))?;

        if record.status.is_terminal() {
            return Ok(record);
        }

        // Nothing to ask the gateway about until a correlation id exists
        let correlation_id = match &record.correlation_id {
            Some(correlation_id) => correlation_id.clone(),
            None => return Ok(record),
        };

        let lock = self.record_lock(record.id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.refresh_status(record.id, &correlation_id).await
        };
        drop(lock);
        self.release_record_lock(record.id).await;
        outcome
    }

    /// Body of the status-query critical section: re-check, poll, apply
    async fn refresh_status(
        &self,
        payment_id: Uuid,
        correlation_id: &str,
    ) -> AppResult<PaymentRecord> {
        let current = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            }))?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let result = match self.gateway.query_status(correlation_id).await {
            Ok(result) => result,
            Err(err) => {
                // Query failure is not a payment failure: the record stays
                // in flight and is resolved by a later callback or query
                self.ledger
                    .append(NewLedgerEntry {
                        transaction_type: LedgerEntryType::StatusQuery,
                        related_payment_id: Some(current.id),
                        request_payload: json!({ "correlation_id": correlation_id }),
                        response_payload: None,
                        success: false,
                        duration_ms: None,
                        gateway_code: Some(err.code().to_string()),
                        gateway_message: Some(err.to_string()),
                    })
                    .await?;
                return Ok(current);
            }
        };

        let (success, gateway_code, gateway_message) = match &result.outcome {
            QueryOutcome::Settled { .. } => (true, Some("0".to_string()), None),
            QueryOutcome::Failed { code, message } => {
                (false, Some(code.clone()), Some(message.clone()))
            }
            QueryOutcome::Pending => (false, None, None),
        };
        self.ledger
            .append(NewLedgerEntry {
                transaction_type: LedgerEntryType::StatusQuery,
                related_payment_id: Some(current.id),
                request_payload: result.exchange.request_payload.clone(),
                response_payload: result.exchange.response_payload.clone(),
                success,
                duration_ms: Some(result.exchange.duration_ms),
                gateway_code,
                gateway_message,
            })
            .await?;

        let updated = match result.outcome {
            QueryOutcome::Settled {
                receipt_id,
                settled_at,
            } => {
                let details = TransitionDetails {
                    gateway_receipt_id: receipt_id,
                    settled_at,
                    ..TransitionDetails::default()
                };
                let updated = self
                    .finalize(&current, PaymentStatus::Completed, details)
                    .await?;
                if updated.direction == PaymentDirection::Disbursement {
                    self.settle_refund(&updated).await?;
                }
                self.dispatch_terminal_notification(&updated);
                updated
            }
            QueryOutcome::Failed { code, message } => {
                let updated = self
                    .finalize(&current, PaymentStatus::Failed, TransitionDetails::failure(code, message))
                    .await?;
                self.dispatch_terminal_notification(&updated);
                updated
            }
            // Includes codes ambiguous with "still pending": never force a
            // failure until a definitive signal arrives
            QueryOutcome::Pending => current,
        };

        Ok(updated)
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    /// Spawn a DISBURSEMENT record against a settled collection and push it
    /// to the gateway. Policy checks run inside the original record's
    /// critical section so concurrent refund requests cannot jointly exceed
    /// the refundable remainder. No gateway call is made for rejected
    /// refunds.
    pub async fn initiate_refund(
        &self,
        actor: &Actor,
        original_payment_id: Uuid,
        amount: Option<i64>,
        reason: String,
    ) -> AppResult<RefundInitiated> {
        if !self
            .config
            .refund_privileged_roles
            .iter()
            .any(|role| role == &actor.role)
        {
            return Err(AppError::domain(DomainError::Forbidden {
                actor_id: actor.id.clone(),
                role: actor.role.clone(),
            }));
        }

        let original = self
            .payments
            .find_by_id(original_payment_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                payment_id: original_payment_id.to_string(),
            }))?;

        // Reservation happens inside the original's critical section: the
        // exposure check and the refund record insert are atomic with
        // respect to other refund requests for the same collection
        let lock = self.record_lock(original.id).await;
        let reserved = {
            let _guard = lock.lock().await;
            self.reserve_refund(original.id, amount, &reason).await
        };
        drop(lock);
        self.release_record_lock(original.id).await;
        let refund = reserved?;

        info!(
            refund_payment_id = %refund.id,
            original_payment_id = %original.id,
            amount = refund.amount,
            actor_id = %actor.id,
            "refund record created"
        );

        let gateway_request = DisbursementRequest {
            amount: refund.amount,
            currency: refund.currency.clone(),
            payee_reference: refund.payer_reference.clone(),
            account_reference: refund.id.to_string(),
            reason,
        };

        match self.gateway.initiate_disbursement(gateway_request).await {
            Ok(result) => {
                self.append_exchange(
                    LedgerEntryType::DisbursementRequest,
                    Some(refund.id),
                    &result.exchange,
                    &result.outcome,
                )
                .await?;

                match result.outcome {
                    InitiationOutcome::Accepted { correlation_id, .. } => {
                        self.payments
                            .assign_correlation(refund.id, &correlation_id)
                            .await?;
                        self.advance_from_pending(refund.id).await?;

                        Ok(RefundInitiated {
                            refund_payment_id: refund.id,
                            correlation_id,
                        })
                    }
                    InitiationOutcome::Rejected { code, message } => {
                        self.fail_initiation(refund.id, &code, &message).await?;
                        Err(AppError::external(
                            crate::error::ExternalError::GatewayRejection { code, message },
                        ))
                    }
                }
            }
            Err(err) => {
                self.ledger
                    .append(NewLedgerEntry {
                        transaction_type: LedgerEntryType::DisbursementRequest,
                        related_payment_id: Some(refund.id),
                        request_payload: json!({
                            "amount": refund.amount,
                            "currency": refund.currency,
                            "payee_reference": refund.payer_reference,
                            "account_reference": refund.id.to_string(),
                        }),
                        response_payload: None,
                        success: false,
                        duration_ms: None,
                        gateway_code: Some(err.code().to_string()),
                        gateway_message: Some(err.to_string()),
                    })
                    .await?;

                self.fail_initiation(refund.id, err.code(), &err.to_string())
                    .await?;
                Err(err)
            }
        }
    }

    // =========================================================================
    // Ledger access for operators
    // =========================================================================

    pub async fn payment_ledger(&self, payment_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        // Surface the record's full audit trail, absent records included:
        // an empty trail for an unknown id is a 404
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            }))?;
        Ok(self.ledger.find_by_payment_id(payment_id).await?)
    }

    /// Most recent gateway exchanges across all payments, newest first
    pub async fn recent_ledger(&self, limit: i64) -> AppResult<Vec<LedgerEntry>> {
        Ok(self.ledger.find_recent(limit.clamp(1, 500)).await?)
    }

    pub async fn find_payment(&self, payment_id: Uuid) -> AppResult<PaymentRecord> {
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::PaymentNotFound {
                    payment_id: payment_id.to_string(),
                })
            })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn record_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        {
            let locks = self.record_locks.read().await;
            if let Some(lock) = locks.get(&id) {
                return lock.clone();
            }
        }
        let mut locks = self.record_locks.write().await;
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Evict the map's entry once no task holds or awaits the lock, so the
    /// map does not grow with every payment ever processed. Callers drop
    /// their clone of the `Arc` before calling this.
    async fn release_record_lock(&self, id: Uuid) {
        let mut locks = self.record_locks.write().await;
        if let Some(lock) = locks.get(&id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&id);
            }
        }
    }

    /// PENDING → PROCESSING after gateway acceptance. Tolerates the callback
    /// having advanced the record first (acceptance response and callback
    /// can arrive in either order).
    async fn advance_from_pending(&self, id: Uuid) -> DbResult<()> {
        match self
            .payments
            .transition(
                id,
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                TransitionDetails::default(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_stale_status() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Apply a terminal transition from whatever non-terminal status the
    /// record is in. Records still PENDING (callback overtook the initiate
    /// response) pass through PROCESSING first.
    async fn finalize(
        &self,
        current: &PaymentRecord,
        target: PaymentStatus,
        details: TransitionDetails,
    ) -> AppResult<PaymentRecord> {
        let mut status = current.status;
        if status == PaymentStatus::Pending {
            match self
                .payments
                .transition(
                    current.id,
                    PaymentStatus::Pending,
                    PaymentStatus::Processing,
                    TransitionDetails::default(),
                )
                .await
            {
                Ok(record) => status = record.status,
                // The initiation path advances PENDING records without the
                // record lock; losing this hop to it just means the record
                // is already where we wanted it
                Err(err) if err.is_stale_status() => {
                    status = self
                        .payments
                        .find_by_id(current.id)
                        .await?
                        .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                            payment_id: current.id.to_string(),
                        }))?
                        .status;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let updated = self
            .payments
            .transition(current.id, status, target, details)
            .await?;
        Ok(updated)
    }

    /// Mark a record FAILED immediately after a rejected or failed
    /// initiation, and notify
    async fn fail_initiation(&self, id: Uuid, code: &str, message: &str) -> AppResult<()> {
        let failed = self
            .payments
            .transition(
                id,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                TransitionDetails::failure(code.to_string(), message.to_string()),
            )
            .await?;

        warn!(payment_id = %id, code, "initiation failed");
        self.dispatch_terminal_notification(&failed);
        Ok(())
    }

    /// Roll a settled disbursement up into its original collection:
    /// cumulative refunded amount plus the REFUNDED / PARTIALLY_REFUNDED
    /// recompute. The only place a terminal collection's status changes.
    async fn settle_refund(&self, refund: &PaymentRecord) -> AppResult<()> {
        let original_id = match refund.related_payment_id {
            Some(original_id) => original_id,
            None => {
                warn!(payment_id = %refund.id, "disbursement has no related payment");
                return Ok(());
            }
        };

        let lock = self.record_lock(original_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_refund_progress(original_id, refund).await
        };
        drop(lock);
        self.release_record_lock(original_id).await;
        outcome
    }

    async fn apply_refund_progress(
        &self,
        original_id: Uuid,
        refund: &PaymentRecord,
    ) -> AppResult<()> {
        let original = self
            .payments
            .find_by_id(original_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                payment_id: original_id.to_string(),
            }))?;

        let refunded_amount = original.refunded_amount + refund.amount;
        let status = if refunded_amount >= original.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        self.payments
            .record_refund_progress(original_id, refunded_amount, status)
            .await?;

        info!(
            original_payment_id = %original_id,
            refund_payment_id = %refund.id,
            refunded_amount,
            status = %status,
            "refund settled against original collection"
        );
        Ok(())
    }

    /// Policy checks plus the refund record insert, run while holding the
    /// original's lock so concurrent requests cannot jointly exceed the
    /// refundable remainder
    async fn reserve_refund(
        &self,
        original_id: Uuid,
        requested: Option<i64>,
        reason: &str,
    ) -> AppResult<PaymentRecord> {
        let original = self
            .payments
            .find_by_id(original_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound {
                payment_id: original_id.to_string(),
            }))?;

        if original.direction != PaymentDirection::Collection {
            return Err(AppError::domain(DomainError::RefundPolicy {
                reason: "only collections can be refunded".to_string(),
            }));
        }
        if !matches!(
            original.status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        ) {
            return Err(AppError::domain(DomainError::RefundPolicy {
                reason: format!(
                    "original payment is {} and has no settled funds to refund",
                    original.status
                ),
            }));
        }

        let exposure = self.payments.refund_exposure(original.id).await?;
        let remainder = original.amount - exposure;
        let amount = requested.unwrap_or(remainder);

        if amount <= 0 {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount,
            }));
        }
        if amount > remainder {
            return Err(AppError::domain(DomainError::RefundPolicy {
                reason: format!(
                    "requested {} exceeds refundable remainder {}",
                    amount, remainder
                ),
            }));
        }

        let refund = PaymentRecord::new_pending(
            PaymentDirection::Disbursement,
            amount,
            original.currency.clone(),
            original.payer_reference.clone(),
            PaymentPurpose::Refund,
            Some(reason.to_string()),
            Some(original.id),
            None,
        );
        Ok(self.payments.create(&refund).await?)
    }

    async fn append_exchange(
        &self,
        transaction_type: LedgerEntryType,
        related_payment_id: Option<Uuid>,
        exchange: &GatewayExchange,
        outcome: &InitiationOutcome,
    ) -> AppResult<()> {
        let (success, gateway_code, gateway_message) = match outcome {
            InitiationOutcome::Accepted { correlation_id, .. } => {
                (true, Some("0".to_string()), Some(correlation_id.clone()))
            }
            InitiationOutcome::Rejected { code, message } => {
                (false, Some(code.clone()), Some(message.clone()))
            }
        };

        self.ledger
            .append(NewLedgerEntry {
                transaction_type,
                related_payment_id,
                request_payload: exchange.request_payload.clone(),
                response_payload: exchange.response_payload.clone(),
                success,
                duration_ms: Some(exchange.duration_ms),
                gateway_code,
                gateway_message,
            })
            .await?;
        Ok(())
    }

    async fn append_callback_entry(
        &self,
        transaction_type: LedgerEntryType,
        record: &PaymentRecord,
        event: &CallbackEvent,
    ) -> AppResult<()> {
        self.ledger
            .append(NewLedgerEntry {
                transaction_type,
                related_payment_id: Some(record.id),
                request_payload: event.payload.clone(),
                response_payload: None,
                success: event.is_success(),
                duration_ms: None,
                gateway_code: Some(event.result_code.clone()),
                gateway_message: Some(event.result_message.clone()),
            })
            .await?;
        Ok(())
    }

    /// Notification dispatch is fire-and-forget: it runs strictly after the
    /// state change is persisted and its latency never holds up the
    /// callback's HTTP response
    fn dispatch_terminal_notification(&self, record: &PaymentRecord) {
        let event = match record.status {
            PaymentStatus::Completed => PaymentEvent::Completed(record.clone()),
            PaymentStatus::Failed => PaymentEvent::Failed(record.clone()),
            _ => return,
        };

        let sink = self.notifications.clone();
        tokio::spawn(async move {
            sink.notify(event).await;
        });
    }
}

/// Best-effort JSON view of a raw callback body for the ledger; bodies that
/// are not JSON are kept as a string
fn raw_payload_value(payload: &[u8]) -> serde_json::Value {
    serde_json::from_slice(payload).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
    })
}

/// Normalize a payer phone number to the gateway's native `2547XXXXXXXX` /
/// `2541XXXXXXXX` format. Accepts `07...`, `01...`, `+254...` and `254...`
/// input.
pub fn normalize_payer_reference(raw: &str) -> Result<String, AppError> {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        regex::Regex::new(r"^(?:\+?254|0)([17]\d{8})$").expect("valid phone pattern")
    });

    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    match pattern.captures(&cleaned) {
        Some(captures) => Ok(format!("254{}", &captures[1])),
        None => Err(AppError::validation(
            ValidationError::InvalidPayerReference {
                reference: raw.to_string(),
            },
        )),
    }
}
