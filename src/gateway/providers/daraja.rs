//! Daraja-style mobile-money gateway adapter
//!
//! Speaks the provider's STK-push (collection), B2C (disbursement) and
//! status-query APIs, and validates inbound callback payloads. Stateless
//! beyond transport configuration; every call carries a bounded timeout.

use crate::config::GatewayConfig;
use crate::error::{
    AppError, AppResult, ExternalError, ValidationError,
};
use crate::gateway::traits::PaymentGateway;
use crate::gateway::types::{
    CallbackEvent, CallbackKind, CollectionRequest, DisbursementRequest, GatewayExchange,
    InitiationOutcome, InitiationResult, QueryOutcome, StatusQueryResult,
};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Query result codes that are ambiguous with "still pending": the payer's
/// prompt may still be open, so they must not force a failure transition.
const AMBIGUOUS_QUERY_CODES: &[&str] = &["1032", "1037"];

/// Provider error code meaning the request is still being processed
const STILL_PROCESSING_CODE: &str = "500.001.1001";

pub struct DarajaGateway {
    config: GatewayConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl DarajaGateway {
    pub fn new(config: GatewayConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::new(crate::error::AppErrorKind::Infrastructure(
                    crate::error::InfrastructureError::Configuration {
                        message: format!("failed to build HTTP client: {}", e),
                    },
                ))
            })?;

        Ok(Self { config, client })
    }

    fn transport_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::external(ExternalError::GatewayTimeout {
                timeout_secs: self.config.timeout_secs,
            })
        } else {
            AppError::external(ExternalError::GatewayRejection {
                code: "NETWORK_ERROR".to_string(),
                message: err.to_string(),
            })
        }
    }

    async fn access_token(&self) -> AppResult<String> {
        let url = format!("{}/oauth/v1/generate", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "gateway token request rejected");
            return Err(AppError::external(ExternalError::GatewayRejection {
                code: format!("AUTH_{}", status.as_u16()),
                message: body,
            }));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(token.access_token)
    }

    /// POST an authenticated JSON request, returning HTTP status, parsed
    /// body, and elapsed time. Timeouts map to `GatewayTimeout`.
    async fn post_json(
        &self,
        endpoint: &str,
        payload: &Value,
    ) -> AppResult<(reqwest::StatusCode, Value, i64)> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.base_url, endpoint);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as i64;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        Ok((status, body, duration_ms))
    }

    /// `YYYYMMDDHHMMSS` timestamp the provider expects in signed fields
    fn timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }

    /// Signed password field: base64(shortcode + passkey + timestamp)
    fn password(&self, timestamp: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ))
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        use hmac::{Hmac, Mac};
        use sha2::Sha512;

        type HmacSha512 = Hmac<Sha512>;

        let mut mac = match HmacSha512::new_from_slice(self.config.callback_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };

        mac.update(payload);
        let computed_signature = hex::encode(mac.finalize().into_bytes());
        let provided_signature = signature.trim();

        // Constant-time comparison to prevent timing attacks
        if computed_signature.len() != provided_signature.len() {
            return false;
        }

        computed_signature
            .as_bytes()
            .iter()
            .zip(provided_signature.as_bytes().iter())
            .fold(0, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    fn parse_collection_callback(&self, payload: Value) -> AppResult<CallbackEvent> {
        let callback = payload
            .pointer("/Body/stkCallback")
            .ok_or_else(|| malformed("missing Body.stkCallback"))?;

        let correlation_id = callback
            .get("CheckoutRequestID")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing CheckoutRequestID"))?
            .to_string();
        let result_code = callback
            .get("ResultCode")
            .map(code_string)
            .ok_or_else(|| malformed("missing ResultCode"))?;
        let result_message = callback
            .get("ResultDesc")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing ResultDesc"))?
            .to_string();

        let mut receipt_id = None;
        let mut settled_at = None;
        let mut amount = None;
        if let Some(items) = callback
            .pointer("/CallbackMetadata/Item")
            .and_then(Value::as_array)
        {
            for item in items {
                match item.get("Name").and_then(Value::as_str) {
                    Some("MpesaReceiptNumber") => {
                        receipt_id = item.get("Value").map(code_string);
                    }
                    Some("TransactionDate") => {
                        settled_at = item
                            .get("Value")
                            .map(code_string)
                            .as_deref()
                            .and_then(parse_gateway_timestamp);
                    }
                    Some("Amount") => {
                        amount = item.get("Value").and_then(Value::as_i64);
                    }
                    _ => {}
                }
            }
        }

        // A success callback without a receipt cannot be reconciled against
        // provider statements
        if result_code == "0" && receipt_id.is_none() {
            return Err(malformed("success callback missing MpesaReceiptNumber"));
        }

        Ok(CallbackEvent {
            kind: CallbackKind::Collection,
            correlation_id,
            result_code,
            result_message,
            receipt_id,
            settled_at,
            amount,
            payload,
        })
    }

    fn parse_disbursement_callback(&self, payload: Value) -> AppResult<CallbackEvent> {
        let result = payload
            .get("Result")
            .ok_or_else(|| malformed("missing Result"))?;

        let correlation_id = result
            .get("ConversationID")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing ConversationID"))?
            .to_string();
        let result_code = result
            .get("ResultCode")
            .map(code_string)
            .ok_or_else(|| malformed("missing ResultCode"))?;
        let result_message = result
            .get("ResultDesc")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing ResultDesc"))?
            .to_string();

        let receipt_id = result
            .get("TransactionID")
            .and_then(Value::as_str)
            .map(String::from);

        let mut settled_at = None;
        let mut amount = None;
        if let Some(params) = result
            .pointer("/ResultParameters/ResultParameter")
            .and_then(Value::as_array)
        {
            for param in params {
                match param.get("Key").and_then(Value::as_str) {
                    Some("TransactionCompletedDateTime") => {
                        settled_at = param
                            .get("Value")
                            .and_then(Value::as_str)
                            .and_then(parse_disbursement_timestamp);
                    }
                    Some("TransactionAmount") => {
                        amount = param.get("Value").and_then(Value::as_i64);
                    }
                    _ => {}
                }
            }
        }

        Ok(CallbackEvent {
            kind: CallbackKind::Disbursement,
            correlation_id,
            result_code,
            result_message,
            receipt_id,
            settled_at,
            amount,
            payload,
        })
    }
}

#[async_trait]
impl PaymentGateway for DarajaGateway {
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> AppResult<InitiationResult> {
        info!(
            amount = request.amount,
            payer = %request.payer_reference,
            reference = %request.account_reference,
            "initiating gateway collection"
        );

        let timestamp = Self::timestamp();
        let payload = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount,
            "PartyA": request.payer_reference,
            "PartyB": self.config.shortcode,
            "PhoneNumber": request.payer_reference,
            "CallBackURL": self.config.collection_callback_url,
            "AccountReference": request.account_reference,
            "TransactionDesc": request.description,
        });

        let (status, body, duration_ms) = self
            .post_json("/mpesa/stkpush/v1/processrequest", &payload)
            .await?;

        let exchange = GatewayExchange {
            request_payload: redact_password(payload),
            response_payload: Some(body.clone()),
            duration_ms,
        };

        let response_code = body.get("ResponseCode").map(code_string);
        let outcome = if status.is_success() && response_code.as_deref() == Some("0") {
            match body.get("CheckoutRequestID").and_then(Value::as_str) {
                Some(correlation_id) => InitiationOutcome::Accepted {
                    correlation_id: correlation_id.to_string(),
                    customer_message: body
                        .get("CustomerMessage")
                        .and_then(Value::as_str)
                        .map(String::from),
                },
                None => InitiationOutcome::Rejected {
                    code: "INVALID_RESPONSE".to_string(),
                    message: "acceptance response missing CheckoutRequestID".to_string(),
                },
            }
        } else {
            InitiationOutcome::Rejected {
                code: rejection_code(&body, status),
                message: rejection_message(&body, status),
            }
        };

        Ok(InitiationResult { outcome, exchange })
    }

    async fn initiate_disbursement(
        &self,
        request: DisbursementRequest,
    ) -> AppResult<InitiationResult> {
        info!(
            amount = request.amount,
            payee = %request.payee_reference,
            reference = %request.account_reference,
            "initiating gateway disbursement"
        );

        let payload = json!({
            "InitiatorName": self.config.initiator_name,
            "SecurityCredential": self.config.security_credential,
            "CommandID": "BusinessPayment",
            "Amount": request.amount,
            "PartyA": self.config.shortcode,
            "PartyB": request.payee_reference,
            "Remarks": request.reason,
            "QueueTimeOutURL": self.config.disbursement_callback_url,
            "ResultURL": self.config.disbursement_callback_url,
            "Occasion": request.account_reference,
        });

        let (status, body, duration_ms) = self
            .post_json("/mpesa/b2c/v1/paymentrequest", &payload)
            .await?;

        let exchange = GatewayExchange {
            request_payload: redact_credential(payload),
            response_payload: Some(body.clone()),
            duration_ms,
        };

        let response_code = body.get("ResponseCode").map(code_string);
        let outcome = if status.is_success() && response_code.as_deref() == Some("0") {
            match body.get("ConversationID").and_then(Value::as_str) {
                Some(correlation_id) => InitiationOutcome::Accepted {
                    correlation_id: correlation_id.to_string(),
                    customer_message: None,
                },
                None => InitiationOutcome::Rejected {
                    code: "INVALID_RESPONSE".to_string(),
                    message: "acceptance response missing ConversationID".to_string(),
                },
            }
        } else {
            InitiationOutcome::Rejected {
                code: rejection_code(&body, status),
                message: rejection_message(&body, status),
            }
        };

        Ok(InitiationResult { outcome, exchange })
    }

    async fn query_status(&self, correlation_id: &str) -> AppResult<StatusQueryResult> {
        info!(%correlation_id, "querying gateway for payment status");

        let timestamp = Self::timestamp();
        let payload = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "CheckoutRequestID": correlation_id,
        });

        let (status, body, duration_ms) = self
            .post_json("/mpesa/stkpushquery/v1/query", &payload)
            .await?;

        let exchange = GatewayExchange {
            request_payload: redact_password(payload),
            response_payload: Some(body.clone()),
            duration_ms,
        };

        let outcome = classify_query_response(status, &body);

        Ok(StatusQueryResult { outcome, exchange })
    }

    fn validate_callback(
        &self,
        kind: CallbackKind,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<CallbackEvent> {
        // Authenticity first: never parse business fields out of a payload
        // that cannot be attributed to the gateway
        let signature =
            signature.ok_or_else(|| AppError::external(ExternalError::CallbackAuthenticity))?;
        if !self.verify_signature(payload, signature) {
            return Err(AppError::external(ExternalError::CallbackAuthenticity));
        }

        let parsed: Value = serde_json::from_slice(payload)
            .map_err(|e| malformed(&format!("callback is not valid JSON: {}", e)))?;

        match kind {
            CallbackKind::Collection => self.parse_collection_callback(parsed),
            CallbackKind::Disbursement => self.parse_disbursement_callback(parsed),
        }
    }
}

/// Classify a status-query response into an outcome. Codes ambiguous with
/// "still pending" (the payer's prompt may still be open) never produce a
/// failure.
fn classify_query_response(status: reqwest::StatusCode, body: &Value) -> QueryOutcome {
    if status.is_success() {
        match body.get("ResultCode").map(code_string) {
            Some(code) if code == "0" => QueryOutcome::Settled {
                // The query surface reports settlement without receipt
                // detail; the callback remains the source for receipts
                receipt_id: None,
                settled_at: None,
            },
            Some(code) if AMBIGUOUS_QUERY_CODES.contains(&code.as_str()) => QueryOutcome::Pending,
            Some(code) => QueryOutcome::Failed {
                message: body
                    .get("ResultDesc")
                    .and_then(Value::as_str)
                    .unwrap_or("gateway reported failure")
                    .to_string(),
                code,
            },
            None => QueryOutcome::Pending,
        }
    } else if body.get("errorCode").map(code_string).as_deref() == Some(STILL_PROCESSING_CODE) {
        QueryOutcome::Pending
    } else {
        QueryOutcome::Failed {
            code: rejection_code(body, status),
            message: rejection_message(body, status),
        }
    }
}

fn malformed(message: &str) -> AppError {
    AppError::validation(ValidationError::MalformedPayload {
        message: message.to_string(),
    })
}

/// Result codes arrive as numbers or strings depending on the surface
fn code_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn rejection_code(body: &Value, status: reqwest::StatusCode) -> String {
    body.get("errorCode")
        .or_else(|| body.get("ResponseCode"))
        .map(code_string)
        .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()))
}

fn rejection_message(body: &Value, status: reqwest::StatusCode) -> String {
    body.get("errorMessage")
        .or_else(|| body.get("ResponseDescription"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("gateway returned HTTP {}", status))
}

/// `20260825143022`-style settlement timestamps on collection callbacks
fn parse_gateway_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// `25.08.2026 14:30:22`-style timestamps on disbursement callbacks
fn parse_disbursement_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%d.%m.%Y %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

fn redact_password(mut payload: Value) -> Value {
    if let Some(obj) = payload.as_object_mut() {
        if obj.contains_key("Password") {
            obj.insert("Password".to_string(), json!("[redacted]"));
        }
    }
    payload
}

fn redact_credential(mut payload: Value) -> Value {
    if let Some(obj) = payload.as_object_mut() {
        if obj.contains_key("SecurityCredential") {
            obj.insert("SecurityCredential".to_string(), json!("[redacted]"));
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    fn test_gateway() -> DarajaGateway {
        DarajaGateway::new(GatewayConfig {
            base_url: "https://sandbox.gateway.example".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            initiator_name: "operator".to_string(),
            security_credential: "credential".to_string(),
            callback_secret: "callback-secret".to_string(),
            collection_callback_url: "https://api.example.com/payments/collections/callback"
                .to_string(),
            disbursement_callback_url: "https://api.example.com/payments/refunds/callback"
                .to_string(),
            timeout_secs: 30,
        })
        .unwrap()
    }

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn collection_callback_body(result_code: i64) -> String {
        let metadata = if result_code == 0 {
            json!({
                "Item": [
                    {"Name": "Amount", "Value": 500},
                    {"Name": "MpesaReceiptNumber", "Value": "RCT-9"},
                    {"Name": "TransactionDate", "Value": 20260825143022i64},
                    {"Name": "PhoneNumber", "Value": 254712345678i64}
                ]
            })
        } else {
            Value::Null
        };

        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "CR-1",
                    "ResultCode": result_code,
                    "ResultDesc": if result_code == 0 {
                        "The service request is processed successfully."
                    } else {
                        "Request cancelled by user"
                    },
                    "CallbackMetadata": metadata
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_rejects_missing_signature() {
        let gateway = test_gateway();
        let body = collection_callback_body(0);
        let result = gateway.validate_callback(CallbackKind::Collection, body.as_bytes(), None);
        assert_eq!(result.unwrap_err().code(), "CALLBACK_UNAUTHENTIC");
    }

    #[test]
    fn test_rejects_invalid_signature() {
        let gateway = test_gateway();
        let body = collection_callback_body(0);
        let result = gateway.validate_callback(
            CallbackKind::Collection,
            body.as_bytes(),
            Some("deadbeef"),
        );
        assert_eq!(result.unwrap_err().code(), "CALLBACK_UNAUTHENTIC");
    }

    #[test]
    fn test_rejects_signature_from_wrong_secret() {
        let gateway = test_gateway();
        let body = collection_callback_body(0);
        let signature = sign(body.as_bytes(), "some-other-secret");
        let result = gateway.validate_callback(
            CallbackKind::Collection,
            body.as_bytes(),
            Some(&signature),
        );
        assert_eq!(result.unwrap_err().code(), "CALLBACK_UNAUTHENTIC");
    }

    #[test]
    fn test_rejects_tampered_payload() {
        let gateway = test_gateway();
        let body = collection_callback_body(0);
        let signature = sign(body.as_bytes(), "callback-secret");
        let tampered = body.replace("500", "5000");
        let result = gateway.validate_callback(
            CallbackKind::Collection,
            tampered.as_bytes(),
            Some(&signature),
        );
        assert_eq!(result.unwrap_err().code(), "CALLBACK_UNAUTHENTIC");
    }

    #[test]
    fn test_parses_success_collection_callback() {
        let gateway = test_gateway();
        let body = collection_callback_body(0);
        let signature = sign(body.as_bytes(), "callback-secret");
        let event = gateway
            .validate_callback(CallbackKind::Collection, body.as_bytes(), Some(&signature))
            .unwrap();

        assert!(event.is_success());
        assert_eq!(event.correlation_id, "CR-1");
        assert_eq!(event.receipt_id.as_deref(), Some("RCT-9"));
        assert_eq!(event.amount, Some(500));
        assert!(event.settled_at.is_some());
    }

    #[test]
    fn test_parses_cancelled_collection_callback() {
        let gateway = test_gateway();
        let body = collection_callback_body(1032);
        let signature = sign(body.as_bytes(), "callback-secret");
        let event = gateway
            .validate_callback(CallbackKind::Collection, body.as_bytes(), Some(&signature))
            .unwrap();

        assert!(!event.is_success());
        assert_eq!(event.result_code, "1032");
        assert!(event.receipt_id.is_none());
    }

    #[test]
    fn test_rejects_callback_missing_correlation_id() {
        let gateway = test_gateway();
        let body = json!({
            "Body": { "stkCallback": { "ResultCode": 0, "ResultDesc": "ok" } }
        })
        .to_string();
        let signature = sign(body.as_bytes(), "callback-secret");
        let result = gateway.validate_callback(
            CallbackKind::Collection,
            body.as_bytes(),
            Some(&signature),
        );
        assert_eq!(result.unwrap_err().code(), "MALFORMED_PAYLOAD");
    }

    #[test]
    fn test_rejects_success_callback_without_receipt() {
        let gateway = test_gateway();
        let body = json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "CR-1",
                    "ResultCode": 0,
                    "ResultDesc": "ok"
                }
            }
        })
        .to_string();
        let signature = sign(body.as_bytes(), "callback-secret");
        let result = gateway.validate_callback(
            CallbackKind::Collection,
            body.as_bytes(),
            Some(&signature),
        );
        assert_eq!(result.unwrap_err().code(), "MALFORMED_PAYLOAD");
    }

    #[test]
    fn test_parses_disbursement_callback() {
        let gateway = test_gateway();
        let body = json!({
            "Result": {
                "ResultType": 0,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "OriginatorConversationID": "10571-7910404-1",
                "ConversationID": "AG_20260825_0000123",
                "TransactionID": "RFD-77",
                "ResultParameters": {
                    "ResultParameter": [
                        {"Key": "TransactionAmount", "Value": 400},
                        {"Key": "TransactionCompletedDateTime", "Value": "25.08.2026 14:30:22"}
                    ]
                }
            }
        })
        .to_string();
        let signature = sign(body.as_bytes(), "callback-secret");
        let event = gateway
            .validate_callback(
                CallbackKind::Disbursement,
                body.as_bytes(),
                Some(&signature),
            )
            .unwrap();

        assert!(event.is_success());
        assert_eq!(event.correlation_id, "AG_20260825_0000123");
        assert_eq!(event.receipt_id.as_deref(), Some("RFD-77"));
        assert_eq!(event.amount, Some(400));
        assert!(event.settled_at.is_some());
    }

    #[test]
    fn test_ambiguous_query_codes_stay_pending() {
        // 1032/1037 from the query surface mean the prompt may still be
        // open on the handset; neither may force a failure
        for code in ["1032", "1037"] {
            let body = json!({"ResultCode": code, "ResultDesc": "ambiguous"});
            let outcome = classify_query_response(reqwest::StatusCode::OK, &body);
            assert!(matches!(outcome, QueryOutcome::Pending), "code {code}");
        }
    }

    #[test]
    fn test_definitive_query_codes_classify_as_settled_or_failed() {
        let body = json!({"ResultCode": 0, "ResultDesc": "ok"});
        assert!(matches!(
            classify_query_response(reqwest::StatusCode::OK, &body),
            QueryOutcome::Settled { .. }
        ));

        let body = json!({"ResultCode": "2001", "ResultDesc": "Wrong PIN"});
        match classify_query_response(reqwest::StatusCode::OK, &body) {
            QueryOutcome::Failed { code, message } => {
                assert_eq!(code, "2001");
                assert_eq!(message, "Wrong PIN");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_still_processing_error_code_stays_pending() {
        let body = json!({"errorCode": "500.001.1001", "errorMessage": "being processed"});
        assert!(matches!(
            classify_query_response(reqwest::StatusCode::INTERNAL_SERVER_ERROR, &body),
            QueryOutcome::Pending
        ));
    }

    #[test]
    fn test_password_is_deterministic_per_timestamp() {
        let gateway = test_gateway();
        let password = gateway.password("20260825143022");
        assert_eq!(
            password,
            base64::engine::general_purpose::STANDARD.encode("174379passkey20260825143022")
        );
    }

    #[test]
    fn test_gateway_timestamp_parsing() {
        let parsed = parse_gateway_timestamp("20260825143022").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-08-25 14:30:22");
        assert!(parse_gateway_timestamp("not-a-date").is_none());
    }

    #[test]
    fn test_password_redacted_in_ledger_payload() {
        let payload = json!({"Password": "c2VjcmV0", "Amount": 500});
        let redacted = redact_password(payload);
        assert_eq!(redacted["Password"], "[redacted]");
        assert_eq!(redacted["Amount"], 500);
    }
}
