use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tracing::info;

use crate::domain::ProviderStatus;
use crate::payments::gateway::{CollectionRequest, GatewayError, PaymentGateway, ProviderTransaction};

pub const MAX_TRACKED: usize = 1024;

/// One scripted answer to a status query.
#[derive(Debug, Clone)]
pub enum SandboxStep {
    Status(ProviderStatus),
    Unreachable,
}

/// In-process gateway used for local development (when no provider
/// credentials are configured) and in tests.
///
/// Every accepted collection gets a copy of the default script; status
/// queries consume it one step at a time and keep repeating the last step.
/// Only the most recent [`MAX_TRACKED`] collections are remembered; older
/// references answer `NotFound`.
pub struct SandboxGateway {
    default_script: Mutex<Vec<SandboxStep>>,
    scripts: Mutex<HashMap<String, VecDeque<SandboxStep>>>,
    requests: Mutex<VecDeque<CollectionRequest>>,
    rejection: Mutex<Option<String>>,
    status_calls: AtomicU32,
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new(vec![
            SandboxStep::Status(ProviderStatus::Pending),
            SandboxStep::Status(ProviderStatus::Successful),
        ])
    }
}

impl SandboxGateway {
    pub fn new(default_script: Vec<SandboxStep>) -> Self {
        Self {
            default_script: Mutex::new(default_script),
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(VecDeque::new()),
            rejection: Mutex::new(None),
            status_calls: AtomicU32::new(0),
        }
    }

    /// Convenience for scripts that only return provider statuses.
    pub fn with_statuses(statuses: impl IntoIterator<Item = ProviderStatus>) -> Self {
        Self::new(statuses.into_iter().map(SandboxStep::Status).collect())
    }

    pub fn set_default_script(&self, script: Vec<SandboxStep>) {
        *lock(&self.default_script) = script;
    }

    /// Replaces the remaining script of an already accepted collection.
    pub fn script(&self, reference_id: &str, steps: Vec<SandboxStep>) {
        lock(&self.scripts).insert(reference_id.to_string(), steps.into());
    }

    /// Makes every following collection request fail with `message`.
    pub fn reject_collections(&self, message: impl Into<String>) {
        *lock(&self.rejection) = Some(message.into());
    }

    pub fn accept_collections(&self) {
        *lock(&self.rejection) = None;
    }

    pub fn collection_requests(&self) -> Vec<CollectionRequest> {
        lock(&self.requests).iter().cloned().collect()
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // No invariant spans a panic, so poisoning is ignored.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn request_to_pay(&self, request: &CollectionRequest) -> Result<(), GatewayError> {
        if let Some(message) = lock(&self.rejection).clone() {
            return Err(GatewayError::Rejected { status: 400, message });
        }
        if request.payer_phone.trim().is_empty() {
            return Err(GatewayError::InvalidPhone("payer phone is empty".to_string()));
        }

        let script: VecDeque<SandboxStep> = lock(&self.default_script).clone().into();
        let mut scripts = lock(&self.scripts);
        let mut requests = lock(&self.requests);
        scripts.insert(request.reference_id.clone(), script);
        requests.push_back(request.clone());
        while requests.len() > MAX_TRACKED {
            if let Some(oldest) = requests.pop_front() {
                scripts.remove(&oldest.reference_id);
            }
        }

        info!(reference_id = %request.reference_id, amount = %request.amount, "sandbox collection accepted");
        Ok(())
    }

    async fn transaction_status(&self, reference_id: &str) -> Result<ProviderTransaction, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let step = {
            let mut scripts = lock(&self.scripts);
            let script = scripts
                .get_mut(reference_id)
                .ok_or_else(|| GatewayError::NotFound(reference_id.to_string()))?;
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };

        match step {
            Some(SandboxStep::Status(status)) => Ok(ProviderTransaction {
                reference_id: reference_id.to_string(),
                reason: status.is_failure().then(|| format!("sandbox reported {}", status)),
                status,
                financial_transaction_id: None,
            }),
            Some(SandboxStep::Unreachable) => {
                Err(GatewayError::Network("sandbox provider unreachable".to_string()))
            }
            None => Ok(ProviderTransaction {
                reference_id: reference_id.to_string(),
                status: ProviderStatus::Pending,
                reason: None,
                financial_transaction_id: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn request(reference_id: &str) -> CollectionRequest {
        CollectionRequest {
            reference_id: reference_id.to_string(),
            amount: Decimal::from(1000),
            currency: "RWF".to_string(),
            payer_phone: "0788123456".to_string(),
            payer_message: "fees".to_string(),
            payee_note: "fees".to_string(),
        }
    }

    #[tokio::test]
    async fn script_is_consumed_then_last_step_repeats() {
        let gateway = SandboxGateway::with_statuses([ProviderStatus::Pending, ProviderStatus::Successful]);
        gateway.request_to_pay(&request("ref-1")).await.unwrap();

        let first = gateway.transaction_status("ref-1").await.unwrap();
        let second = gateway.transaction_status("ref-1").await.unwrap();
        let third = gateway.transaction_status("ref-1").await.unwrap();

        assert_eq!(first.status, ProviderStatus::Pending);
        assert_eq!(second.status, ProviderStatus::Successful);
        assert_eq!(third.status, ProviderStatus::Successful);
        assert_eq!(gateway.status_calls(), 3);
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let gateway = SandboxGateway::default();
        let result = gateway.transaction_status("missing").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn oldest_collections_are_forgotten() {
        let gateway = SandboxGateway::default();
        for i in 0..=MAX_TRACKED {
            gateway.request_to_pay(&request(&format!("ref-{}", i))).await.unwrap();
        }

        assert_eq!(gateway.collection_requests().len(), MAX_TRACKED);
        assert!(matches!(gateway.transaction_status("ref-0").await, Err(GatewayError::NotFound(_))));
        let latest = gateway.transaction_status(&format!("ref-{}", MAX_TRACKED)).await.unwrap();
        assert_eq!(latest.status, ProviderStatus::Pending);
    }

    #[tokio::test]
    async fn rejected_collections_are_not_recorded() {
        let gateway = SandboxGateway::default();
        gateway.reject_collections("insufficient permissions");

        let result = gateway.request_to_pay(&request("ref-2")).await;

        assert!(matches!(result, Err(GatewayError::Rejected { status: 400, .. })));
        assert!(gateway.collection_requests().is_empty());
    }
}
