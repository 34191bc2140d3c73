//! Mobile-money payments: the provider gateway, the shared status poller
//! and the client-side payment dialog that drives it.

pub mod gateway;
pub mod momo;
pub mod sandbox;
pub mod protocol;
pub mod callback;
pub mod poller;
pub mod flow;
pub mod dialog;

pub use gateway::{CollectionRequest, GatewayError, PaymentGateway, ProviderTransaction};
pub use momo::MomoGateway;
pub use sandbox::{SandboxGateway, SandboxStep};
pub use poller::{poll_until_settled, CheckErrorPolicy, PollFailure, PollOutcome, PollPolicy, StatusSource};
pub use flow::{FlowEvent, InvalidTransition, PaymentFlowState};
pub use dialog::{CloseOutcome, DialogVariant, PaymentDialog};

use std::sync::Arc;

use crate::config::MomoConfig;

/// Gateway the server collects through. The sandbox is only used when
/// mobile money is switched off; an enabled but incomplete provider
/// configuration is an error.
pub fn gateway_from_config(config: &MomoConfig) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    if !config.enabled {
        tracing::info!("Mobile-money payments disabled, using sandbox gateway");
        return Ok(Arc::new(SandboxGateway::default()));
    }

    let gateway = MomoGateway::new(config.clone())?;
    tracing::info!(environment = %config.target_environment, "Mobile-money payments enabled");
    Ok(Arc::new(gateway))
}
