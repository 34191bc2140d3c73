use std::sync::Arc;

use clap::Parser;
use cooperative::{
    client::{HttpPaymentApi, PaymentApi},
    config::{PollingConfig, Settings},
    payments::{CloseOutcome, PaymentDialog, PaymentFlowState},
    service::fee_service::{display_amount, format_rwf},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "cooperative-pay", version, about = "Pay cooperative fees with mobile money")]
struct Args {
    /// Base URL of the cooperative server.
    #[arg(long, env = "COOPERATIVE_URL", default_value = "http://localhost:8080")]
    server: String,

    #[arg(long, env = "COOPERATIVE_EMAIL")]
    email: String,

    #[arg(long, env = "COOPERATIVE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Phone number that will receive the payment prompt.
    #[arg(long)]
    phone: String,

    /// Pay a single fee application instead of everything outstanding.
    #[arg(long)]
    fee: Option<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let polling = Settings::new().map(|s| s.polling).unwrap_or_else(|e| {
        tracing::debug!("Failed to load config: {}. Using default polling.", e);
        PollingConfig::default()
    });

    let client = Arc::new(HttpPaymentApi::login(&args.server, &args.email, &args.password).await?);
    let outstanding = client.outstanding_fees().await?;
    let api: Arc<dyn PaymentApi> = client.clone();

    let dialog = match args.fee {
        Some(fee_id) => {
            let fee = outstanding
                .fees
                .iter()
                .find(|f| f.id == fee_id)
                .ok_or_else(|| anyhow::anyhow!("fee {} is not outstanding", fee_id))?;
            Some(PaymentDialog::single(
                api,
                fee,
                format!("Fee payment {}", fee.id),
                polling.single.to_policy(),
            ))
        }
        None => PaymentDialog::bulk(api, outstanding.summary.as_ref(), polling.bulk.to_policy()),
    };

    let Some(mut dialog) = dialog else {
        println!("Nothing to pay: no outstanding fees.");
        return Ok(());
    };

    println!("Paying {} from {}", format_rwf(display_amount(dialog.amount())), args.phone);

    dialog.open();
    dialog.set_phone_number(args.phone);
    dialog.submit()?;

    let mut updates = dialog.subscribe();
    loop {
        let state = updates.borrow_and_update().clone();
        print_state(&state);

        match state {
            PaymentFlowState::Successful { .. } => break,
            PaymentFlowState::Failed { message, .. } => anyhow::bail!(message),
            _ => {}
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => match dialog.request_close() {
                CloseOutcome::Blocked => {
                    println!("A bulk payment is in progress; wait for it to finish.");
                }
                CloseOutcome::Closed { .. } => {
                    println!("Stopped waiting. Check your payment history later.");
                    return Ok(());
                }
            },
        }
    }

    if let CloseOutcome::Closed { reload_fees: true } = dialog.request_close() {
        let remaining = client.outstanding_fees().await?;
        match remaining.summary {
            Some(summary) => println!("Still outstanding: {}", summary.formatted_total()),
            None => println!("All fees are paid."),
        }
    }

    Ok(())
}

fn print_state(state: &PaymentFlowState) {
    match state {
        PaymentFlowState::Idle => {}
        PaymentFlowState::Initiating => println!("… {}", state.message()),
        PaymentFlowState::Pending { reference_id, checks } => {
            println!("⏳ {} (reference {}, {} checks)", state.message(), reference_id, checks)
        }
        PaymentFlowState::Successful { reference_id, .. } => {
            println!("✅ {} (reference {})", state.message(), reference_id)
        }
        PaymentFlowState::Failed { .. } => eprintln!("❌ {}", state.message()),
    }
}
