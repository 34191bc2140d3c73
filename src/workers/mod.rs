pub mod reconciler;

pub use reconciler::{PaymentReconciler, ReconcileReport, ReconcilerSettings};
