//! `wakeup-notify`: outbound voice/SMS dispatch and delivery reconciliation.
//!
//! - [`transport::NotificationTransport`] is the seam to the telephony
//!   provider; [`twilio::TwilioTransport`] is the production implementation.
//! - [`dispatcher::NotificationDispatcher`] records every attempt in
//!   `notification_log` and normalises the outcome into a [`DispatchResult`].
//! - [`reconciler::DeliveryReconciler`] applies provider status callbacks to
//!   that log, idempotently.

pub mod db;
pub mod dispatcher;
pub mod error;
pub mod reconciler;
pub mod transport;
pub mod twilio;
pub mod types;

pub use dispatcher::NotificationDispatcher;
pub use error::{NotifyError, TransportError};
pub use reconciler::DeliveryReconciler;
pub use transport::NotificationTransport;
pub use twilio::TwilioTransport;
pub use types::{
    CallbackUrls, DeliveryStatus, DispatchMeta, DispatchResult, NotificationKind,
    ProviderReceipt, ReconcileOutcome, StatusCallback,
};
