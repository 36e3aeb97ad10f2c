//! Delivery units handed from emit to the delivery queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::element::{ChangeKind, ElementId};
use crate::error::CallbackError;

use super::subscription::{DeliveryRef, Outcome, Subscription};

/// What a callback is told about one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryContext {
    /// The element the subscription watches.
    pub watched: ElementId,
    /// What changed.
    pub kind: ChangeKind,
    /// The connection involved in the change, or empty.
    pub edge: ElementId,
    /// The element at the other end of `edge`, or empty.
    pub other: ElementId,
    /// When emit produced this delivery.
    pub emitted_at: DateTime<Utc>,
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The callback ran and consumed the change.
    Consumed,
    /// The callback ran and left the subscription armed.
    Ignored,
    /// The subscription was destroyed before the callback could run.
    Skipped,
    /// The callback returned an error or panicked. Counts as consumed.
    Failed(CallbackError),
}

/// A pending callback invocation owning one delivery reference.
///
/// Consuming it through [`Delivery::deliver`] or [`Delivery::discard`], or
/// simply dropping it, releases the reference exactly once.
#[derive(Debug)]
pub struct Delivery {
    reference: DeliveryRef,
    context: DeliveryContext,
}

impl Delivery {
    pub(crate) fn new(reference: DeliveryRef, edge: ElementId, other: ElementId) -> Self {
        let sub = reference.subscription();
        let context = DeliveryContext {
            watched: sub.element(),
            kind: sub.kind(),
            edge,
            other,
            emitted_at: Utc::now(),
        };
        Self { reference, context }
    }

    /// The subscription this delivery targets.
    #[must_use]
    pub fn subscription(&self) -> &Arc<Subscription> {
        self.reference.subscription()
    }

    /// What the callback will be told.
    #[must_use]
    pub const fn context(&self) -> &DeliveryContext {
        &self.context
    }

    /// Invokes the subscriber's callback, then releases the reference.
    pub fn deliver(self) -> DeliveryStatus {
        let sub = self.reference.subscription();
        let Some(callback) = sub.callback() else {
            trace!(subscription = %sub.id(), "callback cleared, delivery skipped");
            return DeliveryStatus::Skipped;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(sub, &self.context)));
        match result {
            Ok(Ok(Outcome::Consumed)) => DeliveryStatus::Consumed,
            Ok(Ok(Outcome::Ignored)) => DeliveryStatus::Ignored,
            Ok(Err(err)) => DeliveryStatus::Failed(err),
            Err(payload) => DeliveryStatus::Failed(CallbackError::new(format!(
                "callback panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Releases the reference without invoking the callback.
    pub fn discard(self) {
        trace!(subscription = %self.subscription().id(), "delivery discarded");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::AccessLevels;
    use crate::events::subscription::Callback;

    fn sub_with(callback: Callback) -> Arc<Subscription> {
        Arc::new(Subscription::new(
            ElementId::new(10),
            ChangeKind::AddInputEdge,
            AccessLevels::FULL,
            callback,
            None,
            None,
        ))
    }

    #[test]
    fn extended_callback_sees_full_context() {
        let sub = sub_with(Callback::extended(|s, ctx| {
            assert_eq!(ctx.watched, s.element());
            assert_eq!(ctx.kind, ChangeKind::AddInputEdge);
            assert_eq!(ctx.edge, ElementId::new(11));
            assert_eq!(ctx.other, ElementId::new(12));
            Ok(Outcome::Ignored)
        }));
        let d = Delivery::new(sub.try_acquire().unwrap(), ElementId::new(11), ElementId::new(12));
        assert_eq!(sub.live_references(), 2);
        assert_eq!(d.deliver(), DeliveryStatus::Ignored);
        assert_eq!(sub.live_references(), 1);
    }

    #[test]
    fn panicking_callback_is_reported_and_released() {
        let sub = sub_with(Callback::simple(|_, _| panic!("kaboom")));
        let d = Delivery::new(sub.try_acquire().unwrap(), ElementId::EMPTY, ElementId::EMPTY);
        let DeliveryStatus::Failed(err) = d.deliver() else {
            panic!("expected failure");
        };
        assert!(err.message().contains("kaboom"));
        assert_eq!(sub.live_references(), 1);
    }

    #[test]
    fn cleared_callback_is_skipped() {
        let sub = sub_with(Callback::simple(|_, _| Ok(Outcome::Consumed)));
        let d = Delivery::new(sub.try_acquire().unwrap(), ElementId::EMPTY, ElementId::EMPTY);
        {
            let held = sub.lock();
            sub.clear_callback(&held);
        }
        assert_eq!(d.deliver(), DeliveryStatus::Skipped);
        assert_eq!(sub.live_references(), 1);
    }

    #[test]
    fn discard_releases_without_invoking() {
        let sub = sub_with(Callback::simple(|_, _| panic!("must not run")));
        let d = Delivery::new(sub.try_acquire().unwrap(), ElementId::EMPTY, ElementId::EMPTY);
        d.discard();
        assert_eq!(sub.live_references(), 1);
    }
}
