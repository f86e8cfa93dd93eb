//! Dual-acknowledgment bookkeeping for in-flight methods and subs.
//!
//! DDP acknowledges a method twice: once with its `result`, and once when every
//! write the method caused has been flushed to the client (`updated`, or the
//! `methods` list of a legacy `data` frame). A sub is acknowledged once, when its
//! initial data set is complete. The two acknowledgments of a method travel on
//! independent paths and may arrive in either order, before or after the caller
//! starts waiting.
//!
//! Each registered request owns a [`watch`] cell that receives its terminal
//! outcome exactly once. Waiting is a check of that cell, so acknowledgments that
//! race ahead of the wait are never lost.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use strum_macros::Display;
use tokio::sync::watch;
use tokio::time::timeout;

use super::issuer::RequestId;
use crate::Result;
use crate::error::Error;

/// The two request kinds the tracker serializes independently.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RequestKind {
    Method,
    Sub,
}

/// What a fully acknowledged request produced.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: RequestId,
    /// Method return value. Always `None` for subs.
    pub result: Option<Value>,
}

/// Ticket for a registered request, redeemed with [`RequestTracker::wait_method`]
/// or [`RequestTracker::wait_sub`].
#[must_use = "a pending request must be waited on or abandoned"]
#[derive(Debug)]
pub struct Pending {
    kind: RequestKind,
    id: RequestId,
    done: watch::Receiver<Option<Outcome>>,
}

impl Pending {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Completed {
        result: Option<Value>,
        error: Option<Value>,
    },
    Rejected(Value),
    TimedOut(Duration),
    Aborted {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl Outcome {
    fn into_result(self, id: RequestId) -> Result<Completion> {
        match self {
            Self::Completed {
                error: Some(error), ..
            }
            | Self::Rejected(error) => Err(Error::server(Some(id), error)),
            Self::Completed {
                result,
                error: None,
            } => Ok(Completion { id, result }),
            Self::TimedOut(after) => Err(Error::timed_out(id, after)),
            Self::Aborted { code, reason } => Err(Error::transport_closed(code, reason)),
        }
    }
}

#[derive(Debug)]
struct PendingMethod {
    id: RequestId,
    result_acked: bool,
    data_acked: bool,
    result: Option<Value>,
    error: Option<Value>,
    done: watch::Sender<Option<Outcome>>,
}

impl PendingMethod {
    fn finish(self) {
        self.done.send_replace(Some(Outcome::Completed {
            result: self.result,
            error: self.error,
        }));
    }
}

#[derive(Debug)]
struct PendingSubscription {
    id: RequestId,
    done: watch::Sender<Option<Outcome>>,
}

#[derive(Debug, Default)]
struct Slots {
    method: Option<PendingMethod>,
    sub: Option<PendingSubscription>,
    /// Set once the transport has closed; no further registrations are accepted.
    closed: bool,
}

/// State machine holding at most one pending method and one pending sub.
///
/// Every transition happens under one lock that is never held across an `.await`.
#[derive(Debug, Default)]
pub struct RequestTracker {
    slots: Mutex<Slots>,
}

impl RequestTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // The slots are only ever replaced wholesale, so a poisoned lock holds no torn state.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idle → awaiting acks for a method.
    pub fn register_method(&self, id: RequestId) -> Result<Pending> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(Error::not_connected());
        }
        if let Some(method) = &slots.method {
            return Err(Error::already_pending(RequestKind::Method, method.id.clone()));
        }

        let (done, rx) = watch::channel(None);
        slots.method = Some(PendingMethod {
            id: id.clone(),
            result_acked: false,
            data_acked: false,
            result: None,
            error: None,
            done,
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(%id, "method awaiting result and data acknowledgments");

        Ok(Pending {
            kind: RequestKind::Method,
            id,
            done: rx,
        })
    }

    /// Idle → awaiting the data acknowledgment of a sub.
    pub fn register_sub(&self, id: RequestId) -> Result<Pending> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(Error::not_connected());
        }
        if let Some(sub) = &slots.sub {
            return Err(Error::already_pending(RequestKind::Sub, sub.id.clone()));
        }

        let (done, rx) = watch::channel(None);
        slots.sub = Some(PendingSubscription {
            id: id.clone(),
            done,
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(%id, "sub awaiting data acknowledgment");

        Ok(Pending {
            kind: RequestKind::Sub,
            id,
            done: rx,
        })
    }

    /// Record the `result` of the pending method.
    ///
    /// Returns `false`, changing nothing, when `id` is not the pending method.
    pub fn ack_method_result(&self, id: &str, result: Option<Value>, error: Option<Value>) -> bool {
        let mut slots = self.lock();
        let Some(method) = slots.method.as_mut().filter(|method| method.id == id) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, "ignoring result for a method that is not pending");
            return false;
        };

        method.result_acked = true;
        method.result = result;
        method.error = error;
        Self::settle_method(&mut slots);
        true
    }

    /// Record that all writes of the pending method have been flushed.
    ///
    /// Returns `false`, changing nothing, when `id` is not the pending method.
    pub fn ack_method_data(&self, id: &str) -> bool {
        let mut slots = self.lock();
        let Some(method) = slots.method.as_mut().filter(|method| method.id == id) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, "ignoring data flush for a method that is not pending");
            return false;
        };

        method.data_acked = true;
        Self::settle_method(&mut slots);
        true
    }

    /// Record that the initial data of the pending sub is complete. Completes the sub.
    ///
    /// Returns `false`, changing nothing, when `id` is not the pending sub.
    pub fn ack_sub_data(&self, id: &str) -> bool {
        let mut slots = self.lock();
        if !slots.sub.as_ref().is_some_and(|sub| sub.id == id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, "ignoring ready for a sub that is not pending");
            return false;
        }

        if let Some(sub) = slots.sub.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = %sub.id, "sub complete");
            sub.done.send_replace(Some(Outcome::Completed {
                result: None,
                error: None,
            }));
        }
        true
    }

    fn settle_method(slots: &mut Slots) {
        if !slots
            .method
            .as_ref()
            .is_some_and(|method| method.result_acked && method.data_acked)
        {
            return;
        }

        if let Some(method) = slots.method.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = %method.id, "method fully acknowledged");
            method.finish();
        }
    }

    /// Terminally fail whichever pending request carries `id` with a server error.
    ///
    /// Returns the kind of the failed request, or `None` if nothing matched.
    pub fn fail(&self, id: &str, payload: Value) -> Option<RequestKind> {
        let (kind, done) = self.take(id)?;
        done.send_replace(Some(Outcome::Rejected(payload)));

        #[cfg(feature = "tracing")]
        tracing::debug!(%id, %kind, "request failed by the server");

        Some(kind)
    }

    /// Drop a request whose frame could not be sent.
    pub fn abandon(&self, pending: &Pending) {
        if let Some((_, done)) = self.take(&pending.id) {
            done.send_replace(Some(Outcome::Aborted {
                code: None,
                reason: Some("request could not be sent".to_owned()),
            }));
        }
    }

    /// Release every waiter with a transport closure and refuse new registrations.
    pub fn close(&self, code: Option<u16>, reason: Option<String>) {
        let mut slots = self.lock();
        slots.closed = true;

        let method = slots.method.take().map(|method| method.done);
        let sub = slots.sub.take().map(|sub| sub.done);
        for done in method.into_iter().chain(sub) {
            done.send_replace(Some(Outcome::Aborted {
                code,
                reason: reason.clone(),
            }));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(?code, ?reason, "request tracker closed");
    }

    fn take(&self, id: &str) -> Option<(RequestKind, watch::Sender<Option<Outcome>>)> {
        let mut slots = self.lock();
        if slots.method.as_ref().is_some_and(|method| method.id == id) {
            return slots
                .method
                .take()
                .map(|method| (RequestKind::Method, method.done));
        }
        if slots.sub.as_ref().is_some_and(|sub| sub.id == id) {
            return slots.sub.take().map(|sub| (RequestKind::Sub, sub.done));
        }
        None
    }

    /// Id of the method awaiting acknowledgment, if any.
    #[must_use]
    pub fn pending_method(&self) -> Option<RequestId> {
        self.lock().method.as_ref().map(|method| method.id.clone())
    }

    /// Id of the sub awaiting acknowledgment, if any.
    #[must_use]
    pub fn pending_sub(&self) -> Option<RequestId> {
        self.lock().sub.as_ref().map(|sub| sub.id.clone())
    }

    /// Wait until the method behind `pending` has both acknowledgments.
    ///
    /// With `limit` set, a method still pending after that long is cleared and the
    /// wait fails with [`Kind::RequestTimedOut`](crate::error::Kind::RequestTimedOut).
    pub async fn wait_method(&self, pending: Pending, limit: Option<Duration>) -> Result<Completion> {
        if pending.kind != RequestKind::Method {
            return Err(Error::validation(format!(
                "request {} is a {}, not a method",
                pending.id, pending.kind
            )));
        }
        self.wait(pending, limit).await
    }

    /// Wait until the sub behind `pending` has its data acknowledgment.
    pub async fn wait_sub(&self, pending: Pending, limit: Option<Duration>) -> Result<Completion> {
        if pending.kind != RequestKind::Sub {
            return Err(Error::validation(format!(
                "request {} is a {}, not a sub",
                pending.id, pending.kind
            )));
        }
        self.wait(pending, limit).await
    }

    async fn wait(&self, mut pending: Pending, limit: Option<Duration>) -> Result<Completion> {
        let outcome = match limit {
            None => Self::outcome(&mut pending.done).await,
            Some(after) => {
                if let Ok(outcome) = timeout(after, Self::outcome(&mut pending.done)).await {
                    outcome
                } else {
                    self.expire(&pending.id, after);
                    // An acknowledgment may have landed between the deadline and the expiry.
                    pending
                        .done
                        .borrow()
                        .clone()
                        .unwrap_or(Outcome::TimedOut(after))
                }
            }
        };

        outcome.into_result(pending.id)
    }

    async fn outcome(done: &mut watch::Receiver<Option<Outcome>>) -> Outcome {
        match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Outcome::Aborted {
                code: None,
                reason: None,
            }),
            // The tracker always publishes before dropping a sender.
            Err(_) => Outcome::Aborted {
                code: None,
                reason: None,
            },
        }
    }

    fn expire(&self, id: &str, after: Duration) {
        if let Some((kind, done)) = self.take(id) {
            #[cfg(feature = "tracing")]
            tracing::warn!(%id, %kind, ?after, "request timed out");
            #[cfg(not(feature = "tracing"))]
            let _: RequestKind = kind;
            done.send_replace(Some(Outcome::TimedOut(after)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::{Kind, ServerError, TransportClosed};

    fn id(n: u64) -> RequestId {
        n.to_string()
    }

    #[tokio::test]
    async fn method_completes_when_acks_arrive_before_the_wait() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_method(id(1)).unwrap();

        assert!(tracker.ack_method_result("1", Some(json!({"ok": true})), None));
        assert!(tracker.ack_method_data("1"));

        let completion = tracker.wait_method(pending, None).await.unwrap();
        assert_eq!(completion.id, "1");
        assert_eq!(completion.result, Some(json!({"ok": true})));
        assert_eq!(tracker.pending_method(), None);
    }

    #[tokio::test]
    async fn method_completes_with_data_before_result() {
        let tracker = Arc::new(RequestTracker::new());
        let pending = tracker.register_method(id(1)).unwrap();

        assert!(tracker.ack_method_data("1"));
        assert_eq!(tracker.pending_method(), Some(id(1)), "one ack is not enough");

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_method(pending, None).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished(), "waiter returned with only the data ack");

        assert!(tracker.ack_method_result("1", Some(json!(5)), None));
        let completion = waiter.await.unwrap().unwrap();
        assert_eq!(completion.result, Some(json!(5)));
    }

    #[tokio::test]
    async fn method_waits_for_data_after_result() {
        let tracker = Arc::new(RequestTracker::new());
        let pending = tracker.register_method(id(1)).unwrap();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_method(pending, None).await })
        };

        assert!(tracker.ack_method_result("1", None, None));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished(), "waiter returned with only the result ack");

        assert!(tracker.ack_method_data("1"));
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn second_method_is_rejected_while_one_is_pending() {
        let tracker = RequestTracker::new();
        let _first = tracker.register_method(id(1)).unwrap();

        let err = tracker.register_method(id(2)).unwrap_err();
        assert_eq!(err.kind(), Kind::RequestAlreadyPending);
        assert_eq!(tracker.pending_method(), Some(id(1)));

        // Subs are tracked independently
        let _sub = tracker.register_sub(id(3)).unwrap();
    }

    #[tokio::test]
    async fn foreign_ids_are_ignored() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_method(id(1)).unwrap();

        assert!(!tracker.ack_method_result("9", None, None));
        assert!(!tracker.ack_method_data("9"));
        assert!(!tracker.ack_sub_data("1"));
        assert_eq!(tracker.pending_method(), Some(id(1)));

        tracker.ack_method_result("1", None, None);
        tracker.ack_method_data("1");
        tracker.wait_method(pending, None).await.unwrap();
    }

    #[tokio::test]
    async fn sub_completes_on_its_single_ack() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_sub(id(1)).unwrap();

        assert!(tracker.ack_sub_data("1"));
        let completion = tracker.wait_sub(pending, None).await.unwrap();
        assert_eq!(completion.result, None);
        assert_eq!(tracker.pending_sub(), None);

        // The slot is free again
        let _next = tracker.register_sub(id(2)).unwrap();
    }

    #[tokio::test]
    async fn method_error_surfaces_after_both_acks() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_method(id(1)).unwrap();

        tracker.ack_method_result("1", None, Some(json!({"error": 403})));
        tracker.ack_method_data("1");

        let err = tracker.wait_method(pending, None).await.unwrap_err();
        assert_eq!(err.kind(), Kind::ServerError);
        assert_eq!(
            err.downcast_ref::<ServerError>().unwrap().payload,
            json!({"error": 403})
        );
    }

    #[tokio::test]
    async fn fail_is_terminal_for_the_matching_request() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_sub(id(4)).unwrap();

        assert_eq!(tracker.fail("4", json!({"reason": "nope"})), Some(RequestKind::Sub));
        assert_eq!(tracker.fail("4", json!(null)), None);

        let err = tracker.wait_sub(pending, None).await.unwrap_err();
        assert_eq!(err.kind(), Kind::ServerError);
    }

    #[tokio::test]
    async fn close_releases_waiters_and_refuses_new_requests() {
        let tracker = Arc::new(RequestTracker::new());
        let pending = tracker.register_method(id(1)).unwrap();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_method(pending, None).await })
        };
        tokio::task::yield_now().await;

        tracker.close(Some(1001), Some("going away".to_owned()));

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), Kind::TransportClosed);
        assert_eq!(
            err.downcast_ref::<TransportClosed>().unwrap(),
            &TransportClosed {
                code: Some(1001),
                reason: Some("going away".to_owned())
            }
        );

        let err = tracker.register_sub(id(2)).unwrap_err();
        assert_eq!(err.kind(), Kind::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_clears_the_pending_method() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_method(id(1)).unwrap();
        tracker.ack_method_result("1", None, None);

        let err = tracker
            .wait_method(pending, Some(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Kind::RequestTimedOut);
        assert_eq!(tracker.pending_method(), None);

        // A late flush for the expired id is ignored
        assert!(!tracker.ack_method_data("1"));
        let _next = tracker.register_method(id(2)).unwrap();
    }

    #[tokio::test]
    async fn abandon_frees_the_slot() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_method(id(1)).unwrap();

        tracker.abandon(&pending);
        assert_eq!(tracker.pending_method(), None);

        let err = tracker.wait_method(pending, None).await.unwrap_err();
        assert_eq!(err.kind(), Kind::TransportClosed);
    }

    #[tokio::test]
    async fn wait_rejects_a_ticket_of_the_other_kind() {
        let tracker = RequestTracker::new();
        let pending = tracker.register_sub(id(1)).unwrap();

        let err = tracker.wait_method(pending, None).await.unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }
}
