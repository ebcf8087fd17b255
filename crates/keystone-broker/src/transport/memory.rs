//! In-process transport.
//!
//! Subjects match exactly (no wildcards). Every queue group on a subject
//! receives each message once, rotating between its members. Requests get a
//! private `_INBOX.*` subject; the first message published there is the
//! reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{Subscription, Transport};
use crate::error::{BrokerError, BrokerResult};
use crate::message::Message;

struct Group {
    queue: String,
    members: Vec<UnboundedSender<Message>>,
    next: usize,
}

impl Group {
    fn prune(&mut self) -> bool {
        self.members.retain(|member| !member.is_closed());
        !self.members.is_empty()
    }

    fn deliver(&mut self, message: Message) -> bool {
        let count = self.members.len();
        for _ in 0..count {
            let index = self.next % count;
            self.next = self.next.wrapping_add(1);
            if self.members[index].unbounded_send(message.clone()).is_ok() {
                return true;
            }
        }
        false
    }
}

#[derive(Default)]
struct Inner {
    groups: Mutex<HashMap<String, Vec<Group>>>,
    inboxes: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

/// A broker living inside the process.
///
/// Clones share the same subjects, so one transport can back both sides of
/// a request/reply exchange.
///
/// # Example
///
/// ```rust
/// use keystone_broker::{MemoryTransport, Message, Transport};
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let transport = MemoryTransport::new();
/// let mut sub = transport.queue_subscribe("orders.created", "audit").await.unwrap();
///
/// transport.publish(Message::new("orders.created", "42")).await.unwrap();
/// assert_eq!(sub.next().await.unwrap().payload, "42");
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live subscribers on `subject`.
    #[must_use]
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let mut groups = self.inner.groups.lock();
        groups.get_mut(subject).map_or(0, |groups| {
            groups.retain_mut(Group::prune);
            groups.iter().map(|g| g.members.len()).sum()
        })
    }

    /// Delivers `message` and returns how many groups received it.
    fn route(&self, message: Message) -> usize {
        if let Some(inbox) = self.inner.inboxes.lock().remove(&message.subject) {
            return usize::from(inbox.send(message).is_ok());
        }

        let mut groups = self.inner.groups.lock();
        let Some(groups) = groups.get_mut(&message.subject) else {
            return 0;
        };
        groups.retain_mut(Group::prune);
        groups
            .iter_mut()
            .map(|group| group.deliver(message.clone()))
            .filter(|delivered| *delivered)
            .count()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("subjects", &self.inner.groups.lock().len())
            .field("pending_requests", &self.inner.inboxes.lock().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, message: Message) -> BrokerResult<()> {
        self.route(message);
        Ok(())
    }

    async fn request(&self, message: Message, timeout: Duration) -> BrokerResult<Message> {
        let subject = message.subject.clone();
        let inbox = format!("_INBOX.{}", Uuid::new_v4().simple());
        let (sender, receiver) = oneshot::channel();
        self.inner.inboxes.lock().insert(inbox.clone(), sender);

        if self.route(message.with_reply(inbox.clone())) == 0 {
            self.inner.inboxes.lock().remove(&inbox);
            return Err(BrokerError::NoResponders(subject));
        }

        let outcome = tokio::time::timeout(timeout, receiver).await;
        self.inner.inboxes.lock().remove(&inbox);
        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BrokerError::Request {
                subject,
                message: "reply inbox closed".into(),
            }),
            Err(_) => Err(BrokerError::Timeout { subject, timeout }),
        }
    }

    async fn queue_subscribe(&self, subject: &str, queue: &str) -> BrokerResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded();
        {
            let mut groups = self.inner.groups.lock();
            let groups = groups.entry(subject.to_string()).or_default();
            match groups.iter_mut().find(|group| group.queue == queue) {
                Some(group) => group.members.push(sender),
                None => groups.push(Group {
                    queue: queue.to_string(),
                    members: vec![sender],
                    next: 0,
                }),
            }
        }
        Ok(receiver.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_group_round_robin() {
        let transport = MemoryTransport::new();
        let mut a = transport.queue_subscribe("jobs", "workers").await.unwrap();
        let mut b = transport.queue_subscribe("jobs", "workers").await.unwrap();

        for i in 0..4 {
            transport
                .publish(Message::new("jobs", i.to_string()))
                .await
                .unwrap();
        }

        let mut first = Vec::new();
        let mut second = Vec::new();
        for _ in 0..2 {
            first.push(a.next().await.unwrap().payload);
            second.push(b.next().await.unwrap().payload);
        }
        assert_eq!(first, vec!["0", "2"]);
        assert_eq!(second, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_every_group_gets_a_copy() {
        let transport = MemoryTransport::new();
        let mut audit = transport.queue_subscribe("orders", "audit").await.unwrap();
        let mut billing = transport.queue_subscribe("orders", "billing").await.unwrap();

        transport.publish(Message::new("orders", "o-1")).await.unwrap();
        assert_eq!(audit.next().await.unwrap().payload, "o-1");
        assert_eq!(billing.next().await.unwrap().payload, "o-1");
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let transport = MemoryTransport::new();
        let sub = transport.queue_subscribe("jobs", "workers").await.unwrap();
        assert_eq!(transport.subscriber_count("jobs"), 1);
        drop(sub);
        assert_eq!(transport.subscriber_count("jobs"), 0);
    }

    #[tokio::test]
    async fn test_request_without_subscribers() {
        let transport = MemoryTransport::new();
        let err = transport
            .request(Message::new("nobody", ""), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NoResponders(s) if s == "nobody"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let transport = MemoryTransport::new();
        let _silent = transport.queue_subscribe("slow", "workers").await.unwrap();

        let err = transport
            .request(Message::new("slow", ""), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(transport.inner.inboxes.lock().is_empty());
    }
}
