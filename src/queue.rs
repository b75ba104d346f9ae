//! Collaborators consumed by the search result stream.
//!
//! A [`MessageQueue`] delivers the responses of one operation, possibly coming from several
//! connections once referrals are chased. A [`ReferralChaser`] reissues the operation on the
//! servers a referral points to and registers the new responses on the same queue.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, ReferralError, ReferralFailure, Result},
    message::LdapMessage,
    options::SearchConstraints,
};

/// Auxiliary connection opened to follow a referral
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferralConnection {
    /// Identifier unique within the client
    pub id: u64,
    /// The URL that was followed
    pub url: String,
    /// The full URL list of the referral
    pub urls: Vec<String>,
    /// `host:port` of the referred server
    pub address: String,
    /// Number of referral hops from the original server
    pub hops: u32,
}

/// One response taken off a message queue
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub message: LdapMessage,
    /// Referral connection the response arrived on, `None` for the original connection
    pub referral: Option<ReferralConnection>,
    /// Transport failure that ended the operation on its connection before a real
    /// terminal result was received
    pub failure: Option<String>,
}

impl Response {
    pub fn new(message: LdapMessage) -> Self {
        Self {
            message,
            referral: None,
            failure: None,
        }
    }

    pub fn on_referral(self, referral: ReferralConnection) -> Self {
        Self {
            referral: Some(referral),
            ..self
        }
    }

    pub fn with_failure<S: Into<String>>(self, failure: S) -> Self {
        Self {
            failure: Some(failure.into()),
            ..self
        }
    }

    /// Hop count a referral received in this response would be chased at
    pub fn next_hop(&self) -> u32 {
        self.referral.as_ref().map_or(1, |r| r.hops + 1)
    }
}

/// Source of the responses of a single operation
#[async_trait]
pub trait MessageQueue: Send {
    /// Wait for the next response. `Ok(None)` means that nothing arrived in time.
    async fn get_response(&mut self, cancel: &CancellationToken) -> Result<Option<Response>>;

    /// Message ids still waiting for their terminal response
    fn outstanding_message_ids(&self) -> Vec<i32>;

    /// True while per-request controls require more exchanges before the operation is done
    fn has_pending_controls(&self) -> bool {
        false
    }

    /// The request this queue delivers responses for
    fn request(&self) -> &LdapMessage;

    /// Cancel all outstanding message ids on their connections
    async fn abandon(&mut self, cancel: &CancellationToken) -> Result<()>;
}

/// Follows referrals on behalf of a search
#[async_trait]
pub trait ReferralChaser<Q: MessageQueue>: Send + Sync {
    /// Reissue `message` on one of the servers named by `urls` and route its responses into
    /// `queue`. Returns `connections` extended with any connection opened for it.
    #[allow(clippy::too_many_arguments)]
    async fn chase_referral(
        &self,
        queue: &mut Q,
        constraints: &SearchConstraints,
        message: &LdapMessage,
        urls: &[String],
        connect_number: u32,
        is_reference: bool,
        connections: Vec<ReferralConnection>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReferralConnection>>;

    /// Close connections opened by [`chase_referral`](Self::chase_referral)
    async fn release_referral_connections(
        &self,
        connections: Vec<ReferralConnection>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Chaser for queues that cannot follow referrals
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReferrals;

#[async_trait]
impl<Q: MessageQueue> ReferralChaser<Q> for NoReferrals {
    async fn chase_referral(
        &self,
        _queue: &mut Q,
        _constraints: &SearchConstraints,
        _message: &LdapMessage,
        urls: &[String],
        _connect_number: u32,
        _is_reference: bool,
        _connections: Vec<ReferralConnection>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ReferralConnection>> {
        Err(Error::Referral(ReferralError {
            urls: urls.to_vec(),
            failed_url: None,
            reason: ReferralFailure::ChaseFailed("referral chasing is not available".to_owned()),
        }))
    }

    async fn release_referral_connections(
        &self,
        _connections: Vec<ReferralConnection>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Ok(())
    }
}
