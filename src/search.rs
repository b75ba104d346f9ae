//! Search result stream.
//!
//! Responses are pulled off a [`MessageQueue`] in batches. Entries share a buffer with the
//! failures recorded between them, so [`next`](SearchResults::next) reports each failure at the
//! position it arrived in. Continuation references that are not followed are kept apart and
//! always reported before the buffered entries of the same batch.

use std::fmt;

use futures::Stream;
use log::{debug, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    controls::Control,
    error::{Error, ReferralContext, ReferralError, Result, UsageError},
    message::{LdapResult, ProtocolOp, ResultCode},
    model::SearchEntry,
    options::SearchConstraints,
    queue::{MessageQueue, ReferralChaser, ReferralConnection, Response},
};

/// Observable state of a [`SearchResults`] stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchState {
    /// Nothing buffered, more responses expected
    Idle,
    /// A fetch was dropped before it finished
    Filling,
    /// Freshly fetched items are buffered
    HasData,
    /// Buffered items are being consumed
    Draining,
    /// The operation finished and everything was consumed
    Completed,
    /// The operation was abandoned
    Abandoned,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

enum Buffered {
    Entry(SearchEntry),
    Failed {
        error: Error,
        referral: Option<ReferralConnection>,
    },
}

/// Single-consumer pull sequence of the entries of one search
pub struct SearchResults<Q, C> {
    queue: Q,
    chaser: C,
    constraints: SearchConstraints,
    entries: Vec<Option<Buffered>>,
    entry_index: usize,
    references: Vec<Option<Vec<String>>>,
    reference_index: usize,
    response_controls: Vec<Control>,
    referral_connections: Vec<ReferralConnection>,
    // response whose processing was interrupted by cancellation
    held: Option<Response>,
    completed: bool,
    abandoned: bool,
    filling: bool,
    drained: bool,
}

impl<Q, C> SearchResults<Q, C>
where
    Q: MessageQueue,
    C: ReferralChaser<Q>,
{
    /// Wrap the queue of an already issued search request
    pub fn new(queue: Q, chaser: C, constraints: SearchConstraints) -> Self {
        Self {
            queue,
            chaser,
            constraints,
            entries: Vec::new(),
            entry_index: 0,
            references: Vec::new(),
            reference_index: 0,
            response_controls: Vec::new(),
            referral_connections: Vec::new(),
            held: None,
            completed: false,
            abandoned: false,
            filling: false,
            drained: false,
        }
    }

    fn has_unread(&self) -> bool {
        self.entry_index < self.entries.len() || self.reference_index < self.references.len()
    }

    pub fn state(&self) -> SearchState {
        if self.abandoned {
            SearchState::Abandoned
        } else if self.filling {
            SearchState::Filling
        } else if self.has_unread() {
            if self.drained {
                SearchState::Draining
            } else {
                SearchState::HasData
            }
        } else if self.completed {
            SearchState::Completed
        } else {
            SearchState::Idle
        }
    }

    /// Controls of the most recent response that carried any
    pub fn response_controls(&self) -> &[Control] {
        &self.response_controls
    }

    /// Referral connections currently held open by this search
    pub fn referral_connections(&self) -> &[ReferralConnection] {
        &self.referral_connections
    }

    pub fn constraints(&self) -> &SearchConstraints {
        &self.constraints
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// True if [`next`](Self::next) has something to return. May fetch one batch.
    pub async fn has_more(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if self.has_unread() {
            return Ok(true);
        }
        if self.completed {
            return Ok(false);
        }
        self.compact();
        self.fill(cancel).await?;
        Ok(self.has_unread())
    }

    /// Next entry. Continuation references that were not followed and failures recorded
    /// while fetching are returned as errors at their position.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<SearchEntry> {
        if self.completed && !self.has_unread() {
            return Err(UsageError::NoMoreEntries.into());
        }

        self.compact();
        if !self.has_unread() && !self.completed {
            self.fill(cancel).await?;
        }

        if let Some(urls) = self.pop_reference() {
            return Err(ReferralError::not_followed(urls).into());
        }

        match self.pop_entry() {
            Some(Buffered::Entry(entry)) => Ok(entry),
            Some(Buffered::Failed { error, referral }) => Err(attach_referral(error, referral)),
            None if self.completed => Err(UsageError::NoMoreEntries.into()),
            None => Err(UsageError::NoEntryAndNotComplete.into()),
        }
    }

    /// Abandon the search. Safe to call more than once.
    pub async fn abandon(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.abandoned {
            return Ok(());
        }
        debug!("Abandoning search {}", self.queue.request().message_id());

        let was_completed = self.completed;
        self.abandoned = true;
        self.completed = true;
        self.held = None;
        self.clear_buffers();

        let result = if was_completed {
            Ok(())
        } else {
            self.queue.abandon(cancel).await
        };
        self.release_connections(cancel).await;
        result
    }

    /// Convert into a `Stream` of entries. The stream ends when the search is complete or
    /// after cancellation. A failure that ends the search is yielded, then anything already
    /// buffered is drained before the stream ends.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = Result<SearchEntry>> {
        futures::stream::unfold((self, cancel, false), |(mut results, cancel, done)| async move {
            if done {
                return None;
            }
            match results.has_more(&cancel).await {
                Ok(false) => None,
                Ok(true) => {
                    let item = results.next(&cancel).await;
                    let stop = match item {
                        Err(Error::Cancelled) => true,
                        Err(ref e) => e.is_fatal() && !results.has_unread(),
                        Ok(_) => false,
                    };
                    Some((item, (results, cancel, stop)))
                }
                Err(e) => {
                    let stop = matches!(e, Error::Cancelled) || !results.has_unread();
                    Some((Err(e), (results, cancel, stop)))
                }
            }
        })
    }

    fn pop_reference(&mut self) -> Option<Vec<String>> {
        while self.reference_index < self.references.len() {
            self.reference_index += 1;
            self.drained = true;
            if let Some(urls) = self.references[self.reference_index - 1].take() {
                return Some(urls);
            }
        }
        None
    }

    fn pop_entry(&mut self) -> Option<Buffered> {
        while self.entry_index < self.entries.len() {
            self.entry_index += 1;
            self.drained = true;
            if let Some(item) = self.entries[self.entry_index - 1].take() {
                return Some(item);
            }
        }
        None
    }

    // Reset fully consumed buffers
    fn compact(&mut self) {
        if self.entry_index >= self.entries.len() {
            self.entries.clear();
            self.entry_index = 0;
        }
        if self.reference_index >= self.references.len() {
            self.references.clear();
            self.reference_index = 0;
        }
    }

    fn clear_buffers(&mut self) {
        self.entries.clear();
        self.entry_index = 0;
        self.references.clear();
        self.reference_index = 0;
    }

    fn defer(&mut self, error: Error, referral: Option<ReferralConnection>) {
        warn!("Deferring search failure: {}", error);
        self.entries.push(Some(Buffered::Failed { error, referral }));
    }

    async fn fill(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut quota = self.constraints.effective_batch_size();
        let start = self.entries.len();
        self.filling = true;

        debug!("Fetching up to {} entries", quota);

        while quota > 0 && !self.completed {
            let response = match self.held.take() {
                Some(response) => response,
                None => match self.queue.get_response(cancel).await {
                    Ok(Some(response)) => response,
                    Ok(None) => {
                        self.defer(Error::Timeout, None);
                        break;
                    }
                    Err(Error::Cancelled) => {
                        self.filling = false;
                        return Err(Error::Cancelled);
                    }
                    Err(e) => {
                        self.terminate(cancel).await;
                        return Err(e);
                    }
                },
            };

            match self.process(response, cancel).await {
                Ok(true) => quota -= 1,
                Ok(false) => {}
                Err(e) => {
                    self.filling = false;
                    return Err(e);
                }
            }
        }

        self.filling = false;
        if self.entries.len() > start || !self.references.is_empty() {
            self.drained = false;
        }
        debug!(
            "Fetch done: {} buffered, {} references, completed: {}",
            self.entries.len() - self.entry_index,
            self.references.len() - self.reference_index,
            self.completed
        );
        Ok(())
    }

    // Returns true if the response consumed entry quota. Only cancellation is returned as an
    // error; the response is then kept for the next fetch.
    async fn process(&mut self, response: Response, cancel: &CancellationToken) -> Result<bool> {
        if let Some(ref controls) = response.message.controls {
            self.response_controls = controls.clone();
        }

        let message_id = response.message.message_id();
        if matches!(response.message.protocol_op, ProtocolOp::SearchResEntry(_)) {
            let Response { message, referral, .. } = response;
            if let ProtocolOp::SearchResEntry(entry) = message.protocol_op {
                match SearchEntry::try_from(entry) {
                    Ok(entry) => {
                        trace!("Entry {} from message {}", entry.dn, message_id);
                        self.entries.push(Some(Buffered::Entry(entry)));
                    }
                    Err(e) => self.defer(
                        Error::InvalidResponse {
                            message_id,
                            source: Box::new(e),
                        },
                        referral,
                    ),
                }
            }
            return Ok(true);
        }

        match response.message.protocol_op {
            ProtocolOp::SearchResRef(ref reference) => {
                let urls = reference.urls();
                if self.constraints.follows_referrals() {
                    self.chase(&response, &urls, true, cancel).await?;
                } else {
                    debug!("Reference not followed: {:?}", urls);
                    self.references.push(Some(urls));
                }
                Ok(false)
            }
            ProtocolOp::SearchResDone(ref result) => {
                let result = match response.failure {
                    Some(ref failure) => {
                        debug!("Message {} ended by connection failure: {}", message_id, failure);
                        LdapResult::new(ResultCode::ConnectError, result.matched_dn.clone(), failure.clone())
                    }
                    None => result.clone(),
                };

                if result.result_code == ResultCode::Referral && self.constraints.follows_referrals() {
                    self.chase(&response, &result.referral_urls(), false, cancel).await?;
                } else if result.result_code != ResultCode::Success {
                    self.defer(Error::OperationFailed(result.into()), response.referral.clone());
                }

                self.check_completion(cancel).await;
                Ok(false)
            }
            ProtocolOp::IntermediateResponse(_) => {
                trace!("Ignoring intermediate response to message {}", message_id);
                Ok(false)
            }
            ref other => {
                let error = Error::unexpected_response(message_id, other, "search response");
                self.defer(error, response.referral.clone());
                Ok(false)
            }
        }
    }

    async fn chase(
        &mut self,
        response: &Response,
        urls: &[String],
        is_reference: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = self.queue.request().clone();
        let connections = self.referral_connections.clone();
        debug!(
            "Chasing {} {:?} at hop {}",
            if is_reference { "reference" } else { "referral" },
            urls,
            response.next_hop()
        );

        match self
            .chaser
            .chase_referral(
                &mut self.queue,
                &self.constraints,
                &request,
                urls,
                response.next_hop(),
                is_reference,
                connections,
                cancel,
            )
            .await
        {
            Ok(connections) => {
                self.referral_connections = connections;
                Ok(())
            }
            Err(Error::Cancelled) => {
                self.held = Some(response.clone());
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.defer(e, response.referral.clone());
                Ok(())
            }
        }
    }

    async fn check_completion(&mut self, cancel: &CancellationToken) {
        let outstanding = self.queue.outstanding_message_ids();
        if outstanding.is_empty() && !self.queue.has_pending_controls() {
            debug!("Search {} completed", self.queue.request().message_id());
            self.completed = true;
            self.release_connections(cancel).await;
        } else {
            trace!("Still waiting for messages {:?}", outstanding);
        }
    }

    async fn terminate(&mut self, cancel: &CancellationToken) {
        self.completed = true;
        self.filling = false;
        self.release_connections(cancel).await;
    }

    async fn release_connections(&mut self, cancel: &CancellationToken) {
        let connections = std::mem::take(&mut self.referral_connections);
        if connections.is_empty() {
            return;
        }
        debug!("Releasing {} referral connections", connections.len());
        if let Err(e) = self.chaser.release_referral_connections(connections, cancel).await {
            warn!("Failed to release referral connections: {}", e);
        }
    }
}

fn attach_referral(error: Error, referral: Option<ReferralConnection>) -> Error {
    match (error, referral) {
        (Error::OperationFailed(e), Some(referral)) => Error::OperationFailed(e.with_referral_context(ReferralContext {
            urls: referral.urls,
            address: referral.address,
        })),
        (Error::Referral(mut e), Some(referral)) => {
            if e.failed_url.is_none() {
                e.failed_url = Some(referral.url);
            }
            Error::Referral(e)
        }
        (error, _) => error,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        error::{ReferralFailure, UsageError},
        message::{LdapMessage, PartialAttribute, SearchResultEntry, SearchResultReference},
        model::SearchRequest,
    };

    const SEARCH_ID: i32 = 1;

    fn entry(id: i32, dn: &str) -> Response {
        Response::new(LdapMessage::new(
            id,
            ProtocolOp::SearchResEntry(SearchResultEntry {
                object_name: Bytes::copy_from_slice(dn.as_bytes()),
                attributes: vec![PartialAttribute::new("cn", vec!["x".into()])],
            }),
        ))
    }

    fn reference(id: i32, urls: &[&str]) -> Response {
        Response::new(LdapMessage::new(
            id,
            ProtocolOp::SearchResRef(SearchResultReference(
                urls.iter().map(|u| Bytes::copy_from_slice(u.as_bytes())).collect(),
            )),
        ))
    }

    fn done(id: i32, result: LdapResult) -> Response {
        Response::new(LdapMessage::new(id, ProtocolOp::SearchResDone(result)))
    }

    fn success(id: i32) -> Response {
        done(id, LdapResult::success())
    }

    fn is_done(item: &Result<Response>) -> Option<i32> {
        match item {
            Ok(r) if matches!(r.message.protocol_op, ProtocolOp::SearchResDone(_)) => Some(r.message.message_id),
            _ => None,
        }
    }

    struct MockQueue {
        request: LdapMessage,
        script: VecDeque<Result<Response>>,
        abandoned: usize,
    }

    impl MockQueue {
        fn new(script: Vec<Result<Response>>) -> Self {
            let request = LdapMessage::new(
                SEARCH_ID,
                ProtocolOp::SearchRequest(SearchRequest::root_dse().into()),
            );
            Self {
                request,
                script: script.into(),
                abandoned: 0,
            }
        }

        fn with(responses: Vec<Response>) -> Self {
            Self::new(responses.into_iter().map(Ok).collect())
        }
    }

    #[async_trait]
    impl MessageQueue for MockQueue {
        async fn get_response(&mut self, cancel: &CancellationToken) -> Result<Option<Response>> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.script.pop_front() {
                Some(Ok(response)) => Ok(Some(response)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }

        fn outstanding_message_ids(&self) -> Vec<i32> {
            self.script.iter().filter_map(is_done).collect()
        }

        fn request(&self) -> &LdapMessage {
            &self.request
        }

        async fn abandon(&mut self, _cancel: &CancellationToken) -> Result<()> {
            self.abandoned += 1;
            self.script.clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockChaser {
        chased: Mutex<Vec<(Vec<String>, u32, bool)>>,
        released: Mutex<Vec<u64>>,
        cancel_next: Mutex<bool>,
    }

    fn referral_connection(id: u64, url: &str, urls: &[String], hops: u32) -> ReferralConnection {
        ReferralConnection {
            id,
            url: url.to_owned(),
            urls: urls.to_vec(),
            address: "dc2:389".to_owned(),
            hops,
        }
    }

    #[async_trait]
    impl ReferralChaser<MockQueue> for MockChaser {
        async fn chase_referral(
            &self,
            queue: &mut MockQueue,
            _constraints: &SearchConstraints,
            message: &LdapMessage,
            urls: &[String],
            connect_number: u32,
            is_reference: bool,
            mut connections: Vec<ReferralConnection>,
            _cancel: &CancellationToken,
        ) -> Result<Vec<ReferralConnection>> {
            if std::mem::take(&mut *self.cancel_next.lock()) {
                return Err(Error::Cancelled);
            }
            self.chased.lock().push((urls.to_vec(), connect_number, is_reference));

            let url = &urls[0];
            if url.contains("fail") {
                return Err(Error::Referral(ReferralError {
                    urls: urls.to_vec(),
                    failed_url: Some(url.clone()),
                    reason: ReferralFailure::ChaseFailed("connection refused".to_owned()),
                }));
            }

            let id = message.message_id() + 100 + connections.len() as i32;
            let conn = referral_connection(connections.len() as u64 + 1, url, urls, connect_number);
            if url.contains("missing") {
                queue.script.push_back(Ok(done(
                    id,
                    LdapResult::new(ResultCode::NoSuchObject, "dc=example", "no such entry"),
                )
                .on_referral(conn.clone())));
            } else {
                queue
                    .script
                    .push_back(Ok(entry(id, "cn=remote,dc=example").on_referral(conn.clone())));
                queue.script.push_back(Ok(success(id).on_referral(conn.clone())));
            }
            connections.push(conn);
            Ok(connections)
        }

        async fn release_referral_connections(
            &self,
            connections: Vec<ReferralConnection>,
            _cancel: &CancellationToken,
        ) -> Result<()> {
            self.released.lock().extend(connections.into_iter().map(|c| c.id));
            Ok(())
        }
    }

    fn results(queue: MockQueue, constraints: SearchConstraints) -> SearchResults<MockQueue, MockChaser> {
        SearchResults::new(queue, MockChaser::default(), constraints)
    }

    fn entry_dn(result: Result<SearchEntry>) -> String {
        result.unwrap().dn
    }

    #[tokio::test]
    async fn test_batch_quota() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![entry(1, "cn=a"), entry(1, "cn=b"), success(1)]);
        let mut results = results(queue, SearchConstraints::new().batch_size(2));

        assert_eq!(results.state(), SearchState::Idle);
        assert!(results.has_more(&cancel).await.unwrap());
        assert_eq!(results.state(), SearchState::HasData);
        // the terminal response is still queued
        assert_eq!(results.queue().script.len(), 1);

        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
        assert_eq!(results.state(), SearchState::Draining);
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=b");
        assert_eq!(results.state(), SearchState::Idle);

        assert!(!results.has_more(&cancel).await.unwrap());
        assert_eq!(results.state(), SearchState::Completed);
        assert!(matches!(
            results.next(&cancel).await,
            Err(Error::Usage(UsageError::NoMoreEntries))
        ));
    }

    #[tokio::test]
    async fn test_reference_not_followed() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![reference(1, &["ldap://dc2/"]), entry(1, "cn=a"), success(1)]);
        let mut results = results(queue, SearchConstraints::new());

        match results.next(&cancel).await {
            Err(Error::Referral(e)) => {
                assert_eq!(e.urls, vec!["ldap://dc2/".to_owned()]);
                assert_eq!(e.reason, ReferralFailure::NotFollowed);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
        assert!(!results.has_more(&cancel).await.unwrap());
        assert!(results.chaser.chased.lock().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_result_error() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![
            entry(1, "cn=a"),
            entry(1, "cn=b"),
            done(1, LdapResult::new(ResultCode::SizeLimitExceeded, "", "")),
        ]);
        let mut results = results(queue, SearchConstraints::new().batch_size(0));

        assert!(results.has_more(&cancel).await.unwrap());
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=b");
        match results.next(&cancel).await {
            Err(Error::OperationFailed(e)) => {
                assert_eq!(e.result_code, ResultCode::SizeLimitExceeded);
                assert!(e.referral_context.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!results.has_more(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_abandon() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![entry(1, "cn=a"), entry(1, "cn=b"), success(1)]);
        let mut results = results(queue, SearchConstraints::new());

        assert!(results.has_more(&cancel).await.unwrap());
        results.abandon(&cancel).await.unwrap();
        results.abandon(&cancel).await.unwrap();

        assert_eq!(results.state(), SearchState::Abandoned);
        assert_eq!(results.queue().abandoned, 1);
        assert!(!results.has_more(&cancel).await.unwrap());
        assert!(matches!(
            results.next(&cancel).await,
            Err(Error::Usage(UsageError::NoMoreEntries))
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_deferred() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![entry(1, "cn=a")]);
        let mut results = results(queue, SearchConstraints::new().batch_size(3));

        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
        assert!(matches!(results.next(&cancel).await, Err(Error::Timeout)));
        assert_eq!(results.state(), SearchState::Idle);
    }

    #[tokio::test]
    async fn test_connection_failure_normalized() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![success(1).with_failure("connection reset by peer")]);
        let mut results = results(queue, SearchConstraints::new());

        match results.next(&cancel).await {
            Err(Error::OperationFailed(e)) => {
                assert_eq!(e.result_code, ResultCode::ConnectError);
                assert_eq!(e.diagnostic_message, "connection reset by peer");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!results.has_more(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_entry_does_not_abort_batch() {
        let cancel = CancellationToken::new();
        let broken = Response::new(LdapMessage::new(
            1,
            ProtocolOp::SearchResEntry(SearchResultEntry {
                object_name: Bytes::from_static(b"cn=\xff"),
                attributes: Vec::new(),
            }),
        ));
        let queue = MockQueue::with(vec![entry(1, "cn=a"), broken, success(1)]);
        let mut results = results(queue, SearchConstraints::new().batch_size(0));

        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
        assert!(matches!(
            results.next(&cancel).await,
            Err(Error::InvalidResponse { message_id: 1, .. })
        ));
        assert!(!results.has_more(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_delivered_intact() {
        let cancel = CancellationToken::new();
        let control = Control {
            control_type: Bytes::from_static(b"1.2.3.4"),
            criticality: false,
            control_value: None,
        };
        let message = LdapMessage::new(
            1,
            ProtocolOp::SearchResEntry(SearchResultEntry {
                object_name: Bytes::from_static(b"cn=a"),
                attributes: vec![
                    PartialAttribute::new("mail", vec!["a@example".into(), "a2@example".into()]),
                    PartialAttribute::new("cn", vec!["a".into()]),
                ],
            }),
        )
        .with_controls(vec![control.clone()]);
        let on_referral = Response::new(message).on_referral(referral_connection(2, "ldap://dc2/", &[], 1));
        let queue = MockQueue::with(vec![on_referral, success(1)]);
        let mut results = results(queue, SearchConstraints::new());

        let entry = results.next(&cancel).await.unwrap();
        assert_eq!(entry.dn, "cn=a");
        assert_eq!(entry.attributes.len(), 2);
        assert_eq!(
            entry.values("mail"),
            Some(&[Bytes::from("a@example"), Bytes::from("a2@example")][..])
        );
        assert_eq!(results.response_controls(), &[control][..]);
    }

    #[tokio::test]
    async fn test_fatal_error_ends_search() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::new(vec![
            Ok(entry(1, "cn=a")),
            Err(Error::Decode(crate::ber::DecodeError::InvalidTag { offset: 0 })),
            Ok(success(1)),
        ]);
        let mut results = results(queue, SearchConstraints::new().batch_size(0));

        assert!(matches!(results.next(&cancel).await, Err(Error::Decode(_))));
        // entries buffered before the failure are still delivered
        assert!(results.has_more(&cancel).await.unwrap());
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
        assert!(!results.has_more(&cancel).await.unwrap());
        assert_eq!(results.state(), SearchState::Completed);
        assert!(matches!(
            results.next(&cancel).await,
            Err(Error::Usage(UsageError::NoMoreEntries))
        ));
    }

    #[tokio::test]
    async fn test_stream_drains_after_fatal_error() {
        let queue = MockQueue::new(vec![
            Ok(entry(1, "cn=a")),
            Ok(entry(1, "cn=b")),
            Err(Error::Decode(crate::ber::DecodeError::InvalidTag { offset: 0 })),
            Ok(success(1)),
        ]);
        let items = results(queue, SearchConstraints::new().batch_size(0))
            .into_stream(CancellationToken::new())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Err(Error::Decode(_))));
        assert_eq!(items[1].as_ref().unwrap().dn, "cn=a");
        assert_eq!(items[2].as_ref().unwrap().dn, "cn=b");
    }

    #[tokio::test]
    async fn test_reference_chased() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![
            entry(1, "cn=a"),
            reference(1, &["ldap://dc2/ou=remote,dc=example"]),
            success(1),
        ]);
        let mut results = results(
            queue,
            SearchConstraints::new().batch_size(0).referral_following(true),
        );

        assert!(results.has_more(&cancel).await.unwrap());
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=remote,dc=example");
        assert!(!results.has_more(&cancel).await.unwrap());

        let chased = results.chaser.chased.lock().clone();
        assert_eq!(
            chased,
            vec![(vec!["ldap://dc2/ou=remote,dc=example".to_owned()], 1, true)]
        );
        assert_eq!(*results.chaser.released.lock(), vec![1]);
        assert!(results.referral_connections().is_empty());
    }

    #[tokio::test]
    async fn test_referral_result_chased_with_context() {
        let cancel = CancellationToken::new();
        let referral = LdapResult::new(ResultCode::Referral, "", "").with_referral(["ldap://dc2/missing"]);
        let queue = MockQueue::with(vec![done(1, referral)]);
        let mut results = results(
            queue,
            SearchConstraints::new().batch_size(0).referral_following(true),
        );

        match results.next(&cancel).await {
            Err(Error::OperationFailed(e)) => {
                assert_eq!(e.result_code, ResultCode::NoSuchObject);
                let context = e.referral_context.unwrap();
                assert_eq!(context.address, "dc2:389");
                assert_eq!(context.urls, vec!["ldap://dc2/missing".to_owned()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!results.chaser.chased.lock()[0].2);
        assert!(!results.has_more(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_chase_is_deferred() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![
            reference(1, &["ldap://fail/"]),
            entry(1, "cn=a"),
            success(1),
        ]);
        let mut results = results(
            queue,
            SearchConstraints::new().batch_size(0).referral_following(true),
        );

        match results.next(&cancel).await {
            Err(Error::Referral(e)) => {
                assert_eq!(e.failed_url.as_deref(), Some("ldap://fail/"));
                assert!(matches!(e.reason, ReferralFailure::ChaseFailed(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
    }

    #[tokio::test]
    async fn test_cancellation_keeps_state() {
        let queue = MockQueue::with(vec![entry(1, "cn=a"), success(1)]);
        let mut results = results(queue, SearchConstraints::new());

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(matches!(results.next(&cancelled).await, Err(Error::Cancelled)));
        assert_eq!(results.state(), SearchState::Idle);

        let cancel = CancellationToken::new();
        assert_eq!(entry_dn(results.next(&cancel).await), "cn=a");
    }

    #[tokio::test]
    async fn test_cancelled_chase_is_retried() {
        let cancel = CancellationToken::new();
        let queue = MockQueue::with(vec![reference(1, &["ldap://dc2/"]), success(1)]);
        let mut results = results(
            queue,
            SearchConstraints::new().batch_size(0).referral_following(true),
        );
        *results.chaser.cancel_next.lock() = true;

        assert!(matches!(results.next(&cancel).await, Err(Error::Cancelled)));
        assert!(results.chaser.chased.lock().is_empty());

        assert_eq!(entry_dn(results.next(&cancel).await), "cn=remote,dc=example");
        assert_eq!(results.chaser.chased.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_response_controls() {
        let cancel = CancellationToken::new();
        let control = Control::new("1.2.840.113556.1.4.319", false, Some(Bytes::from_static(b"\x30\x00")));
        let mut last = success(1);
        last.message = last.message.with_controls(vec![control.clone()]);
        let queue = MockQueue::with(vec![entry(1, "cn=a"), last]);
        let mut results = results(queue, SearchConstraints::new().batch_size(0));

        assert!(results.response_controls().is_empty());
        assert!(results.has_more(&cancel).await.unwrap());
        assert_eq!(results.response_controls(), &[control]);
    }

    #[tokio::test]
    async fn test_stream_adapter() {
        let queue = MockQueue::with(vec![
            entry(1, "cn=a"),
            reference(1, &["ldap://dc2/"]),
            entry(1, "cn=b"),
            success(1),
        ]);
        let items = results(queue, SearchConstraints::new().batch_size(0))
            .into_stream(CancellationToken::new())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Err(Error::Referral(_))));
        assert_eq!(items[1].as_ref().unwrap().dn, "cn=a");
        assert_eq!(items[2].as_ref().unwrap().dn, "cn=b");
    }
}
