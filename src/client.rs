//! LDAP client module

use std::{
    collections::HashMap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::SelectAll, Stream, StreamExt};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    conn::{LdapConnection, MessageStream},
    controls::{Control, SimplePagedResultsControl},
    error::{Error, ReferralError, ReferralFailure, Result},
    filter::{parse_filter, Filter},
    message::{BindRequest, LdapMessage, LdapResult, ProtocolOp, ResultCode},
    model::SearchRequest,
    msgid::MessageIds,
    options::SearchConstraints,
    queue::{MessageQueue, ReferralChaser, ReferralConnection, Response},
    search::SearchResults,
    url::{LdapUrl, DEFAULT_PORT},
};

fn check_result(result: LdapResult) -> Result<()> {
    if result.result_code == ResultCode::Success {
        Ok(())
    } else {
        Err(Error::OperationFailed(result.into()))
    }
}

// The URL's dn and filter replace the original ones. Its scope, when given, wins over the
// single level narrowing applied to continuation references.
fn referral_request(
    message: &LdapMessage,
    url: &LdapUrl,
    filter: Option<Filter>,
    message_id: i32,
    is_reference: bool,
) -> Result<LdapMessage> {
    let mut request = message.dup_request(message_id, url.dn.as_deref(), filter, is_reference)?;
    if let ProtocolOp::SearchRequest(ref mut req) = request.protocol_op {
        if let Some(scope) = url.scope {
            req.scope = scope;
        }
        if !url.attributes.is_empty() {
            req.attributes = url
                .attributes
                .iter()
                .map(|a| Bytes::copy_from_slice(a.as_bytes()))
                .collect();
        }
    }
    Ok(request)
}

fn is_terminal(op: &ProtocolOp) -> bool {
    !matches!(
        op,
        ProtocolOp::SearchResEntry(_) | ProtocolOp::SearchResRef(_) | ProtocolOp::IntermediateResponse(_)
    )
}

async fn bind(connection: &mut LdapConnection, username: &str, password: &str) -> Result<()> {
    let id = connection.next_message_id();
    let msg = LdapMessage::new(
        id,
        ProtocolOp::BindRequest(BindRequest::simple(username.to_owned(), password.to_owned())),
    );

    let item = connection.send_recv(msg).await?;

    match item.protocol_op {
        ProtocolOp::BindResponse(resp) => check_result(resp.result),
        other => Err(Error::unexpected_response(item.message_id, &other, "bind")),
    }
}

/// LDAP client builder
pub struct LdapClientBuilder {
    address: String,
    port: u16,
}

impl LdapClientBuilder {
    /// Set port number, default is 389
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Build client and connect
    pub async fn connect(self) -> Result<LdapClient> {
        LdapClient::connect(self.address, self.port).await
    }
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// LDAP client
#[derive(Clone)]
pub struct LdapClient {
    address: String,
    port: u16,
    connection: LdapConnection,
    ids: Arc<MessageIds>,
    credentials: Arc<RwLock<Option<Credentials>>>,
    referrals: Arc<Mutex<HashMap<u64, LdapConnection>>>,
}

impl LdapClient {
    /// Create client builder
    pub fn builder<A: AsRef<str>>(address: A) -> LdapClientBuilder {
        LdapClientBuilder {
            address: address.as_ref().to_owned(),
            port: DEFAULT_PORT,
        }
    }

    pub(crate) async fn connect<A>(address: A, port: u16) -> Result<Self>
    where
        A: AsRef<str>,
    {
        let ids = Arc::new(MessageIds::new());
        let connection = LdapConnection::connect(address.as_ref(), port, ids.clone()).await?;
        Ok(Self {
            address: address.as_ref().to_owned(),
            port,
            connection,
            ids,
            credentials: Arc::default(),
            referrals: Arc::default(),
        })
    }

    /// Perform simple bind operation with username and password.
    /// The credentials are reused to bind connections opened for referrals.
    pub async fn simple_bind<U, P>(&mut self, username: U, password: P) -> Result<()>
    where
        U: AsRef<str>,
        P: AsRef<str>,
    {
        bind(&mut self.connection, username.as_ref(), password.as_ref()).await?;
        *self.credentials.write() = Some(Credentials {
            username: username.as_ref().to_owned(),
            password: password.as_ref().to_owned(),
        });
        Ok(())
    }

    /// Perform unbind operation. This will instruct LDAP server to terminate the connection
    pub async fn unbind(&mut self) -> Result<()> {
        let id = self.connection.next_message_id();

        let msg = LdapMessage::new(id, ProtocolOp::UnbindRequest);
        self.connection.send(msg).await?;
        self.connection.close();

        Ok(())
    }

    /// Start a search operation. Entries are pulled from the returned [`SearchResults`].
    ///
    /// A [`SimplePagedResultsControl`] among the constraint controls turns the search into a
    /// paged one: the next page is requested automatically until the server returns an empty
    /// cookie.
    pub async fn search(
        &mut self,
        request: SearchRequest,
        constraints: SearchConstraints,
    ) -> Result<SearchResults<SearchQueue, LdapClient>> {
        let id = self.connection.next_message_id();
        let msg = LdapMessage::new(id, ProtocolOp::SearchRequest(request.into()))
            .with_controls(constraints.controls().to_vec());

        debug!("Search request {} to {}", id, self.connection.address());

        let stream = self.connection.send_recv_stream(msg.clone()).await?;

        let mut queue = SearchQueue::new(msg.clone(), constraints.response_timeout());
        queue.register(self.connection.clone(), stream, msg, None);

        Ok(SearchResults::new(queue, self.clone(), constraints))
    }

    async fn open_referral(&self, url: &LdapUrl) -> Result<LdapConnection> {
        let host = if url.host.is_empty() { &self.address } else { &url.host };
        let port = if url.host.is_empty() { self.port } else { url.port };

        let mut connection = LdapConnection::connect(host, port, self.ids.clone()).await?;
        let credentials = self.credentials.read().clone();
        if let Some(credentials) = credentials {
            bind(&mut connection, &credentials.username, &credentials.password).await?;
        }
        Ok(connection)
    }

    #[allow(clippy::too_many_arguments)]
    async fn follow(
        &self,
        queue: &mut SearchQueue,
        message: &LdapMessage,
        url: &str,
        urls: &[String],
        connect_number: u32,
        is_reference: bool,
        cancel: &CancellationToken,
    ) -> Result<ReferralConnection> {
        let parsed = LdapUrl::parse(url)?;
        if parsed.secure {
            return Err(Error::InvalidUrl(format!("{} (TLS is not supported)", url)));
        }
        let filter = parsed.filter.as_deref().map(parse_filter).transpose()?;

        let mut connection = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            connection = self.open_referral(&parsed) => connection?,
        };

        let request = referral_request(message, &parsed, filter, connection.next_message_id(), is_reference)?;
        let stream = connection.send_recv_stream(request.clone()).await?;

        let referral = ReferralConnection {
            id: connection.id(),
            url: url.to_owned(),
            urls: urls.to_vec(),
            address: connection.address().to_owned(),
            hops: connect_number,
        };
        debug!(
            "Request {} reissued as {} on {}",
            message.message_id(),
            request.message_id(),
            referral.address
        );

        self.referrals.lock().insert(connection.id(), connection.clone());
        queue.register(connection, stream, request, Some(referral.clone()));
        Ok(referral)
    }
}

#[async_trait]
impl ReferralChaser<SearchQueue> for LdapClient {
    async fn chase_referral(
        &self,
        queue: &mut SearchQueue,
        constraints: &SearchConstraints,
        message: &LdapMessage,
        urls: &[String],
        connect_number: u32,
        is_reference: bool,
        mut connections: Vec<ReferralConnection>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReferralConnection>> {
        if connect_number > constraints.max_hops() {
            return Err(ReferralError {
                urls: urls.to_vec(),
                failed_url: None,
                reason: ReferralFailure::HopLimitExceeded,
            }
            .into());
        }

        let mut last_failure = None;
        for url in urls {
            match self
                .follow(queue, message, url, urls, connect_number, is_reference, cancel)
                .await
            {
                Ok(referral) => {
                    connections.push(referral);
                    return Ok(connections);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Failed to follow {}: {}", url, e);
                    last_failure = Some((url.clone(), e.to_string()));
                }
            }
        }

        let (failed_url, reason) = match last_failure {
            Some((url, reason)) => (Some(url), reason),
            None => (None, "referral without URLs".to_owned()),
        };
        Err(ReferralError {
            urls: urls.to_vec(),
            failed_url,
            reason: ReferralFailure::ChaseFailed(reason),
        }
        .into())
    }

    async fn release_referral_connections(
        &self,
        connections: Vec<ReferralConnection>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        for referral in connections {
            let connection = self.referrals.lock().remove(&referral.id);
            if let Some(mut connection) = connection {
                debug!("Closing referral connection to {}", connection.address());
                let id = connection.next_message_id();
                if let Err(e) = connection.send(LdapMessage::new(id, ProtocolOp::UnbindRequest)).await {
                    debug!("Unbind on {} failed: {}", connection.address(), e);
                }
                connection.close();
            }
        }
        Ok(())
    }
}

/// Responses of one message id, ending with a synthesized failure if the connection drops
struct TrackedStream {
    inner: MessageStream,
    connection: LdapConnection,
    referral: Option<ReferralConnection>,
    done: bool,
}

impl Stream for TrackedStream {
    type Item = Response;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let response = match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Some(message)) => {
                this.done = is_terminal(&message.protocol_op);
                Response {
                    message,
                    referral: this.referral.clone(),
                    failure: None,
                }
            }
            Poll::Ready(None) => {
                this.done = true;
                let failure = this
                    .connection
                    .failure()
                    .unwrap_or_else(|| format!("connection to {} closed", this.connection.address()));
                let done = LdapResult::new(ResultCode::ServerDown, Bytes::new(), failure.clone());
                Response {
                    message: LdapMessage::new(this.inner.id(), ProtocolOp::SearchResDone(done)),
                    referral: this.referral.clone(),
                    failure: Some(failure),
                }
            }
        };
        Poll::Ready(Some(response))
    }
}

struct Outstanding {
    id: i32,
    connection: LdapConnection,
    request: LdapMessage,
    referral: Option<ReferralConnection>,
}

/// [`MessageQueue`] over the connections of an [`LdapClient`]
pub struct SearchQueue {
    request: LdapMessage,
    streams: SelectAll<TrackedStream>,
    outstanding: Vec<Outstanding>,
    next_page: Option<Outstanding>,
    time_limit: Option<Duration>,
}

impl SearchQueue {
    fn new(request: LdapMessage, time_limit: Option<Duration>) -> Self {
        Self {
            request,
            streams: SelectAll::new(),
            outstanding: Vec::new(),
            next_page: None,
            time_limit,
        }
    }

    fn register(
        &mut self,
        connection: LdapConnection,
        stream: MessageStream,
        request: LdapMessage,
        referral: Option<ReferralConnection>,
    ) {
        self.outstanding.push(Outstanding {
            id: stream.id(),
            connection: connection.clone(),
            request,
            referral: referral.clone(),
        });
        self.streams.push(TrackedStream {
            inner: stream,
            connection,
            referral,
            done: false,
        });
    }

    // Remember the next page request if `response` ends a page with a non-empty cookie
    fn schedule_next_page(&mut self, finished: Outstanding, response: &LdapMessage) {
        let is_paged = finished
            .request
            .controls()
            .iter()
            .any(|c| c.control_type == SimplePagedResultsControl::OID);
        if !is_paged || !matches!(response.protocol_op, ProtocolOp::SearchResDone(ref r) if r.result_code == ResultCode::Success) {
            return;
        }

        let cookie = response
            .controls()
            .iter()
            .find(|c| c.control_type == SimplePagedResultsControl::OID)
            .and_then(|c| SimplePagedResultsControl::try_from(c.clone()).ok())
            .filter(SimplePagedResultsControl::has_entries)
            .map(|c| c.cookie().clone());

        if let Some(cookie) = cookie {
            debug!("Page of request {} done, more entries available", finished.id);
            let controls = finished
                .request
                .controls()
                .iter()
                .map(|c| match SimplePagedResultsControl::try_from(c.clone()) {
                    Ok(paged) if c.control_type == SimplePagedResultsControl::OID => {
                        Control::from(paged.with_cookie(cookie.clone()))
                    }
                    _ => c.clone(),
                })
                .collect();
            self.next_page = Some(Outstanding {
                request: finished.request.clone().with_controls(controls),
                ..finished
            });
        }
    }

    async fn request_next_page(&mut self, page: Outstanding) -> Result<()> {
        let Outstanding {
            mut connection,
            request,
            referral,
            ..
        } = page;
        let request = LdapMessage {
            message_id: connection.next_message_id(),
            ..request
        };
        debug!("Requesting next page as message {}", request.message_id());
        let stream = connection.send_recv_stream(request.clone()).await?;
        self.register(connection, stream, request, referral);
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for SearchQueue {
    async fn get_response(&mut self, cancel: &CancellationToken) -> Result<Option<Response>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(page) = self.next_page.take() {
            self.request_next_page(page).await?;
        }

        let item = {
            let time_limit = self.time_limit;
            let next = self.streams.next();
            let wait = async move {
                match time_limit {
                    Some(limit) => tokio::time::timeout(limit, next).await.ok(),
                    None => Some(next.await),
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                item = wait => item,
            }
        };

        let response = match item {
            None => return Ok(None),
            Some(None) => return Err(Error::ConnectionClosed),
            Some(Some(response)) => response,
        };

        if is_terminal(&response.message.protocol_op) {
            let id = response.message.message_id();
            if let Some(pos) = self.outstanding.iter().position(|o| o.id == id) {
                let finished = self.outstanding.remove(pos);
                if response.failure.is_none() {
                    self.schedule_next_page(finished, &response.message);
                }
            }
        }
        Ok(Some(response))
    }

    fn outstanding_message_ids(&self) -> Vec<i32> {
        self.outstanding.iter().map(|o| o.id).collect()
    }

    fn has_pending_controls(&self) -> bool {
        self.next_page.is_some()
    }

    fn request(&self) -> &LdapMessage {
        &self.request
    }

    async fn abandon(&mut self, _cancel: &CancellationToken) -> Result<()> {
        self.next_page = None;
        self.streams = SelectAll::new();
        for Outstanding { id, mut connection, .. } in self.outstanding.drain(..) {
            let abandon = LdapMessage::new(connection.next_message_id(), ProtocolOp::AbandonRequest(id));
            if let Err(e) = connection.send(abandon).await {
                warn!("Failed to abandon message {} on {}: {}", id, connection.address(), e);
            }
        }
        Ok(())
    }
}
