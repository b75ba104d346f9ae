use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use log::{debug, trace, warn};
use parking_lot::RwLock;

use crate::{
    channel::{ChannelEndpoints, ChannelFailure, LdapChannel, LdapMessageReceiver, LdapMessageSender},
    error::Error,
    message::{LdapMessage, ProtocolOp},
    msgid::MessageIds,
};

const CLIENT_CHANNEL_SIZE: usize = 256;
const NOTICE_OF_DISCONNECTION_OID: &[u8] = b"1.3.6.1.4.1.1466.20036";

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

type ClientMap = Arc<RwLock<HashMap<i32, LdapMessageSender>>>;

/// One server connection with responses routed by message id
#[derive(Clone)]
pub(crate) struct LdapConnection {
    id: u64,
    address: String,
    clients: ClientMap,
    channel_sender: LdapMessageSender,
    failure: ChannelFailure,
    ids: Arc<MessageIds>,
}

impl LdapConnection {
    pub(crate) async fn connect<A>(address: A, port: u16, ids: Arc<MessageIds>) -> Result<Self, Error>
    where
        A: AsRef<str>,
    {
        let ChannelEndpoints {
            sender,
            mut receiver,
            failure,
        } = LdapChannel::for_client(address.as_ref(), port).connect().await?;

        let connection = Self {
            id: CONNECTION_IDS.fetch_add(1, Ordering::Relaxed),
            address: format!("{}:{}", address.as_ref(), port),
            clients: ClientMap::default(),
            channel_sender: sender,
            failure,
            ids,
        };

        let clients = connection.clients.clone();
        let address = connection.address.clone();

        tokio::spawn(async move {
            while let Some(msg) = receiver.next().await {
                if msg.message_id == 0 {
                    match msg.protocol_op {
                        ProtocolOp::ExtendedResp(ref resp)
                            if resp.response_name.as_deref() == Some(NOTICE_OF_DISCONNECTION_OID) =>
                        {
                            debug!("Notice of disconnection received from {}, exiting", address);
                            break;
                        }
                        _ => {
                            warn!("Ignoring unsolicited {} from {}", msg.protocol_op.name(), address);
                            continue;
                        }
                    }
                }
                let sender = clients.read().get(&msg.message_id).cloned();
                match sender {
                    Some(mut sender) => {
                        let _ = sender.send(msg).await;
                    }
                    None => trace!("No receiver for message {}", msg.message_id),
                }
            }
            // ends every pending response stream
            clients.write().clear();
        });

        Ok(connection)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// Reason the connection went down, if it did
    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Message id that is not in flight on this connection
    pub(crate) fn next_message_id(&self) -> i32 {
        let clients = self.clients.read();
        self.ids.next_avoiding(|id| clients.contains_key(&id))
    }

    pub(crate) async fn send_recv_stream(&mut self, msg: LdapMessage) -> Result<MessageStream, Error> {
        let id = msg.message_id;

        // registered before sending so that a fast response is not lost
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_SIZE);
        self.clients.write().insert(id, tx);

        let stream = MessageStream {
            id,
            clients: self.clients.clone(),
            receiver: rx,
        };

        self.channel_sender.send(msg).await?;
        Ok(stream)
    }

    pub(crate) async fn send(&mut self, msg: LdapMessage) -> Result<(), Error> {
        Ok(self.channel_sender.send(msg).await?)
    }

    pub(crate) async fn send_recv(&mut self, msg: LdapMessage) -> Result<LdapMessage, Error> {
        self.send_recv_stream(msg)
            .await?
            .next()
            .await
            .ok_or(Error::ConnectionClosed)
    }

    /// Stop sending. The server sees the socket close once all clones are dropped.
    pub(crate) fn close(&mut self) {
        self.channel_sender.close_channel();
    }
}

/// Responses to one message id
pub(crate) struct MessageStream {
    id: i32,
    clients: ClientMap,
    receiver: LdapMessageReceiver,
}

impl MessageStream {
    pub(crate) fn id(&self) -> i32 {
        self.id
    }
}

impl Stream for MessageStream {
    type Item = LdapMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.clients.write().remove(&self.id);
    }
}
