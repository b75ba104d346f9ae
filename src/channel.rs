//! Low-level LDAP channel operations

use std::{io, net::ToSocketAddrs, sync::Arc, time::Duration};

use futures::{
    channel::mpsc::{self, Receiver, Sender},
    future,
    sink::SinkExt,
    StreamExt,
};
use log::{debug, error};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{codec::LdapCodec, error::Error, message::LdapMessage};

const CHANNEL_SIZE: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type LdapMessageSender = Sender<LdapMessage>;
pub type LdapMessageReceiver = Receiver<LdapMessage>;

/// Reason the channel stopped, set once by the background task
pub type ChannelFailure = Arc<Mutex<Option<String>>>;

fn io_error<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// LDAP channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    IoError(#[from] io::Error),
    #[error(transparent)]
    ConnectTimeout(#[from] tokio::time::error::Elapsed),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Both ends of a connected channel
pub struct ChannelEndpoints {
    pub sender: LdapMessageSender,
    pub receiver: LdapMessageReceiver,
    pub failure: ChannelFailure,
}

/// LDAP TCP channel connector
pub struct LdapChannel {
    address: String,
    port: u16,
}

impl LdapChannel {
    /// Create a client-side channel with a given server address and port
    pub fn for_client<S>(address: S, port: u16) -> Self
    where
        S: AsRef<str>,
    {
        LdapChannel {
            address: address.as_ref().to_owned(),
            port,
        }
    }

    /// Connect to a server
    pub async fn connect(self) -> ChannelResult<ChannelEndpoints> {
        let mut addrs = (self.address.as_ref(), self.port).to_socket_addrs()?;
        let address = addrs.next().ok_or_else(|| io_error("Address resolution error"))?;

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await??;
        stream.set_nodelay(true)?;

        debug!("Connection established to {}", address);

        Ok(make_channel(stream))
    }
}

fn make_channel<S>(stream: S) -> ChannelEndpoints
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = tokio_util::codec::Framed::new(stream, LdapCodec);

    // socket -> tx_in -> rx_in, read by the connection dispatcher
    let (mut tx_in, rx_in) = mpsc::channel(CHANNEL_SIZE);

    // tx_out -> rx_out -> socket, written by the connection users
    let (tx_out, rx_out) = mpsc::channel(CHANNEL_SIZE);

    let failure = ChannelFailure::default();
    let reason = failure.clone();

    let channel = async move {
        let (mut sink, mut stream) = framed.split();

        let mut rx = rx_out.map(Ok::<_, Error>);
        let to_wire = async move {
            match sink.send_all(&mut rx).await {
                Ok(()) => "connection closed by client".to_owned(),
                Err(e) => {
                    error!("Write error: {}", e);
                    e.to_string()
                }
            }
        };

        let from_wire = async {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(msg) => {
                        if tx_in.send(msg).await.is_err() {
                            return "receiver dropped".to_owned();
                        }
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        return e.to_string();
                    }
                }
            }
            "connection closed by server".to_owned()
        };

        // whichever side finishes first drops the other
        let text = match future::select(Box::pin(to_wire), Box::pin(from_wire)).await {
            future::Either::Left((text, _)) | future::Either::Right((text, _)) => text,
        };
        debug!("Channel terminated: {}", text);
        *reason.lock() = Some(text);
        drop(tx_in);
    };

    tokio::spawn(channel);

    ChannelEndpoints {
        sender: tx_out,
        receiver: rx_in,
        failure,
    }
}
