use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt, TryStreamExt};
use tokio::net::TcpListener;
use tokio_util::{codec::Framed, sync::CancellationToken};

use ldap_stream::{
    codec::LdapCodec,
    controls::{Control, SimplePagedResultsControl},
    error::{Error, ReferralFailure},
    message::{
        BindResponse, LdapMessage, LdapResult, PartialAttribute, ProtocolOp, SearchResultEntry, SearchResultReference,
    },
    LdapClient, SearchConstraints, SearchRequest, SearchScope,
};

type Handler = Arc<dyn Fn(&LdapMessage) -> Vec<LdapMessage> + Send + Sync>;

fn entry(id: i32, dn: &str) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::SearchResEntry(SearchResultEntry {
            object_name: Bytes::copy_from_slice(dn.as_bytes()),
            attributes: vec![PartialAttribute::new("objectClass", vec![Bytes::from_static(b"person")])],
        }),
    )
}

fn reference(id: i32, url: String) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::SearchResRef(SearchResultReference(vec![Bytes::from(url)])),
    )
}

fn done(id: i32) -> LdapMessage {
    LdapMessage::new(id, ProtocolOp::SearchResDone(LdapResult::success()))
}

fn base_dn(msg: &LdapMessage) -> String {
    match msg.protocol_op {
        ProtocolOp::SearchRequest(ref req) => String::from_utf8_lossy(&req.base_object).into_owned(),
        _ => panic!("not a search request"),
    }
}

// Loopback directory server answering binds itself and searches through `handler`
async fn start_server(handler: Handler) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, LdapCodec);
                while let Some(Ok(msg)) = framed.next().await {
                    let replies = match msg.protocol_op {
                        ProtocolOp::BindRequest(_) => vec![LdapMessage::new(
                            msg.message_id,
                            ProtocolOp::BindResponse(BindResponse {
                                result: LdapResult::success(),
                                server_sasl_creds: None,
                            }),
                        )],
                        ProtocolOp::SearchRequest(_) => handler(&msg),
                        ProtocolOp::UnbindRequest => break,
                        _ => Vec::new(),
                    };
                    for reply in replies {
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    port
}

async fn connect(port: u16) -> LdapClient {
    let mut client = LdapClient::builder("127.0.0.1").port(port).connect().await.unwrap();
    client.simple_bind("cn=reader,dc=example", "secret").await.unwrap();
    client
}

fn request() -> SearchRequest {
    SearchRequest::builder()
        .base_dn("dc=example")
        .scope(SearchScope::WholeSubtree)
        .filter("(objectClass=person)")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_reference_not_followed() {
    let port = start_server(Arc::new(|msg: &LdapMessage| {
        let id = msg.message_id;
        vec![
            entry(id, "cn=a,dc=example"),
            reference(id, "ldap://dc2.example/ou=remote,dc=example".to_owned()),
            entry(id, "cn=b,dc=example"),
            done(id),
        ]
    }))
    .await;

    let mut client = connect(port).await;
    let cancel = CancellationToken::new();
    let mut results = client.search(request(), SearchConstraints::new()).await.unwrap();

    assert_eq!(results.next(&cancel).await.unwrap().dn, "cn=a,dc=example");
    match results.next(&cancel).await {
        Err(Error::Referral(e)) => {
            assert_eq!(e.urls, vec!["ldap://dc2.example/ou=remote,dc=example".to_owned()]);
            assert_eq!(e.reason, ReferralFailure::NotFollowed);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(results.next(&cancel).await.unwrap().dn, "cn=b,dc=example");
    assert!(!results.has_more(&cancel).await.unwrap());

    client.unbind().await.unwrap();
}

#[tokio::test]
async fn test_reference_chased() {
    let remote = start_server(Arc::new(|msg: &LdapMessage| {
        let id = msg.message_id;
        vec![entry(id, &format!("cn=remote,{}", base_dn(msg))), done(id)]
    }))
    .await;

    let port = start_server(Arc::new(move |msg: &LdapMessage| {
        let id = msg.message_id;
        vec![
            entry(id, "cn=a,dc=example"),
            reference(id, format!("ldap://127.0.0.1:{}/ou=remote,dc=example", remote)),
            done(id),
        ]
    }))
    .await;

    let mut client = connect(port).await;
    let results = client
        .search(request(), SearchConstraints::new().batch_size(0).referral_following(true))
        .await
        .unwrap();

    let mut dns = results
        .into_stream(CancellationToken::new())
        .map_ok(|e| e.dn)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    dns.sort();

    assert_eq!(dns, vec!["cn=a,dc=example", "cn=remote,ou=remote,dc=example"]);
}

#[tokio::test]
async fn test_paged_search() {
    let port = start_server(Arc::new(|msg: &LdapMessage| {
        let id = msg.message_id;
        let paged = msg
            .controls()
            .iter()
            .find(|c| c.control_type == SimplePagedResultsControl::OID)
            .cloned()
            .map(|c| SimplePagedResultsControl::try_from(c).unwrap())
            .unwrap();
        let (dn, next_cookie) = if paged.cookie().is_empty() {
            ("cn=page1,dc=example", &b"page2"[..])
        } else {
            ("cn=page2,dc=example", &b""[..])
        };
        let control = Control::from(SimplePagedResultsControl::new(0).with_cookie(Bytes::copy_from_slice(next_cookie)));
        vec![entry(id, dn), done(id).with_controls(vec![control])]
    }))
    .await;

    let mut client = connect(port).await;
    let results = client
        .search(
            request(),
            SearchConstraints::new().control(SimplePagedResultsControl::new(1)),
        )
        .await
        .unwrap();

    let dns = results
        .into_stream(CancellationToken::new())
        .map_ok(|e| e.dn)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    assert_eq!(dns, vec!["cn=page1,dc=example", "cn=page2,dc=example"]);
}

#[tokio::test]
async fn test_response_timeout() {
    let port = start_server(Arc::new(|_: &LdapMessage| Vec::new())).await;

    let mut client = connect(port).await;
    let cancel = CancellationToken::new();
    let mut results = client
        .search(
            request(),
            SearchConstraints::new().time_limit(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert!(matches!(results.next(&cancel).await, Err(Error::Timeout)));

    results.abandon(&cancel).await.unwrap();
    assert!(!results.has_more(&cancel).await.unwrap());
}
