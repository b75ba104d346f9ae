use ldap_stream::{LdapClient, SearchConstraints, SearchRequest, SearchScope};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let mut client = LdapClient::builder("ldap.forumsys.com").connect().await?;
    client
        .simple_bind("cn=read-only-admin,dc=example,dc=com", "password")
        .await?;

    let request = SearchRequest::builder()
        .base_dn("dc=example,dc=com")
        .scope(SearchScope::WholeSubtree)
        .filter("(objectClass=person)")
        .attributes(["cn", "mail"])
        .build()?;

    let cancel = CancellationToken::new();
    let mut results = client
        .search(request, SearchConstraints::new().batch_size(10).referral_following(true))
        .await?;

    while results.has_more(&cancel).await? {
        match results.next(&cancel).await {
            Ok(entry) => println!("{}: {:?}", entry.dn, entry.values("cn")),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => eprintln!("{}", e),
        }
    }

    client.unbind().await?;
    Ok(())
}
