use std::time::Duration;

use earthdata::{CatalogQuery, Client, HttpSession, LoginSecret, RetryPolicy, SecretStore, Settings};
use mockito::{Matcher, Server};

#[test]
fn search_uses_a_token_obtained_with_the_stored_login() {
    let mut server = Server::new();
    let tokens = server
        .mock("GET", "/api/users/tokens")
        .match_header("authorization", "Basic YWxpY2U6cHc=")
        .with_status(200)
        .with_body(r#"[{"access_token":"urs-token","token_type":"Bearer","expiration_date":"12/31/2099"}]"#)
        .expect(1)
        .create();
    let granules = server
        .mock("GET", "/search/granules.json")
        .match_query(Matcher::UrlEncoded("concept_id".into(), "C2076090826-LPCLOUD".into()))
        .match_header("authorization", "Bearer urs-token")
        .with_status(200)
        .with_header("CMR-Hits", "0")
        .with_body(r#"{"feed":{"entry":[]}}"#)
        .expect(2)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let secret_file = dir.path().join(".earthdatarc");
    SecretStore::new(&secret_file)
        .provision(&LoginSecret::new("127.0.0.1", "alice", "pw"))
        .unwrap();

    let mut settings = Settings::new(&secret_file);
    settings.urs_url = server.url();
    settings.cmr_url = format!("{}/search", server.url());
    settings.netrc_file = None;
    settings.interactive = false;

    let http = HttpSession::new(Duration::from_secs(5), true)
        .unwrap()
        .with_retry(RetryPolicy::immediate(2));
    let client = Client::with_http(settings, http).unwrap();
    assert_eq!(client.urs_host(), "127.0.0.1");

    let query = CatalogQuery::new("C2076090826-LPCLOUD");
    assert!(client.search(&query).unwrap().is_empty());
    assert!(client.search(&query).unwrap().is_empty());
    assert_eq!(client.bearer_token().unwrap().value, "urs-token");

    tokens.assert();
    granules.assert();
}

#[test]
fn default_providers_are_registered() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::new(dir.path().join(".earthdatarc"));
    settings.interactive = false;
    let client = Client::new(settings).unwrap();

    let providers: Vec<&str> = client.provider_cache().providers().collect();
    for id in ["gesdisc", "ghrcdaac", "lpdaac", "ornldaac", "podaac"] {
        assert!(providers.contains(&id), "{id} missing from {providers:?}");
    }
}

#[test]
fn provider_credentials_use_the_urs_token() {
    let mut server = Server::new();
    let _tokens = server
        .mock("GET", "/api/users/tokens")
        .match_header("authorization", "Basic YWxpY2U6cHc=")
        .with_status(200)
        .with_body(r#"[{"access_token":"urs-token","expiration_date":"12/31/2099"}]"#)
        .create();
    let creds = server
        .mock("GET", "/lpdaac/s3credentials")
        .match_header("authorization", "Bearer urs-token")
        .with_status(200)
        .with_body(
            r#"{"accessKeyId":"AK","secretAccessKey":"SK","sessionToken":"ST","expiration":"2099-01-11 19:13:22+00:00"}"#,
        )
        .expect(1)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let secret_file = dir.path().join(".earthdatarc");
    SecretStore::new(&secret_file)
        .provision(&LoginSecret::new("127.0.0.1", "alice", "pw"))
        .unwrap();

    let mut settings = Settings::new(&secret_file);
    settings.urs_url = server.url();
    settings.netrc_file = None;
    settings.interactive = false;
    settings
        .providers
        .insert("lpdaac".to_string(), format!("{}/lpdaac/s3credentials", server.url()));

    let client = Client::new(settings).unwrap();
    let first = client.provider_credentials("lpdaac").unwrap();
    let again = client.provider_credentials("lpdaac").unwrap();
    assert_eq!(first.session_token, "ST");
    assert_eq!(first, again);
    creds.assert();
}
