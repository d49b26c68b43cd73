//! TCP session tests driven over an in-memory duplex stream: the session
//! task runs exactly as it would over a socket, and the test plays client.

use std::sync::Arc;

use courier_db::{BlobStore, Database};
use courier_server::frame::{read_frame, write_frame};
use courier_server::session::Session;
use tokio::io::{AsyncWriteExt, DuplexStream};

struct TestServer {
    db: Arc<Database>,
    blobs: Arc<BlobStore>,
}

async fn test_server(tag: &str) -> TestServer {
    let dir = std::env::temp_dir().join(format!("courier_session_{tag}_{}", std::process::id()));
    let _ = tokio::fs::remove_dir_all(&dir).await;
    TestServer {
        db: Arc::new(Database::open_in_memory().unwrap()),
        blobs: Arc::new(BlobStore::new(dir).await.unwrap()),
    }
}

impl TestServer {
    fn connect(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = Session::new(self.db.clone(), self.blobs.clone());
        tokio::spawn(session.run(server));
        client
    }
}

/// One request/response cycle.
async fn send(client: &mut DuplexStream, line: &str) -> String {
    write_frame(client, line).await.unwrap();
    read_frame(client).await.unwrap().expect("response frame")
}

#[tokio::test]
async fn commands_before_auth_are_rejected() {
    let server = test_server("gating").await;
    let mut client = server.connect();

    assert_eq!(send(&mut client, "SEND bob hi").await, "ERROR Unauthorized");
    assert_eq!(send(&mut client, "RECEIVE").await, "ERROR Unauthorized");
    assert_eq!(send(&mut client, "LOGOUT").await, "ERROR Unauthorized");

    // Nothing reached the store.
    assert!(server.db.get_user_by_username("bob").unwrap().is_none());
}

#[tokio::test]
async fn register_login_and_token_stability() {
    let server = test_server("auth").await;

    let mut alice = server.connect();
    assert_eq!(send(&mut alice, "REGISTER alice secret").await, "OK");
    let token = server
        .db
        .get_user_by_username("alice")
        .unwrap()
        .unwrap()
        .auth_token;

    // Second registration under the same name fails, store keeps one user.
    let mut dupe = server.connect();
    assert_eq!(send(&mut dupe, "REGISTER alice other").await, "ERROR UserExists");

    let mut login = server.connect();
    assert_eq!(
        send(&mut login, "LOGIN alice wrong").await,
        "ERROR IncorrectPassword"
    );
    assert_eq!(
        send(&mut login, "LOGIN nobody secret").await,
        "ERROR UserNotFound"
    );
    assert_eq!(send(&mut login, "LOGIN alice secret").await, "OK");

    // Login reuses the token issued at registration.
    let after = server
        .db
        .get_user_by_username("alice")
        .unwrap()
        .unwrap()
        .auth_token;
    assert_eq!(token, after);

    // The freshly logged-in session is authenticated.
    assert_eq!(send(&mut login, "RECEIVE").await, "OK 0");
}

#[tokio::test]
async fn message_round_trip_and_receive_idempotence() {
    let server = test_server("roundtrip").await;

    let mut alice = server.connect();
    let mut bob = server.connect();
    assert_eq!(send(&mut alice, "REGISTER alice pw").await, "OK");
    assert_eq!(send(&mut bob, "REGISTER bob pw").await, "OK");

    assert_eq!(send(&mut alice, "SEND bob hi there").await, "OK");
    assert_eq!(
        send(&mut alice, "SEND carol hi").await,
        "ERROR RecipientNotFound"
    );

    assert_eq!(send(&mut bob, "RECEIVE").await, "OK 1");
    assert_eq!(
        read_frame(&mut bob).await.unwrap().as_deref(),
        Some("alice hi there")
    );

    // No delivery-once semantics: a second RECEIVE returns the same set.
    assert_eq!(send(&mut bob, "RECEIVE").await, "OK 1");
    assert_eq!(
        read_frame(&mut bob).await.unwrap().as_deref(),
        Some("alice hi there")
    );
}

#[tokio::test]
async fn unknown_command_does_not_end_the_session() {
    let server = test_server("unknown").await;
    let mut client = server.connect();

    assert_eq!(send(&mut client, "REGISTER alice pw").await, "OK");
    assert_eq!(send(&mut client, "PING now").await, "ERROR UnknownCommand");
    // REGISTER/LOGIN are not recognized once authenticated.
    assert_eq!(
        send(&mut client, "REGISTER other pw").await,
        "ERROR UnknownCommand"
    );
    assert_eq!(send(&mut client, "RECEIVE").await, "OK 0");
}

#[tokio::test]
async fn logout_ends_the_session() {
    let server = test_server("logout").await;
    let mut client = server.connect();

    assert_eq!(send(&mut client, "REGISTER alice pw").await, "OK");
    assert_eq!(send(&mut client, "LOGOUT").await, "OK");

    // The session loop has ended; the server half is gone.
    assert_eq!(read_frame(&mut client).await.unwrap(), None);
}

#[tokio::test]
async fn file_body_is_persisted_and_linked() {
    let server = test_server("file").await;

    let mut alice = server.connect();
    let mut bob = server.connect();
    assert_eq!(send(&mut alice, "REGISTER alice pw").await, "OK");
    assert_eq!(send(&mut bob, "REGISTER bob pw").await, "OK");

    // 10000 bytes forces multiple 4 KiB blocks.
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    write_frame(&mut alice, "FILE bob data.bin 10000 fresh numbers")
        .await
        .unwrap();
    alice.write_all(&body).await.unwrap();
    assert_eq!(
        read_frame(&mut alice).await.unwrap().as_deref(),
        Some("OK")
    );

    let bob_row = server.db.get_user_by_username("bob").unwrap().unwrap();
    let inbox = server.db.get_messages_for_recipient(&bob_row.id).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].text, "fresh numbers");

    let file_id = inbox[0].attached_file_id.clone().expect("attached file");
    let file = server.db.get_file_by_id(&file_id).unwrap().unwrap();
    assert_eq!(file.file_name, "data.bin");
    assert_eq!(server.blobs.read(&file_id).await.unwrap(), body);

    // The message is visible over RECEIVE like any other.
    assert_eq!(send(&mut bob, "RECEIVE").await, "OK 1");
    assert_eq!(
        read_frame(&mut bob).await.unwrap().as_deref(),
        Some("alice fresh numbers")
    );
}

#[tokio::test]
async fn truncated_file_body_fails_the_transfer() {
    let server = test_server("truncated").await;

    let mut alice = server.connect();
    let mut bob = server.connect();
    assert_eq!(send(&mut alice, "REGISTER alice pw").await, "OK");
    assert_eq!(send(&mut bob, "REGISTER bob pw").await, "OK");

    write_frame(&mut alice, "FILE bob data.bin 1000 incoming")
        .await
        .unwrap();
    alice.write_all(&[0xAB; 100]).await.unwrap();
    alice.shutdown().await.unwrap();

    assert_eq!(
        read_frame(&mut alice).await.unwrap().as_deref(),
        Some("ERROR FileWriteFailure")
    );

    // No message, no file record, no blob.
    let bob_row = server.db.get_user_by_username("bob").unwrap().unwrap();
    assert!(
        server
            .db
            .get_messages_for_recipient(&bob_row.id)
            .unwrap()
            .is_empty()
    );
}
