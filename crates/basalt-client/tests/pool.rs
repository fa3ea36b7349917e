//! Pick-ladder and pool-lifecycle behavior against in-process servers.

mod common;

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use basalt_bson::{Value, doc};
use basalt_client::{Client, ClusterKind, Config, Error, ReadPreference};
use basalt_proto::Query;
use common::{FakeServer, init_tracing};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config(address: &str) -> Config {
    Config {
        seeds: vec![address.to_string()],
        cluster_kind: ClusterKind::Standalone,
        read_timeout: Duration::from_millis(300),
        probe_interval: Duration::from_secs(3600),
        ..Config::default()
    }
}

fn query(marker: i32) -> Query {
    Query::new(
        "test",
        "coll",
        doc! { "marker": marker },
        ReadPreference::primary(),
    )
}

/// A responder that answers only queries carrying `answer: true` and
/// leaves everything else pending.
fn selective_server() -> FakeServer {
    FakeServer::start(Arc::new(|request| {
        if request.query.contains("answer") {
            Some(vec![doc! { "ok": 1i32 }])
        } else {
            None
        }
    }))
}

fn answerable_query() -> Query {
    Query::new(
        "test",
        "coll",
        doc! { "answer": true },
        ReadPreference::primary(),
    )
}

#[test]
fn first_send_grows_the_pool_from_zero() {
    init_tracing();
    let server = FakeServer::with_canned_reply(vec![doc! { "ok": 1i32 }]);
    let client = Client::new(test_config(&server.address));
    assert_eq!(client.connection_count(), 0);

    let (tx, rx) = mpsc::channel();
    client
        .send(
            &query(1),
            Some(Box::new(move |result| tx.send(result).unwrap())),
        )
        .expect("send");
    assert_eq!(client.connection_count(), 1);
    assert!(rx.recv_timeout(RECV_TIMEOUT).expect("caller").is_ok());
    client.close();
}

#[test]
fn busy_connection_triggers_growth_and_the_new_one_answers() {
    init_tracing();
    let server = selective_server();
    let mut config = test_config(&server.address);
    config.max_connections = 1;
    let client = Client::new(config);

    // Two hanging requests pile up on the only allowed connection.
    client.send(&query(1), Some(Box::new(|_| {}))).expect("send");
    client.send(&query(2), Some(Box::new(|_| {}))).expect("send");
    assert_eq!(client.connection_count(), 1);

    // Raising the cap lets the ladder grow instead of queueing behind
    // the busy connection; the new connection is idle and answers.
    client.set_max_connections(3);
    let (tx, rx) = mpsc::channel();
    client
        .send(
            &answerable_query(),
            Some(Box::new(move |result| tx.send(result).unwrap())),
        )
        .expect("send");
    assert_eq!(client.connection_count(), 2);
    assert!(rx.recv_timeout(RECV_TIMEOUT).expect("caller").is_ok());
    client.close();
}

#[test]
fn pool_converges_after_the_cap_drops() {
    init_tracing();
    let server = selective_server();
    let client = Client::new(test_config(&server.address));

    // Grow to three connections with hanging requests.
    for at in 0..3 {
        client.send(&query(at), Some(Box::new(|_| {}))).expect("send");
    }
    assert_eq!(client.connection_count(), 3);

    client.set_max_connections(1);
    let (tx, rx) = mpsc::channel();
    client
        .send(
            &answerable_query(),
            Some(Box::new(move |result| tx.send(result).unwrap())),
        )
        .expect("send");

    // One send cycle is enough to converge under the new cap.
    assert!(client.connection_count() <= 1);
    assert!(rx.recv_timeout(RECV_TIMEOUT).expect("caller").is_ok());
    client.close();
}

#[test]
fn unreachable_seed_cannot_connect() {
    init_tracing();
    // A bound-then-dropped listener guarantees a dead port.
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        format!("127.0.0.1:{}", listener.local_addr().expect("addr").port())
    };
    let mut config = test_config(&dead);
    config.connect_timeout = Duration::from_millis(200);
    let client = Client::new(config);

    let result = client.send(&query(1), None);
    assert!(matches!(result, Err(Error::CannotConnect(_)) | Err(Error::Io(_))));
    client.close();
}

#[test]
fn close_interrupts_pending_callbacks_within_the_grace_period() {
    init_tracing();
    let server = selective_server();
    let client = Client::new(test_config(&server.address));

    let (tx, rx) = mpsc::channel();
    client
        .send(
            &query(1),
            Some(Box::new(move |result| tx.send(result).unwrap())),
        )
        .expect("send");

    client.close();
    let result = rx.recv_timeout(RECV_TIMEOUT).expect("caller");
    assert!(matches!(result, Err(Error::Interrupted)));

    // The client refuses work after close; close stays idempotent.
    assert!(client.send(&query(2), None).is_err());
    client.close();
}

#[test]
fn probe_updates_server_state_and_discovers_members() {
    init_tracing();
    let server = FakeServer::start(Arc::new(|request| {
        if request.query.contains("ismaster") {
            Some(vec![doc! {
                "ismaster": true,
                "ok": 1i32,
                "maxBsonObjectSize": 1_048_576i32,
                "maxWriteBatchSize": 250i32,
                "hosts": vec!["db-b:27017", "db-c:27017"],
            }])
        } else {
            Some(vec![doc! { "ok": 1i32 }])
        }
    }));
    let client = Client::new(test_config(&server.address));

    // Open a connection, then probe it.
    let (tx, rx) = mpsc::channel();
    client
        .send(
            &query(1),
            Some(Box::new(move |result| tx.send(result).unwrap())),
        )
        .expect("send");
    rx.recv_timeout(RECV_TIMEOUT).expect("caller").expect("ok");

    client.probe();
    // Probe replies arrive on the reader thread; wait for the state to
    // settle.
    let deadline = std::time::Instant::now() + RECV_TIMEOUT;
    let seeded = client.cluster().servers()[0].clone();
    while seeded.max_batched_writes() != 250 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert!(seeded.is_writable());
    assert_eq!(seeded.max_document_size(), 1_048_576);
    assert_eq!(seeded.max_batched_writes(), 250);
    assert_eq!(client.cluster().servers().len(), 3);
    assert!(client.cluster().find("db-b:27017").is_some());
    client.close();
}

#[test]
fn secondary_reads_require_an_eligible_server() {
    init_tracing();
    // The lone server reports itself read-only; a primary read must not
    // pick it once its role is known.
    let server = FakeServer::start(Arc::new(|request| {
        if request.query.contains("ismaster") {
            Some(vec![doc! { "ismaster": false, "secondary": true, "ok": 1i32 }])
        } else {
            Some(vec![doc! { "ok": 1i32, "values": Value::from(vec![1i32]) }])
        }
    }));
    let mut config = test_config(&server.address);
    // Cap the pool so the ladder cannot sidestep eligibility by growing.
    config.max_connections = 1;
    let client = Client::new(config);

    // Bootstrap a connection and let the probe mark it read-only.
    client.send(&query(1), None).expect("send");
    client.probe();
    let seeded = client.cluster().servers()[0].clone();
    let deadline = std::time::Instant::now() + RECV_TIMEOUT;
    while seeded.role() == basalt_client::Role::Unknown
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(seeded.role(), basalt_client::Role::ReadOnly);

    // A secondary read is eligible.
    let read = Query::new("test", "coll", doc! {}, ReadPreference::secondary());
    let (tx, rx) = mpsc::channel();
    client
        .send(&read, Some(Box::new(move |result| tx.send(result).unwrap())))
        .expect("send");
    assert!(rx.recv_timeout(RECV_TIMEOUT).expect("caller").is_ok());

    // A primary read is not: the ladder finds no writable server.
    assert!(client.send(&query(2), None).is_err());
    client.close();
}
