//! Reply-correlation behavior of a single connection, driven over real
//! sockets against a hand-rolled server side.

mod common;

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::Duration;

use basalt_bson::doc;
use basalt_client::{Cluster, ClusterKind, Connection, ConnectionEvent, Error, ReadPreference};
use basalt_proto::{Query, Reply};
use common::read_frame;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a raw (listener, connection) pair with the accepted socket on
/// the test's side of the wire.
fn raw_pair() -> (TcpStream, Connection) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = format!("127.0.0.1:{}", listener.local_addr().expect("addr").port());

    let cluster = Cluster::new(ClusterKind::Standalone);
    let server = cluster.add(&address);
    let stream = TcpStream::connect(&address).expect("connect");
    let connection = Connection::open(stream, server).expect("open");

    let (accepted, _) = listener.accept().expect("accept");
    (accepted, connection)
}

fn query(marker: i32) -> Query {
    Query::new(
        "test",
        "coll",
        doc! { "marker": marker },
        ReadPreference::primary(),
    )
}

#[test]
fn out_of_order_replies_reach_the_right_callers() {
    let (mut accepted, connection) = raw_pair();

    let (tx1, rx1) = mpsc::channel();
    let (tx2, rx2) = mpsc::channel();
    connection.send(
        &query(1),
        Some(Box::new(move |result| tx1.send(result).unwrap())),
    );
    connection.send(
        &query(2),
        Some(Box::new(move |result| tx2.send(result).unwrap())),
    );

    let (first_header, _) = read_frame(&mut accepted).expect("first frame");
    let (second_header, _) = read_frame(&mut accepted).expect("second frame");
    assert_ne!(first_header.request_id, second_header.request_id);

    // Answer the second request first.
    let reply = Reply::new(second_header.request_id, vec![doc! { "marker": 2i32 }]);
    accepted
        .write_all(&reply.encode(1).expect("encode"))
        .expect("write");

    let second = rx2.recv_timeout(RECV_TIMEOUT).expect("second caller");
    assert_eq!(
        second.expect("reply").documents[0],
        doc! { "marker": 2i32 }
    );
    // The first caller is still waiting.
    assert!(rx1.try_recv().is_err());
    assert_eq!(connection.pending_count(), 1);

    let reply = Reply::new(first_header.request_id, vec![doc! { "marker": 1i32 }]);
    accepted
        .write_all(&reply.encode(2).expect("encode"))
        .expect("write");
    let first = rx1.recv_timeout(RECV_TIMEOUT).expect("first caller");
    assert_eq!(first.expect("reply").documents[0], doc! { "marker": 1i32 });
    assert_eq!(connection.pending_count(), 0);
}

#[test]
fn request_ids_are_distinct_and_non_zero() {
    let (mut accepted, connection) = raw_pair();

    let mut seen = Vec::new();
    for at in 0..10 {
        connection.send(&query(at), None);
    }
    for _ in 0..10 {
        let (header, _) = read_frame(&mut accepted).expect("frame");
        assert_ne!(header.request_id, 0);
        assert!(!seen.contains(&header.request_id));
        seen.push(header.request_id);
    }
}

#[test]
fn orphan_replies_are_counted_and_dropped() {
    let (mut accepted, connection) = raw_pair();

    let (tx, rx) = mpsc::channel();
    connection.send(
        &query(1),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );
    let (header, _) = read_frame(&mut accepted).expect("frame");

    // A reply for a request nobody made.
    let orphan = Reply::new(header.request_id.wrapping_add(1000), vec![]);
    accepted
        .write_all(&orphan.encode(1).expect("encode"))
        .expect("write");

    // The real reply still lands after the orphan.
    let reply = Reply::new(header.request_id, vec![doc! { "ok": 1i32 }]);
    accepted
        .write_all(&reply.encode(2).expect("encode"))
        .expect("write");

    assert!(rx.recv_timeout(RECV_TIMEOUT).expect("caller").is_ok());
    assert_eq!(connection.orphan_count(), 1);
    assert!(connection.is_open());
}

#[test]
fn abrupt_close_fails_pending_with_connection_lost() {
    let (mut accepted, connection) = raw_pair();

    let (tx, rx) = mpsc::channel();
    connection.send(
        &query(1),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );
    let _ = read_frame(&mut accepted);

    let events = connection.subscribe();
    drop(accepted);

    let result = rx.recv_timeout(RECV_TIMEOUT).expect("caller");
    assert!(matches!(result, Err(Error::ConnectionLost(_))));
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).expect("event"),
        ConnectionEvent::Closed
    );
    assert!(!connection.is_open());
    assert!(connection.wait_for_closed(RECV_TIMEOUT));
}

#[test]
fn garbage_frame_terminates_with_decode_failure() {
    let (mut accepted, connection) = raw_pair();

    let (tx, rx) = mpsc::channel();
    connection.send(
        &query(1),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );
    let _ = read_frame(&mut accepted);

    // A header with an op code outside the protocol.
    let mut bad = Vec::new();
    bad.extend_from_slice(&16i32.to_le_bytes());
    bad.extend_from_slice(&1i32.to_le_bytes());
    bad.extend_from_slice(&0i32.to_le_bytes());
    bad.extend_from_slice(&999i32.to_le_bytes());
    accepted.write_all(&bad).expect("write");

    let result = rx.recv_timeout(RECV_TIMEOUT).expect("caller");
    assert!(matches!(result, Err(Error::Decode(_))));
    assert!(!connection.is_open());
}

#[test]
fn send_after_close_fails_immediately() {
    let (_accepted, connection) = raw_pair();
    connection.close();

    let (tx, rx) = mpsc::channel();
    connection.send(
        &query(1),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );
    let result = rx.recv_timeout(RECV_TIMEOUT).expect("caller");
    assert!(matches!(result, Err(Error::ConnectionLost(_))));
}

#[test]
fn shutdown_drains_in_flight_replies_then_closes() {
    let (mut accepted, connection) = raw_pair();

    let (tx, rx) = mpsc::channel();
    connection.send(
        &query(1),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );
    let (header, _) = read_frame(&mut accepted).expect("frame");

    connection.shutdown();
    assert!(connection.is_open());

    // New messages are refused while draining.
    let (tx2, rx2) = mpsc::channel();
    connection.send(
        &query(2),
        Some(Box::new(move |result| tx2.send(result).unwrap())),
    );
    assert!(matches!(
        rx2.recv_timeout(RECV_TIMEOUT).expect("refused"),
        Err(Error::ConnectionLost(_))
    ));

    // The in-flight reply still lands, then the connection closes.
    let reply = Reply::new(header.request_id, vec![doc! { "ok": 1i32 }]);
    accepted
        .write_all(&reply.encode(1).expect("encode"))
        .expect("write");
    assert!(rx.recv_timeout(RECV_TIMEOUT).expect("caller").is_ok());
    assert!(connection.wait_for_closed(RECV_TIMEOUT));
    assert!(!connection.is_open());
}

#[test]
fn replies_update_the_latency_average() {
    let (mut accepted, connection) = raw_pair();
    assert_eq!(connection.server().average_latency_millis(), f64::MAX);

    let (tx, rx) = mpsc::channel();
    connection.send(
        &query(1),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );
    let (header, _) = read_frame(&mut accepted).expect("frame");
    let reply = Reply::new(header.request_id, vec![doc! { "ok": 1i32 }]);
    accepted
        .write_all(&reply.encode(1).expect("encode"))
        .expect("write");
    rx.recv_timeout(RECV_TIMEOUT).expect("caller").expect("ok");

    let latency = connection.server().average_latency_millis();
    assert!(latency < f64::MAX);
    assert!(latency >= 0.0);
}

#[test]
fn oversize_documents_fail_before_the_wire() {
    let (mut accepted, connection) = raw_pair();

    // Shrink the server's cap, then try to exceed it.
    connection
        .server()
        .update(&doc! { "ismaster": true, "maxBsonObjectSize": 64i32 });

    let (tx, rx) = mpsc::channel();
    connection.send(
        &query_with_payload(128),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );
    let result = rx.recv_timeout(RECV_TIMEOUT).expect("caller");
    assert!(matches!(result, Err(Error::DocumentTooLarge { .. })));
    assert_eq!(connection.pending_count(), 0);

    // Nothing went out: the next frame the server sees is a fresh query.
    connection.send(&query(7), None);
    let (_, body) = read_frame(&mut accepted).expect("frame");
    let doc = common::parse_query_document(&body);
    assert_eq!(doc, doc! { "marker": 7i32 });
}

fn query_with_payload(len: usize) -> Query {
    Query::new(
        "test",
        "coll",
        doc! { "payload": "x".repeat(len) },
        ReadPreference::primary(),
    )
}

#[test]
fn pair_sends_share_one_connection_and_answer_the_second() {
    let (mut accepted, connection) = raw_pair();

    let (tx, rx) = mpsc::channel();
    connection.send_pair(
        &query(1),
        &query(2),
        Some(Box::new(move |result| tx.send(result).unwrap())),
    );

    let (first, _) = read_frame(&mut accepted).expect("first");
    let (second, _) = read_frame(&mut accepted).expect("second");

    // Only the second request has a waiting callback.
    assert_eq!(connection.pending_count(), 1);
    let reply = Reply::new(first.request_id, vec![]);
    accepted
        .write_all(&reply.encode(1).expect("encode"))
        .expect("write");
    // That reply is an orphan; the callback still waits.
    assert!(rx.try_recv().is_err());

    let reply = Reply::new(second.request_id, vec![doc! { "ok": 1i32 }]);
    accepted
        .write_all(&reply.encode(2).expect("encode"))
        .expect("write");
    assert!(rx.recv_timeout(RECV_TIMEOUT).expect("caller").is_ok());
}
