//! In-process fake server for driving the client over real sockets.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Once};
use std::thread;

use basalt_bson::{Document, read_document};
use basalt_proto::{Header, OpCode, Reply};

/// Routes client logs through the test harness once per binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// What the fake server does with one decoded request.
pub type Responder =
    Arc<dyn Fn(&ParsedRequest) -> Option<Vec<Document>> + Send + Sync + 'static>;

/// A request as the fake server sees it.
pub struct ParsedRequest {
    pub header: Header,
    pub namespace: String,
    pub query: Document,
}

/// Accepts connections and answers queries through the responder.
/// Returning `None` from the responder leaves the request pending
/// forever, which is how tests pile up in-flight messages.
pub struct FakeServer {
    pub address: String,
}

impl FakeServer {
    pub fn start(responder: Responder) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = format!("127.0.0.1:{}", listener.local_addr().expect("addr").port());

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let responder = Arc::clone(&responder);
                thread::spawn(move || serve_connection(stream, responder));
            }
        });

        FakeServer { address }
    }

    /// A server that answers every query with the same documents.
    pub fn with_canned_reply(documents: Vec<Document>) -> FakeServer {
        Self::start(Arc::new(move |_request| Some(documents.clone())))
    }
}

fn serve_connection(mut stream: TcpStream, responder: Responder) {
    loop {
        let Some((header, body)) = read_frame(&mut stream) else {
            return;
        };
        // Writes carry no reply; only queries are answered.
        if header.op_code != OpCode::Query {
            continue;
        }
        let request = ParsedRequest {
            namespace: parse_namespace(&body),
            query: parse_query_document(&body),
            header,
        };
        if let Some(documents) = responder(&request) {
            let reply = Reply::new(request.header.request_id, documents);
            let frame = reply.encode(1).expect("encode reply");
            if stream.write_all(&frame).is_err() {
                return;
            }
        }
    }
}

/// Reads one framed message off the socket.
pub fn read_frame(stream: &mut TcpStream) -> Option<(Header, Vec<u8>)> {
    let mut header_bytes = [0u8; Header::SIZE];
    stream.read_exact(&mut header_bytes).ok()?;
    let header = Header::read(&header_bytes).ok()?;
    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body).ok()?;
    Some((header, body))
}

/// Query body layout: int32 flags, CString namespace, int32 skip, int32
/// numberToReturn, then the query document.
pub fn parse_namespace(body: &[u8]) -> String {
    let nul = body[4..].iter().position(|&b| b == 0).expect("namespace");
    String::from_utf8(body[4..4 + nul].to_vec()).expect("utf8 namespace")
}

pub fn parse_query_document(body: &[u8]) -> Document {
    let nul = body[4..].iter().position(|&b| b == 0).expect("namespace");
    let doc_start = 4 + nul + 1 + 4 + 4;
    let (doc, _) = read_document(&body[doc_start..]).expect("query document");
    doc
}
