//! In-process stub server speaking just enough of the wire protocol to
//! exercise the client end to end: greeting, chap-sha1 verification, canned
//! schema metadata, and per-test request handlers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rmpv::Value;
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tuplebox_protocol::consts::{keys, system_spaces};
use tuplebox_protocol::{Decoder, Frame, Header, RequestType};

/// Password the stub accepts for any user.
pub const STUB_PASSWORD: &str = "password";

/// The one user space the stub advertises, named "test".
pub const TEST_SPACE_ID: u32 = 512;

/// What the per-test handler wants done with a request.
#[allow(dead_code)]
pub enum StubAction {
    /// Respond OK with the given data rows.
    Reply(Vec<Value>),
    /// Respond OK after a delay, from a detached task.
    DelayedReply { delay: Duration, rows: Vec<Value> },
    /// Respond with a server error.
    ServerError { code: u32, message: String },
    /// Never respond.
    Silence,
}

pub type Handler = Arc<dyn Fn(&Frame) -> StubAction + Send + Sync>;

pub struct StubServer {
    pub addr: SocketAddr,
}

/// Starts a stub accepting any number of connections, each served with the
/// same handler for requests the stub does not answer itself (auth, ping,
/// and system-space selects are built in).
pub async fn spawn_stub(handler: Handler) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(serve_connection(stream, handler.clone()));
        }
    });
    StubServer { addr }
}

async fn serve_connection(stream: TcpStream, handler: Handler) {
    let salt = [0u8; 32];
    let (mut read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    if writer
        .lock()
        .await
        .write_all(&build_greeting(&salt))
        .await
        .is_err()
    {
        return;
    }

    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; 4096];
    loop {
        loop {
            match decoder.decode_frame() {
                Ok(Some(frame)) => handle_frame(frame, &handler, &writer, &salt).await,
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => decoder.extend(&buf[..n]),
        }
    }
}

async fn handle_frame(
    frame: Frame,
    handler: &Handler,
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    salt: &[u8; 32],
) {
    let sync = frame.header.sync;
    let code = frame.header.code;

    if code == RequestType::Auth.code() {
        let response = if auth_valid(&frame, salt) {
            ok_response(sync, None)
        } else {
            error_response(sync, 47, "authentication failed")
        };
        let _ = writer.lock().await.write_all(&response).await;
        return;
    }
    if code == RequestType::Ping.code() {
        let _ = writer.lock().await.write_all(&ok_response(sync, None)).await;
        return;
    }
    if code == RequestType::Select.code() {
        let space = body_field(&frame, keys::SPACE_ID).and_then(Value::as_u64);
        if space == Some(system_spaces::VSPACE_ID as u64) {
            let response = ok_response(sync, Some(vspace_rows()));
            let _ = writer.lock().await.write_all(&response).await;
            return;
        }
        if space == Some(system_spaces::VINDEX_ID as u64) {
            let response = ok_response(sync, Some(vindex_rows()));
            let _ = writer.lock().await.write_all(&response).await;
            return;
        }
    }

    match (handler.as_ref())(&frame) {
        StubAction::Reply(rows) => {
            let _ = writer
                .lock()
                .await
                .write_all(&ok_response(sync, Some(rows)))
                .await;
        }
        StubAction::DelayedReply { delay, rows } => {
            let writer = writer.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = writer
                    .lock()
                    .await
                    .write_all(&ok_response(sync, Some(rows)))
                    .await;
            });
        }
        StubAction::ServerError { code, message } => {
            let _ = writer
                .lock()
                .await
                .write_all(&error_response(sync, code, &message))
                .await;
        }
        StubAction::Silence => {}
    }
}

fn build_greeting(salt: &[u8; 32]) -> Vec<u8> {
    let mut raw = vec![b' '; 128];
    let banner = "Tarantool 2.11.0 (Binary) stub-instance";
    raw[..banner.len()].copy_from_slice(banner.as_bytes());
    raw[63] = b'\n';
    let encoded = BASE64.encode(salt);
    raw[64..64 + encoded.len()].copy_from_slice(encoded.as_bytes());
    raw[127] = b'\n';
    raw
}

fn auth_valid(frame: &Frame, salt: &[u8; 32]) -> bool {
    let scramble = body_field(frame, keys::TUPLE)
        .and_then(Value::as_array)
        .and_then(|tuple| tuple.get(1))
        .and_then(|part| match part {
            Value::Binary(bytes) => Some(bytes.clone()),
            _ => None,
        });
    scramble.as_deref() == Some(&expected_scramble(STUB_PASSWORD, &salt[..20])[..])
}

fn expected_scramble(password: &str, salt20: &[u8]) -> [u8; 20] {
    let step1 = Sha1::digest(password.as_bytes());
    let step2 = Sha1::digest(&step1[..]);
    let mut hasher = Sha1::new();
    hasher.update(salt20);
    hasher.update(&step2[..]);
    let step3 = hasher.finalize();

    let mut scramble = [0u8; 20];
    for i in 0..20 {
        scramble[i] = step1[i] ^ step3[i];
    }
    scramble
}

/// Looks up a body map entry by its integer key.
pub fn body_field(frame: &Frame, key: u64) -> Option<&Value> {
    frame
        .body
        .as_map()?
        .iter()
        .find(|(entry_key, _)| entry_key.as_u64() == Some(key))
        .map(|(_, entry)| entry)
}

fn ok_response(sync: u64, rows: Option<Vec<Value>>) -> Vec<u8> {
    let body = match rows {
        Some(rows) => Value::Map(vec![(Value::from(keys::DATA), Value::Array(rows))]),
        None => Value::Map(Vec::new()),
    };
    let header = Header {
        code: 0,
        sync,
        schema_version: Some(1),
    };
    Frame::new(header, body).encode().unwrap().to_vec()
}

fn error_response(sync: u64, code: u32, message: &str) -> Vec<u8> {
    let header = Header {
        code: 0x8000 | code,
        sync,
        schema_version: Some(1),
    };
    let body = Value::Map(vec![(Value::from(keys::ERROR), Value::from(message))]);
    Frame::new(header, body).encode().unwrap().to_vec()
}

fn vspace_rows() -> Vec<Value> {
    vec![Value::Array(vec![
        Value::from(TEST_SPACE_ID),
        Value::from(1u8),
        Value::from("test"),
        Value::from("memtx"),
        Value::from(2u8),
        Value::Map(Vec::new()),
        Value::Array(vec![
            Value::Map(vec![
                (Value::from("name"), Value::from("id")),
                (Value::from("type"), Value::from("unsigned")),
            ]),
            Value::Map(vec![
                (Value::from("name"), Value::from("value")),
                (Value::from("type"), Value::from("string")),
            ]),
        ]),
    ])]
}

fn vindex_rows() -> Vec<Value> {
    vec![
        Value::Array(vec![
            Value::from(TEST_SPACE_ID),
            Value::from(0u8),
            Value::from("primary"),
            Value::from("tree"),
            Value::Map(vec![(Value::from("unique"), Value::Boolean(true))]),
            Value::Array(vec![Value::Array(vec![
                Value::from(0u8),
                Value::from("unsigned"),
            ])]),
        ]),
        Value::Array(vec![
            Value::from(TEST_SPACE_ID),
            Value::from(1u8),
            Value::from("by_value"),
            Value::from("hash"),
            Value::Map(vec![(Value::from("unique"), Value::Boolean(true))]),
            Value::Array(vec![Value::Array(vec![
                Value::from(1u8),
                Value::from("string"),
            ])]),
        ]),
        Value::Array(vec![
            Value::from(TEST_SPACE_ID),
            Value::from(2u8),
            Value::from("pair"),
            Value::from("hash"),
            Value::Map(vec![(Value::from("unique"), Value::Boolean(true))]),
            Value::Array(vec![
                Value::Array(vec![Value::from(0u8), Value::from("unsigned")]),
                Value::Array(vec![Value::from(1u8), Value::from("string")]),
            ]),
        ]),
    ]
}
