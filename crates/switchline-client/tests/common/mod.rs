//! A minimal in-process exchange for end-to-end tests.
//!
//! Speaks the server side of the wire protocol over TCP: registrations,
//! call routing (RING / ANSWER / CONNECTED / BUSY), MSG and HANGUP
//! forwarding, and heartbeat acks. Just enough routing to drive two real
//! client engines against each other.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use switchline_protocol::{ClientFrame, ContentType, ServerFrame, decode_frame, encode_frame};

/// Behavior knobs for the test exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    /// Answer `HEARTBEAT` with `HEARTBEAT_ACK`.
    pub ack_heartbeats: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            ack_heartbeats: true,
        }
    }
}

struct CallRecord {
    caller: u64,
    callee: u64,
    to: String,
}

#[derive(Default)]
struct ExchangeState {
    next_conn: u64,
    next_call: u64,
    conns: HashMap<u64, mpsc::UnboundedSender<ServerFrame>>,
    conn_addresses: HashMap<u64, String>,
    endpoints: HashMap<String, u64>,
    calls: HashMap<String, CallRecord>,
    conn_tasks: Vec<JoinHandle<()>>,
}

/// Handle to a running test exchange.
pub struct MiniExchange {
    addr: SocketAddr,
    state: Arc<Mutex<ExchangeState>>,
    accept_task: JoinHandle<()>,
}

impl MiniExchange {
    pub async fn start() -> Self {
        Self::start_with(ExchangeOptions::default()).await
    }

    pub async fn start_with(options: ExchangeOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test exchange");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(ExchangeState::default()));

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let conn_id = {
                    let mut st = accept_state.lock().unwrap();
                    st.next_conn += 1;
                    st.next_conn
                };
                let conn_state = accept_state.clone();
                let conn_options = options.clone();
                let task = tokio::spawn(async move {
                    handle_conn(stream, conn_id, conn_state, conn_options).await;
                });
                accept_state.lock().unwrap().conn_tasks.push(task);
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// Exchange URL for client engines.
    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Severs every live connection, as if the network dropped. The
    /// listener keeps accepting, so clients can reconnect.
    pub fn drop_connections(&self) {
        let mut st = self.state.lock().unwrap();
        for task in st.conn_tasks.drain(..) {
            task.abort();
        }
        st.conns.clear();
        st.conn_addresses.clear();
        st.endpoints.clear();
        st.calls.clear();
    }
}

impl Drop for MiniExchange {
    fn drop(&mut self) {
        self.accept_task.abort();
        let mut st = self.state.lock().unwrap();
        for task in st.conn_tasks.drain(..) {
            task.abort();
        }
    }
}

async fn handle_conn(
    stream: TcpStream,
    conn_id: u64,
    state: Arc<Mutex<ExchangeState>>,
    options: ExchangeOptions,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    state.lock().unwrap().conns.insert(conn_id, out_tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let json = frame.to_json().expect("encode server frame");
            let bytes = encode_frame(json.as_bytes()).expect("frame server frame");
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut pending = Vec::new();
    let mut chunk = [0u8; 8192];
    'conn: loop {
        match read_half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                loop {
                    match decode_frame(&pending) {
                        Ok(Some((payload, consumed))) => {
                            pending.drain(..consumed);
                            let Ok(text) = String::from_utf8(payload) else {
                                break 'conn;
                            };
                            let Ok(frame) = ClientFrame::from_json(&text) else {
                                break 'conn;
                            };
                            handle_frame(conn_id, frame, &state, &options);
                        }
                        Ok(None) => break,
                        Err(_) => break 'conn,
                    }
                }
            }
        }
    }

    writer.abort();
    cleanup_conn(conn_id, &state);
}

fn handle_frame(
    conn_id: u64,
    frame: ClientFrame,
    state: &Arc<Mutex<ExchangeState>>,
    options: &ExchangeOptions,
) {
    let mut st = state.lock().unwrap();
    match frame {
        ClientFrame::Register { address, .. } => {
            st.endpoints.insert(address.clone(), conn_id);
            st.conn_addresses.insert(conn_id, address.clone());
            send_to(&st, conn_id, ServerFrame::Registered {
                address: Some(address),
            });
        }
        ClientFrame::Unregister { address } => {
            if st.endpoints.get(&address) == Some(&conn_id) {
                st.endpoints.remove(&address);
            }
        }
        ClientFrame::Heartbeat => {
            if options.ack_heartbeats {
                send_to(&st, conn_id, ServerFrame::HeartbeatAck {
                    timestamp: Some(1),
                });
            }
        }
        ClientFrame::Dial { to, metadata } => match st.endpoints.get(&to).copied() {
            Some(callee) => {
                st.next_call += 1;
                let call_id = format!("call-{}", st.next_call);
                st.calls.insert(call_id.clone(), CallRecord {
                    caller: conn_id,
                    callee,
                    to,
                });
                let from = st
                    .conn_addresses
                    .get(&conn_id)
                    .cloned()
                    .unwrap_or_else(|| "guest@example.com".to_string());
                send_to(&st, callee, ServerFrame::Ring {
                    call_id,
                    from,
                    metadata,
                });
            }
            None => {
                send_to(&st, conn_id, ServerFrame::Busy {
                    to: Some(to),
                    reason: Some("offline".to_string()),
                });
            }
        },
        ClientFrame::Answer { call_id } => {
            if let Some(record) = st.calls.get(&call_id) {
                let caller = record.caller;
                let to = record.to.clone();
                send_to(&st, caller, ServerFrame::Connected {
                    call_id,
                    to: Some(to),
                });
            }
        }
        ClientFrame::Hangup { call_id, reason } => {
            if let Some(record) = st.calls.remove(&call_id) {
                let peer = if record.caller == conn_id {
                    record.callee
                } else {
                    record.caller
                };
                send_to(&st, peer, ServerFrame::Hangup { call_id, reason });
            }
        }
        ClientFrame::Msg {
            call_id,
            data,
            content_type,
        } => {
            if let Some(record) = st.calls.get(&call_id) {
                let peer = if record.caller == conn_id {
                    record.callee
                } else {
                    record.caller
                };
                send_to(&st, peer, ServerFrame::Msg {
                    call_id,
                    data: serde_json::Value::String(data),
                    content_type: Some(content_type_str(content_type).to_string()),
                });
            }
        }
    }
}

fn send_to(st: &ExchangeState, conn_id: u64, frame: ServerFrame) {
    if let Some(tx) = st.conns.get(&conn_id) {
        let _ = tx.send(frame);
    }
}

fn content_type_str(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Text => "text",
        ContentType::Structured => "structured",
        ContentType::Binary => "binary",
    }
}

fn cleanup_conn(conn_id: u64, state: &Arc<Mutex<ExchangeState>>) {
    let mut st = state.lock().unwrap();
    st.conns.remove(&conn_id);
    st.conn_addresses.remove(&conn_id);
    st.endpoints.retain(|_, owner| *owner != conn_id);

    let affected: Vec<(String, u64)> = st
        .calls
        .iter()
        .filter(|(_, record)| record.caller == conn_id || record.callee == conn_id)
        .map(|(call_id, record)| {
            let peer = if record.caller == conn_id {
                record.callee
            } else {
                record.caller
            };
            (call_id.clone(), peer)
        })
        .collect();
    for (call_id, peer) in affected {
        st.calls.remove(&call_id);
        send_to(&st, peer, ServerFrame::Hangup {
            call_id,
            reason: Some("peer-disconnected".to_string()),
        });
    }
}
