//! A client for the OVSDB management protocol (RFC 7047), spoken as JSON-RPC over a stream.
//!
//! Requests are multiplexed over a single connection that is (re-)established lazily. Server
//! `echo` keepalives are answered from the connection task. A request that is not answered in
//! time fails, and the connection it was sent on is abandoned.

use crate::{
    client::{Condition, Error, Operation, Result},
    model::{decode_uuid, Row},
    Client,
};
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
    time,
};
use tracing::{debug, info, trace, warn, Instrument};

pub const DATABASE: &str = "OVN_Northbound";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

pub struct JsonRpcClient {
    endpoint: Endpoint,
    timeout: Duration,
    conn: tokio::sync::Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

#[derive(Clone, Debug)]
struct Connection {
    tx: mpsc::UnboundedSender<Value>,
    pending: Pending,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

#[derive(Debug)]
struct Response {
    result: Value,
    error: Value,
}

// === impl Endpoint ===

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("tcp", addr)) if addr.contains(':') => Ok(Self::Tcp(addr.to_string())),
            Some(("unix", path)) if !path.is_empty() => Ok(Self::Unix(path.into())),
            _ => Err(Error::InvalidEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

// === impl JsonRpcClient ===

impl JsonRpcClient {
    /// Connects lazily to `endpoint`. Connecting and each request must complete within `timeout`.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            conn: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    async fn connection(&self) -> Result<Connection> {
        let mut conn = self.conn.lock().await;
        if let Some(c) = conn.as_ref() {
            if !c.tx.is_closed() {
                return Ok(c.clone());
            }
            warn!(endpoint = %self.endpoint, "Database connection lost; reconnecting");
        }
        let c = time::timeout(self.timeout, Connection::open(&self.endpoint))
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;
        *conn = Some(c.clone());
        Ok(c)
    }

    /// Forgets `stale` if it is still the cached connection, so that the next request reconnects.
    async fn reset(&self, stale: &Connection) {
        let mut conn = self.conn.lock().await;
        if conn.as_ref().is_some_and(|c| c.tx.same_channel(&stale.tx)) {
            warn!(endpoint = %self.endpoint, "Database request timed out; reconnecting");
            *conn = None;
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let conn = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().insert(id, tx);

        trace!(%id, %method, "Sending request");
        if conn
            .tx
            .send(json!({ "id": id, "method": method, "params": params }))
            .is_err()
        {
            conn.pending.lock().remove(&id);
            return Err(Error::Closed);
        }

        let rsp = match time::timeout(self.timeout, rx).await {
            Ok(rsp) => rsp.map_err(|_| Error::Closed)?,
            Err(_) => {
                conn.pending.lock().remove(&id);
                self.reset(&conn).await;
                return Err(Error::Timeout(self.timeout));
            }
        };
        let Response { result, error } = rsp;
        if !error.is_null() {
            return Err(Error::Rpc(error));
        }
        Ok(result)
    }

    async fn transact_json(&self, ops: Vec<Value>) -> Result<Vec<Value>> {
        let params = std::iter::once(json!(DATABASE)).chain(ops).collect::<Vec<_>>();
        let result = self.call("transact", Value::Array(params)).await?;
        let Value::Array(results) = result else {
            return Err(Error::UnexpectedResponse(result));
        };

        // A failed transaction reports the error on the failing operation, or on an extra
        // trailing result when a commit-time constraint is violated.
        for res in &results {
            if let Some(error) = res.get("error").and_then(Value::as_str) {
                let details = res
                    .get("details")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return Err(Error::Transaction {
                    error: error.to_string(),
                    details: details.to_string(),
                });
            }
        }
        Ok(results)
    }
}

#[async_trait::async_trait]
impl Client for JsonRpcClient {
    async fn select(
        &self,
        table: &'static str,
        conditions: &[Condition],
    ) -> Result<Vec<(String, Row)>> {
        let op = json!({
            "op": "select",
            "table": table,
            "where": conditions.iter().map(Condition::to_json).collect::<Vec<_>>(),
        });
        let mut results = self.transact_json(vec![op]).await?;
        let result = results.pop().unwrap_or(Value::Null);
        let Some(rows) = result.get("rows").and_then(Value::as_array) else {
            return Err(Error::UnexpectedResponse(result));
        };

        rows.iter()
            .map(|row| {
                let mut row = row
                    .as_object()
                    .cloned()
                    .ok_or_else(|| Error::UnexpectedResponse(row.clone()))?;
                let uuid = row
                    .remove("_uuid")
                    .as_ref()
                    .and_then(decode_uuid)
                    .ok_or_else(|| Error::UnexpectedResponse(Value::Object(row.clone())))?;
                row.remove("_version");
                Ok((uuid, row))
            })
            .collect()
    }

    async fn transact(&self, ops: Vec<Operation>) -> Result<Vec<String>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let results = self
            .transact_json(ops.iter().map(Operation::to_json).collect())
            .await?;

        ops.iter()
            .zip(&results)
            .filter(|(op, _)| matches!(op, Operation::Insert { .. }))
            .map(|(_, res)| {
                res.get("uuid")
                    .and_then(decode_uuid)
                    .ok_or_else(|| Error::UnexpectedResponse(res.clone()))
            })
            .collect()
    }
}

// === impl Connection ===

impl Connection {
    async fn open(endpoint: &Endpoint) -> Result<Self> {
        let connect_error = |source| Error::Connect {
            endpoint: endpoint.to_string(),
            source,
        };
        let conn = match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr)
                    .await
                    .map_err(connect_error)?;
                let _ = stream.set_nodelay(true);
                Self::spawn(stream)
            }
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(connect_error)?;
                Self::spawn(stream)
            }
        };
        info!(%endpoint, "Connected to database");
        Ok(conn)
    }

    fn spawn<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Pending::default();
        tokio::spawn(
            run(io, rx, pending.clone()).instrument(tracing::debug_span!("ovsdb")),
        );
        Self { tx, pending }
    }
}

async fn run<S>(io: S, requests: mpsc::UnboundedReceiver<Value>, pending: Pending)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    if let Err(error) = io_loop(io, requests, &pending).await {
        debug!(%error, "Connection closed");
    }
    // Dropping the senders fails every outstanding call.
    pending.lock().clear();
}

async fn io_loop<S>(
    io: S,
    mut requests: mpsc::UnboundedReceiver<Value>,
    pending: &Pending,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read, mut write) = tokio::io::split(io);
    let mut buf = Vec::with_capacity(8 * 1024);
    loop {
        tokio::select! {
            req = requests.recv() => {
                let Some(req) = req else { return Ok(()) };
                write_message(&mut write, &req).await?;
            }
            n = read.read_buf(&mut buf) => {
                if n.map_err(|_| Error::Closed)? == 0 {
                    return Err(Error::Closed);
                }
                for msg in drain_messages(&mut buf)? {
                    if let Some(reply) = dispatch(msg, pending) {
                        write_message(&mut write, &reply).await?;
                    }
                }
            }
        }
    }
}

async fn write_message<W: AsyncWrite + Unpin>(write: &mut W, msg: &Value) -> Result<()> {
    let bytes = serde_json::to_vec(msg)?;
    write.write_all(&bytes).await.map_err(|_| Error::Closed)
}

/// Parses every complete message at the front of `buf`, leaving any partial message in place.
fn drain_messages(buf: &mut Vec<u8>) -> Result<Vec<Value>> {
    let mut msgs = Vec::new();
    let consumed = {
        let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
        loop {
            match stream.next() {
                Some(Ok(msg)) => msgs.push(msg),
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        stream.byte_offset()
    };
    buf.drain(..consumed);
    Ok(msgs)
}

/// Routes a message from the server, returning a reply to send, if any.
fn dispatch(msg: Value, pending: &Pending) -> Option<Value> {
    if msg.get("method").and_then(Value::as_str) == Some("echo") {
        let params = msg.get("params").cloned().unwrap_or_else(|| json!([]));
        return Some(json!({ "id": msg.get("id"), "result": params, "error": null }));
    }

    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        trace!(?msg, "Ignoring notification");
        return None;
    };
    match pending.lock().remove(&id) {
        Some(tx) => {
            let _ = tx.send(Response {
                result: msg.get("result").cloned().unwrap_or(Value::Null),
                error: msg.get("error").cloned().unwrap_or(Value::Null),
            });
        }
        None => debug!(%id, "Response for unknown request"),
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogicalSwitch, Model, PortGroup, Qos};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Accepts a single connection, checks that keepalives are answered, and responds to each
    /// request with the next canned result.
    async fn serve(listener: TcpListener, results: Vec<Value>) -> Vec<Value> {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut requests = Vec::new();

        let echo = json!({ "id": "echo", "method": "echo", "params": [] });
        stream
            .write_all(&serde_json::to_vec(&echo).unwrap())
            .await
            .unwrap();

        let mut results = results.into_iter();
        let mut echoed = false;
        while !(echoed && results.len() == 0) {
            if stream.read_buf(&mut buf).await.unwrap() == 0 {
                break;
            }
            for msg in drain_messages(&mut buf).unwrap() {
                if msg["id"] == "echo" {
                    assert_eq!(msg["result"], json!([]));
                    echoed = true;
                    continue;
                }
                let result = results.next().expect("unexpected request");
                let rsp = json!({ "id": msg["id"], "result": result, "error": null });
                requests.push(msg);
                stream
                    .write_all(&serde_json::to_vec(&rsp).unwrap())
                    .await
                    .unwrap();
            }
        }
        requests
    }

    #[test]
    fn parses_endpoints() {
        assert_eq!(
            "tcp:127.0.0.1:6641".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:6641".to_string())
        );
        assert_eq!(
            "unix:/var/run/ovn/ovnnb_db.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix("/var/run/ovn/ovnnb_db.sock".into())
        );
        assert!("ssl:127.0.0.1:6641".parse::<Endpoint>().is_err());
        assert!("tcp:6641".parse::<Endpoint>().is_err());
    }

    #[test]
    fn keeps_partial_messages_buffered() {
        let mut buf = br#"{"id":1,"result":[]}{"id":2,"res"#.to_vec();
        let msgs = drain_messages(&mut buf).unwrap();
        assert_eq!(msgs, vec![json!({ "id": 1, "result": [] })]);
        assert_eq!(buf, br#"{"id":2,"res"#.to_vec());
    }

    #[tokio::test]
    async fn selects_and_transacts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(
            listener,
            vec![
                json!([{ "rows": [{
                    "_uuid": ["uuid", "pg-1"],
                    "_version": ["uuid", "v-1"],
                    "name": "a1",
                    "ports": ["set", []],
                    "acls": ["set", []],
                    "external_ids": ["map", []],
                }]}]),
                json!([{ "uuid": ["uuid", "pg-2"] }, { "count": 1 }]),
            ],
        ));

        let client = JsonRpcClient::new(Endpoint::Tcp(addr.to_string()), TIMEOUT);
        let rows = client.select(PortGroup::TABLE, &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "pg-1");
        assert!(!rows[0].1.contains_key("_version"));

        let pg = PortGroup::from_row(rows[0].0.clone(), &rows[0].1).unwrap();
        let uuids = client
            .transact(vec![
                Operation::insert(&PortGroup {
                    name: "a2".to_string(),
                    ..Default::default()
                }),
                Operation::delete(&pg),
            ])
            .await
            .unwrap();
        assert_eq!(uuids, vec!["pg-2".to_string()]);

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1]["method"], "transact");
        assert_eq!(requests[1]["params"][0], DATABASE);
        assert_eq!(requests[1]["params"][2]["op"], "delete");
    }

    #[tokio::test]
    async fn reports_transaction_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(
            listener,
            vec![json!([
                { "count": 1 },
                { "error": "constraint violation", "details": "duplicate name" },
            ])],
        ));

        let client = JsonRpcClient::new(Endpoint::Tcp(addr.to_string()), TIMEOUT);
        let error = client
            .transact(vec![Operation::Delete {
                table: PortGroup::TABLE,
                uuid: "pg-1".to_string(),
            }])
            .await
            .unwrap_err();
        assert!(
            matches!(error, Error::Transaction { ref error, .. } if error == "constraint violation"),
            "{error}"
        );
    }

    #[tokio::test]
    async fn abandons_unresponsive_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let server = tokio::spawn({
            let accepted = accepted.clone();
            async move {
                // Connections are held open but never answered.
                let mut streams = Vec::new();
                loop {
                    let (stream, _) = listener.accept().await.unwrap();
                    accepted.fetch_add(1, Ordering::SeqCst);
                    streams.push(stream);
                }
            }
        });

        let client = JsonRpcClient::new(
            Endpoint::Tcp(addr.to_string()),
            Duration::from_millis(100),
        );
        let error = client.select(PortGroup::TABLE, &[]).await.unwrap_err();
        assert!(matches!(error, Error::Timeout(_)), "{error}");
        assert!(client.conn.lock().await.is_none());

        let error = client.select(PortGroup::TABLE, &[]).await.unwrap_err();
        assert!(matches!(error, Error::Timeout(_)), "{error}");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        server.abort();
    }

    #[test]
    fn encodes_switch_attachments() {
        let insert = Operation::insert_named(&Qos::default(), "qos_0");
        assert_eq!(insert.to_json()["uuid-name"], "qos_0");

        let attach = Operation::mutate_set::<LogicalSwitch>(
            "ls-0",
            "qos_rules",
            vec![json!(["named-uuid", "qos_0"])],
            vec![json!(["uuid", "q-1"])],
        )
        .unwrap();
        assert_eq!(
            attach.to_json(),
            json!({
                "op": "mutate",
                "table": "Logical_Switch",
                "where": [["_uuid", "==", ["uuid", "ls-0"]]],
                "mutations": [
                    ["qos_rules", "insert", ["set", [["named-uuid", "qos_0"]]]],
                    ["qos_rules", "delete", ["set", [["uuid", "q-1"]]]],
                ],
            })
        );
        assert!(
            Operation::mutate_set::<LogicalSwitch>("ls-0", "qos_rules", vec![], vec![]).is_none()
        );
    }
}
