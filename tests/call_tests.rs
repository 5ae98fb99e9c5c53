//! Call pipeline tests.
//!
//! Most tests run against an in-memory transport; the last group starts a
//! hyper server on `127.0.0.1` and goes through [`XmlRpcClient::new`].

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::watch;
use xmlrpc_serde::call::{CallState, RequestStream, ResponseStream, Transport};
use xmlrpc_serde::envelope::{deserialize_request, serialize_response};
use xmlrpc_serde::settings::Config;
use xmlrpc_serde::{
    Error, Fault, MethodResponse, MethodSignature, TypeHint, Value, XmlRpcClient, end_call,
};

// ── In-memory transport ────────────────────────────────────────────────────

type Handler = dyn Fn(&[u8]) -> (u16, Vec<u8>) + Send + Sync;

/// Records the call state each time the transport is driven, once a
/// receiver has been attached.
#[derive(Clone, Default)]
struct StateLog {
    receiver: Arc<Mutex<Option<watch::Receiver<CallState>>>>,
    seen: Arc<Mutex<Vec<CallState>>>,
}

impl StateLog {
    fn attach(&self, receiver: watch::Receiver<CallState>) {
        *self.receiver.lock().unwrap() = Some(receiver);
    }

    fn sample(&self) {
        if let Some(receiver) = self.receiver.lock().unwrap().as_ref() {
            let state = *receiver.borrow();
            let mut seen = self.seen.lock().unwrap();
            if seen.last() != Some(&state) {
                seen.push(state);
            }
        }
    }

    fn seen(&self) -> Vec<CallState> {
        self.seen.lock().unwrap().clone()
    }
}

/// Answers every request with the handler's status and body and keeps the
/// request bodies it saw.
struct MockTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_open: bool,
    log: StateLog,
}

impl MockTransport {
    fn new(handler: impl Fn(&[u8]) -> (u16, Vec<u8>) + Send + Sync + 'static) -> Self {
        MockTransport {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_open: false,
            log: StateLog::default(),
        }
    }

    fn responding(body: String) -> Self {
        Self::new(move |_| (200, body.clone().into_bytes()))
    }

    fn last_request(&self) -> String {
        let requests = self.requests.lock().unwrap();
        String::from_utf8(requests.last().cloned().unwrap_or_default()).unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_request_stream(&self, _uri: &str) -> xmlrpc_serde::Result<Box<dyn RequestStream>> {
        self.log.sample();
        if self.fail_open {
            return Err(Error::Transport("connection refused".into()));
        }
        Ok(Box::new(MockStream {
            handler: self.handler.clone(),
            requests: self.requests.clone(),
            body: Vec::new(),
            log: self.log.clone(),
        }))
    }
}

struct MockStream {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    body: Vec<u8>,
    log: StateLog,
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.log.sample();
        self.body.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl RequestStream for MockStream {
    async fn get_response(&mut self) -> xmlrpc_serde::Result<ResponseStream> {
        self.log.sample();
        let (status, body) = (self.handler)(&self.body);
        self.requests.lock().unwrap().push(std::mem::take(&mut self.body));
        Ok(ResponseStream {
            status,
            content_length: Some(body.len() as u64),
            body: Box::new(SampledBody {
                inner: Cursor::new(body),
                log: self.log.clone(),
            }),
        })
    }
}

struct SampledBody {
    inner: Cursor<Vec<u8>>,
    log: StateLog,
}

impl AsyncRead for SampledBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.log.sample();
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

fn success(value: Value) -> String {
    let xml = serialize_response(&MethodResponse::Success(Some(value)), &Config::default()).unwrap();
    String::from_utf8(xml).unwrap()
}

fn mock_client(transport: MockTransport) -> (XmlRpcClient, Arc<MockTransport>) {
    let transport = Arc::new(transport);
    let client = XmlRpcClient::with_transport("http://mock/RPC2", transport.clone(), Config::default());
    (client, transport)
}

#[tokio::test]
async fn test_call_returns_value() {
    let (client, transport) = mock_client(MockTransport::responding(success("South Dakota".into())));
    let result = client.call("examples.getStateName", vec![Value::Int(41)]).await.unwrap();
    assert_eq!(result, Some(Value::from("South Dakota")));

    let request = transport.last_request();
    assert!(request.contains("<methodName>examples.getStateName</methodName>"), "{request}");
    assert!(request.contains("<i4>41</i4>"), "{request}");
}

#[tokio::test]
async fn test_call_as_deserializes() {
    let (client, _) = mock_client(MockTransport::responding(success(Value::Array(vec![
        1.into(),
        2.into(),
    ]))));
    let numbers: Vec<u16> = client.call_as("list", Vec::new()).await.unwrap();
    assert_eq!(numbers, [1, 2]);
}

#[tokio::test]
async fn test_fault_reaches_caller() {
    let body = String::from_utf8(
        serialize_response(
            &MethodResponse::Fault(Fault::new(4, "Too many parameters.")),
            &Config::default(),
        )
        .unwrap(),
    )
    .unwrap();
    let (client, _) = mock_client(MockTransport::responding(body));
    match client.call("m", Vec::new()).await {
        Err(Error::Fault(fault)) => assert_eq!(fault, Fault::new(4, "Too many parameters.")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_signature_checks_arguments_before_sending() {
    let (client, transport) = mock_client(MockTransport::responding(success(1.into())));
    let sig = MethodSignature::new("add")
        .param("a", TypeHint::Int32)
        .param("b", TypeHint::Int32)
        .returns(TypeHint::Int32);
    let err = client.call_with_signature(&sig, vec![1.into()]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameters(_)), "{err}");
    assert!(transport.requests.lock().unwrap().is_empty());

    let ok = client.call_with_signature(&sig, vec![1.into(), 2.into()]).await.unwrap();
    assert_eq!(ok, Some(Value::Int(1)));
}

#[tokio::test]
async fn test_begin_call_reaches_decoded() {
    let (client, _) = mock_client(MockTransport::responding(success(true.into())));
    let handle = client.begin_call("ping", Vec::new());
    let mut states = handle.watch_state();
    let result = end_call(handle).await.unwrap();
    assert_eq!(result, Some(Value::Bool(true)));
    states.wait_for(|s| s.is_terminal()).await.unwrap();
    assert_eq!(*states.borrow(), CallState::Decoded);
}

#[tokio::test]
async fn test_states_follow_pipeline_order() {
    let (client, transport) = mock_client(MockTransport::responding(success(1.into())));
    let handle = client.begin_call("ping", Vec::new());
    transport.log.attach(handle.watch_state());
    let mut states = handle.watch_state();
    end_call(handle).await.unwrap();
    states.wait_for(|s| s.is_terminal()).await.unwrap();
    assert_eq!(
        transport.log.seen(),
        [
            CallState::AcquiringRequestStream,
            CallState::WritingBody,
            CallState::AwaitingResponse,
            CallState::ReadingResponseBody,
        ]
    );
    assert_eq!(*states.borrow(), CallState::Decoded);
}

#[tokio::test]
async fn test_http_error_status_faults_call() {
    let (client, _) = mock_client(MockTransport::new(|_| (500, b"oops".to_vec())));
    let handle = client.begin_call("m", Vec::new());
    let mut states = handle.watch_state();
    let err = handle.end().await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus(500)), "{err}");
    states.wait_for(|s| s.is_terminal()).await.unwrap();
    assert_eq!(*states.borrow(), CallState::Faulted);
}

#[tokio::test]
async fn test_open_failure_is_transport_error() {
    let mut transport = MockTransport::responding(String::new());
    transport.fail_open = true;
    let (client, _) = mock_client(transport);
    let err = client.call("m", Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err}");
    assert!(!err.is_codec_error());
}

#[tokio::test]
async fn test_malformed_response_is_codec_error() {
    let (client, _) = mock_client(MockTransport::responding("<methodResponse><params>".into()));
    let err = client.call("m", Vec::new()).await.unwrap_err();
    assert!(err.is_codec_error(), "{err}");
}

#[test]
fn test_wait_blocking() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (client, _) = mock_client(MockTransport::responding(success(Value::Int64(9))));
    let handle = runtime.block_on(async { client.begin_call("m", Vec::new()) });
    assert_eq!(handle.wait_blocking().unwrap(), Some(Value::Int64(9)));
}

// ── HTTP ───────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// XML-RPC server on a random local port that answers `sum` with the sum of
/// its integer arguments and everything else with a fault.
async fn start_server() -> String {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(handle_rpc);
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    format!("http://{}/RPC2", addr)
}

async fn handle_rpc(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.headers().get("content-type").map(|v| v.as_bytes()) != Some(&b"text/xml"[..]) {
        return Ok(Response::builder()
            .status(StatusCode::UNSUPPORTED_MEDIA_TYPE)
            .body(Full::new(Bytes::new()))
            .unwrap());
    }
    let body = req.into_body().collect().await?.to_bytes();
    let config = Config::default();
    let call = deserialize_request(body.as_ref(), None, &config).unwrap();
    let response = if call.method == "sum" {
        let total = call.params.iter().filter_map(Value::as_i64).sum::<i64>();
        MethodResponse::Success(Some(Value::Int(total as i32)))
    } else {
        MethodResponse::Fault(Fault::new(-32601, format!("no method {}", call.method)))
    };
    let xml = serialize_response(&response, &config).unwrap();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/xml")
        .body(Full::new(Bytes::from(xml)))
        .unwrap())
}

#[tokio::test]
async fn test_http_round_trip() {
    let url = start_server().await;
    let client = XmlRpcClient::new(url, Config::default());
    let total = client
        .call("sum", vec![2.into(), 3.into(), Value::Int64(5)])
        .await
        .unwrap();
    assert_eq!(total, Some(Value::Int(10)));
}

#[tokio::test]
async fn test_http_fault() {
    let url = start_server().await;
    let client = XmlRpcClient::new(url, Config::default());
    match client.call("nope", Vec::new()).await {
        Err(Error::Fault(fault)) => {
            assert_eq!(fault.code, -32601);
            assert_eq!(fault.message, "no method nope");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_http_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = XmlRpcClient::new(format!("http://{}/RPC2", addr), Config::default());
    let err = client.call("sum", Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err}");
}
