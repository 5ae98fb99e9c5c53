//! High-level client: serialize a request, run it through the call
//! pipeline and decode the response.

use crate::call::{CallHandle, CallPipeline, Transport, begin_call};
use crate::envelope::{MethodCall, MethodSignature, deserialize_response, serialize_request_to};
use crate::error::Result;
use crate::http::HttpTransport;
use crate::schema::TypeHint;
use crate::settings::Config;
use crate::value::Value;
use serde::de::DeserializeOwned;
use std::io::{BufRead, Write};
use std::sync::Arc;

/// XML-RPC client bound to one endpoint.
///
/// Cloning is cheap; clones share the transport and configuration.
#[derive(Clone)]
pub struct XmlRpcClient {
    url: String,
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl XmlRpcClient {
    /// Client that talks HTTP using the web settings of `config`.
    pub fn new(url: impl Into<String>, config: Config) -> Self {
        let transport = Arc::new(HttpTransport::new(config.web.clone()));
        Self::with_transport(url, transport, config)
    }

    pub fn with_transport(url: impl Into<String>, transport: Arc<dyn Transport>, config: Config) -> Self {
        XmlRpcClient {
            url: url.into(),
            transport,
            config: Arc::new(config),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Call `method` with positional arguments and decode the result
    /// unconstrained. A fault comes back as [`Error::Fault`](crate::Error::Fault).
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Option<Value>> {
        let call = MethodCall::new(method, params);
        let (writer, reader) = self.codec(call, None, TypeHint::Any);
        CallPipeline::new(self.transport.clone(), self.url.as_str())
            .run(writer, reader)
            .await
    }

    /// Call a method whose signature is known, checking the arguments
    /// against it and decoding the result against its return type.
    pub async fn call_with_signature(
        &self,
        signature: &MethodSignature,
        params: Vec<Value>,
    ) -> Result<Option<Value>> {
        let call = MethodCall::new(signature.name.as_str(), params);
        let returns = signature.returns.clone();
        let (writer, reader) = self.codec(call, Some(signature.clone()), returns);
        CallPipeline::new(self.transport.clone(), self.url.as_str())
            .run(writer, reader)
            .await
    }

    /// Call `method` and deserialize the result into `T`. A void result
    /// deserializes from [`Value::Nil`].
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let value = self.call(method, params).await?;
        crate::de::from_value(value.unwrap_or_default())
    }

    /// Start a call on its own task and return a handle to it.
    pub fn begin_call(&self, method: &str, params: Vec<Value>) -> CallHandle<Option<Value>> {
        let call = MethodCall::new(method, params);
        let (writer, reader) = self.codec(call, None, TypeHint::Any);
        begin_call(self.transport.clone(), self.url.as_str(), writer, reader)
    }

    #[allow(clippy::type_complexity)]
    fn codec(
        &self,
        call: MethodCall,
        signature: Option<MethodSignature>,
        returns: TypeHint,
    ) -> (
        impl FnOnce(&mut dyn Write) -> Result<()> + Send + 'static,
        impl FnOnce(&mut dyn BufRead) -> Result<Option<Value>> + Send + 'static,
    ) {
        let write_config = self.config.clone();
        let read_config = self.config.clone();
        let writer = move |out: &mut dyn Write| {
            serialize_request_to(out, &call, signature.as_ref(), &write_config)
        };
        let reader = move |input: &mut dyn BufRead| {
            deserialize_response(input, &returns, &read_config)?.into_result()
        };
        (writer, reader)
    }
}
