//! One-shot JSON-RPC over HTTP(S): one POST per request, no retries at this layer.

use reqwest::{Certificate, Client, Identity, StatusCode, Url};
use serde_json::Value;
use std::future::Future;

use super::{enrich_envelope, envelope, parse_response, parse_url, random_rpc_id, Transport};
use crate::config::TransportOptions;
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    endpoint: Url,
    credentials: Option<(String, Option<String>)>,
    client: Client,
}

impl HttpTransport {
    /// Build a client for `url`. `user:password@` in the URL is moved into basic auth.
    pub fn new(url: &str, options: &TransportOptions) -> Result<Self, TransportError> {
        let mut endpoint = parse_url(url)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::InvalidUrl(format!("not an HTTP URL: {url}")));
        }
        let credentials = if endpoint.username().is_empty() {
            None
        } else {
            let user = endpoint.username().to_string();
            let password = endpoint.password().map(str::to_string);
            let _ = endpoint.set_username("");
            let _ = endpoint.set_password(None);
            Some((user, password))
        };

        let mut builder = Client::builder()
            .connect_timeout(options.connect_timeout())
            .timeout(options.request_timeout())
            .danger_accept_invalid_certs(options.accept_invalid_certs);
        if let (Some(cert), Some(key)) = (&options.client_cert_pem, &options.client_key_pem) {
            let identity = Identity::from_pkcs8_pem(cert.as_bytes(), key.as_bytes())?;
            builder = builder.identity(identity);
        }
        if let Some(ca) = &options.ca_cert_pem {
            builder = builder.add_root_certificate(Certificate::from_pem(ca.as_bytes())?);
        }

        Ok(Self {
            url: url.trim().to_string(),
            endpoint,
            credentials,
            client: builder.build()?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.send(envelope(random_rpc_id(), method, params)).await
    }

    /// Post a caller-built request object, adding `jsonrpc` and a positive `id` when missing.
    pub async fn send(&self, request: Value) -> Result<Value, TransportError> {
        let body = enrich_envelope(request);
        let mut req = self.client.post(self.endpoint.clone()).json(&body);
        if let Some((user, password)) = &self.credentials {
            req = req.basic_auth(user, password.as_ref());
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(TransportError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| TransportError::Protocol(format!("cannot parse response body: {e}")))?;
        parse_response(json)
    }
}

impl Transport for HttpTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn request(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send {
        self.call(method, params)
    }
}
