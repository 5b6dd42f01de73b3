//! Request descriptors.
//!
//! This module provides:
//! - [`Method`] - The supported HTTP methods
//! - [`Headers`] - Content-type, accept and arbitrary header overrides
//! - [`DataResource`] - A request that decodes its response body into a value
//! - [`DownloadResource`] - A request whose response is streamed to a file
//!
//! A resource describes one intended network operation and is not mutated
//! after it has been handed to the engine. Every resource carries a
//! correlation id that identifies the in-flight operation for cancellation
//! and duplicate detection.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// HTTP methods supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// MIME strings for the common content-type and accept headers.
pub mod mime {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const JSON: &str = "application/json";
    pub const URL_ENCODED: &str = "application/x-www-form-urlencoded";
    pub const PDF: &str = "application/pdf";
    pub const IMAGE_JPEG: &str = "image/jpeg";
    pub const IMAGE_PNG: &str = "image/png";

    pub fn multipart(boundary: &str) -> String {
        format!("multipart/form-data; boundary={boundary}")
    }
}

/// Headers attached to a resource before dispatch.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub other: HashMap<String, String>,
}

/// Error produced by a resource's decode function.
pub type DecodeError = Box<dyn std::error::Error + Send + Sync>;

type DecodeFn<A> = Arc<dyn Fn(&[u8]) -> Result<A, DecodeError> + Send + Sync>;

/// Descriptor of a request whose response body decodes into a value of `A`.
pub struct DataResource<A> {
    pub url: String,
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub headers: Headers,
    pub authorization_needed: bool,
    pub correlation_id: Uuid,
    pub(crate) cacheable: bool,
    pub(crate) decode: DecodeFn<A>,
}

impl<A> DataResource<A> {
    /// Create a resource with a custom decode function.
    pub fn new<F>(url: impl Into<String>, method: Method, body: Option<Vec<u8>>, decode: F) -> Self
    where
        F: Fn(&[u8]) -> Result<A, DecodeError> + Send + Sync + 'static,
    {
        Self {
            url: url.into(),
            method,
            body,
            headers: Headers::default(),
            authorization_needed: true,
            correlation_id: Uuid::new_v4(),
            cacheable: false,
            decode: Arc::new(decode),
        }
    }

    /// Copy this resource under a different correlation id.
    ///
    /// An authorization sub-request is given the same id as the data request
    /// it authorizes. The two are strictly sequential, so cancelling the
    /// data request by its id also cancels a refresh that is still running
    /// on its behalf.
    pub fn with_correlation_id(&self, correlation_id: Uuid) -> Self {
        Self {
            url: self.url.clone(),
            method: self.method,
            body: self.body.clone(),
            headers: self.headers.clone(),
            authorization_needed: self.authorization_needed,
            correlation_id,
            cacheable: self.cacheable,
            decode: Arc::clone(&self.decode),
        }
    }

    /// Dispatch without consulting the authorization delegate.
    pub fn without_authorization(mut self) -> Self {
        self.authorization_needed = false;
        self
    }

    /// Allow the decoded value to be served from and inserted into the
    /// engine's decoded-object cache, keyed by this resource's URL.
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

impl<A: DeserializeOwned> DataResource<A> {
    /// Create a JSON resource decoded with serde.
    pub fn json(url: impl Into<String>, method: Method, body: Option<Vec<u8>>) -> Self {
        let mut resource = Self::new(url, method, body, |bytes| {
            serde_json::from_slice(bytes).map_err(|e| Box::new(e) as DecodeError)
        });
        resource.headers.content_type = Some(mime::JSON.to_string());
        resource
    }
}

impl<A> Clone for DataResource<A> {
    fn clone(&self) -> Self {
        self.with_correlation_id(self.correlation_id)
    }
}

impl<A> std::fmt::Debug for DataResource<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataResource")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("authorization_needed", &self.authorization_needed)
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

/// Descriptor of a request whose response bytes are streamed to a named file.
#[derive(Debug, Clone)]
pub struct DownloadResource {
    pub url: String,
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub file_name: String,
    pub headers: Headers,
    pub authorization_needed: bool,
    pub correlation_id: Uuid,
}

impl DownloadResource {
    pub fn new(
        url: impl Into<String>,
        method: Method,
        body: Option<Vec<u8>>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            method,
            body,
            file_name: file_name.into(),
            headers: Headers::default(),
            authorization_needed: true,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Copy this resource under a different correlation id.
    pub fn with_correlation_id(&self, correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            ..self.clone()
        }
    }

    /// Dispatch without consulting the authorization delegate.
    pub fn without_authorization(mut self) -> Self {
        self.authorization_needed = false;
        self
    }
}

/// Generate a boundary string for a multipart body.
pub fn random_boundary() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let middle: String = (0..10)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("XXX{middle}XXX")
}

/// Build a single-part `multipart/form-data` body around `data`.
///
/// Pair with [`mime::multipart`] for the matching content-type header.
pub fn multipart_form_data(data: &[u8], boundary: &str, mime_type: &str, name: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition:form-data; name=\"{name}\"; filename=\"data.jpg\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--").as_bytes());
    body
}
