//! The request engine.
//!
//! [`HttpWebservice`] turns a [`DataResource`] or [`DownloadResource`] into
//! a wire request, delegates to the [`Authorization`] delegate when the
//! resource requires it, tracks the operation in the [`TaskRegistry`] for
//! its whole lifetime, and classifies the outcome into the
//! [`NetworkError`] taxonomy exactly once. Downloads stream to a temporary
//! file and complete through a registered [`DownloadEvents`] listener.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::cache::DecodedCache;
use crate::downloads::DownloadedFiles;
use crate::error::Error;
use crate::resource::{DataResource, DownloadResource, Headers};
use crate::tasks::{TaskLease, TaskRegistry};

/// Error type for the network layer.
///
/// Responses and transport failures are classified into this taxonomy once,
/// at the engine boundary, and never re-classified downstream.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The resource's URL could not be parsed.
    #[error("a problem with the server address occurred")]
    ParseUrl,

    /// The response body could not be decoded.
    #[error("can't parse data: {message}")]
    ParseData { message: String },

    /// The server answered 401.
    #[error("unable to authorize")]
    Unauthorized,

    /// The server answered with an unexpected non-2xx code.
    #[error("server responded with unexpected response code {code}")]
    BadResponseCode { code: u16 },

    /// The transport reported that no connection could be established.
    #[error("no internet connection")]
    NoInternetConnectivity,

    /// The server answered 404.
    #[error("the requested data does not exist")]
    NotFound,

    /// The operation was cancelled by its correlation id.
    #[error("the request was cancelled")]
    Cancelled,

    /// Any other transport failure, passed through unclassified.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for NetworkError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() {
            NetworkError::NoInternetConnectivity
        } else {
            NetworkError::Transport(error)
        }
    }
}

/// Delegate that attaches credentials to a pending request.
///
/// The implementation may itself issue requests through the engine (a token
/// refresh); such a sub-request must carry the `correlation_id` it is given
/// so that cancelling the original operation also cancels it.
#[async_trait::async_trait]
pub trait Authorization: Send + Sync {
    async fn authorize(
        &self,
        request: &mut reqwest::Request,
        correlation_id: Uuid,
    ) -> Result<(), Error>;
}

/// Listener for download completion.
///
/// Exactly one of the two callbacks fires per dispatched download.
pub trait DownloadEvents: Send + Sync {
    fn download_finished(&self, url: &str, location: &Path, file_name: &str);
    fn download_failed(&self, url: &str, error: Error, file_name: Option<&str>);
}

/// Request engine backed by `reqwest`.
pub struct HttpWebservice {
    // behind a lock so reset() can swap in a fresh client, dropping cookies
    client: RwLock<reqwest::Client>,
    cache: DecodedCache,
    tasks: Arc<TaskRegistry>,
    files: DownloadedFiles,
    authorization: RwLock<Option<Weak<dyn Authorization>>>,
    download_listener: RwLock<Option<Weak<dyn DownloadEvents>>>,
}

impl HttpWebservice {
    /// Create an engine that places completed downloads in `download_dir`.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: RwLock::new(Self::build_client()),
            cache: DecodedCache::new(),
            tasks: Arc::new(TaskRegistry::new()),
            files: DownloadedFiles::new(download_dir),
            authorization: RwLock::new(None),
            download_listener: RwLock::new(None),
        }
    }

    fn build_client() -> reqwest::Client {
        reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .expect("failed to construct HTTP client")
    }

    /// Set the authorization delegate. The engine keeps a weak reference;
    /// the caller owns the delegate's lifetime.
    pub fn set_authorization(&self, authorization: Arc<dyn Authorization>) {
        *self.authorization.write() = Some(Arc::downgrade(&authorization));
    }

    /// Set the download listener. The engine keeps a weak reference.
    pub fn set_download_listener(&self, listener: Arc<dyn DownloadEvents>) {
        *self.download_listener.write() = Some(Arc::downgrade(&listener));
    }

    /// Load a data resource and decode its response body.
    ///
    /// `Ok(None)` means the request succeeded with an empty body (for
    /// example, the resource was deleted on the server side).
    pub async fn load<A>(&self, resource: DataResource<A>) -> Result<Option<A>, Error>
    where
        A: Clone + Send + Sync + 'static,
    {
        let url = Url::parse(&resource.url).map_err(|_| NetworkError::ParseUrl)?;

        if resource.cacheable {
            if let Some(hit) = self.cache.get::<A>(&resource.url) {
                tracing::debug!(url = %resource.url, "serving decoded value from cache");
                return Ok(Some(hit));
            }
        }

        let mut request = build_request(
            url.clone(),
            resource.method.into(),
            &resource.headers,
            resource.body.as_deref(),
        );

        let lease = self.tasks.begin(resource.correlation_id, url);

        if resource.authorization_needed {
            let authorization = self.authorization_delegate();
            authorization
                .authorize(&mut request, resource.correlation_id)
                .await?;
        }

        let bytes = self.execute(request, lease.token()).await?;
        drop(lease);

        if bytes.is_empty() {
            return Ok(None);
        }

        let value = (resource.decode)(&bytes).map_err(|e| NetworkError::ParseData {
            message: e.to_string(),
        })?;
        if resource.cacheable {
            self.cache.insert(resource.url.clone(), value.clone());
        }
        Ok(Some(value))
    }

    /// Dispatch a download resource.
    ///
    /// Errors detected while preparing the request (bad URL, failed
    /// authorization) are returned directly; the transfer itself runs in the
    /// background and reports through the registered [`DownloadEvents`]
    /// listener.
    pub async fn download(self: &Arc<Self>, resource: DownloadResource) -> Result<(), Error> {
        let url = Url::parse(&resource.url).map_err(|_| NetworkError::ParseUrl)?;

        let mut request = build_request(
            url.clone(),
            resource.method.into(),
            &resource.headers,
            resource.body.as_deref(),
        );

        let lease = self.tasks.begin(resource.correlation_id, url.clone());

        if resource.authorization_needed {
            let authorization = self.authorization_delegate();
            authorization
                .authorize(&mut request, resource.correlation_id)
                .await?;
        }

        // The transfer completion path only knows the transport task id, so
        // the destination file name is recorded against it at dispatch time.
        let transport_id = self.tasks.assign_download(&resource.file_name);
        tracing::debug!(url = %resource.url, file_name = %resource.file_name, transport_id, "starting download");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_download(request, lease, transport_id, url).await;
        });
        Ok(())
    }

    /// Cancel the operation dispatched under `correlation_id`.
    ///
    /// Best effort: the transport is told to stop, but the remote server may
    /// still have processed the request.
    pub fn cancel_task(&self, correlation_id: Uuid) {
        self.tasks.cancel(correlation_id);
    }

    /// Whether an operation with this correlation id is currently in flight.
    pub fn is_task_active(&self, correlation_id: Uuid) -> bool {
        self.tasks.is_active(correlation_id)
    }

    /// Whether any in-flight operation targets this URL.
    pub fn is_task_active_for_url(&self, url: &Url) -> bool {
        self.tasks.is_active_for_url(url)
    }

    /// Number of downloads whose transfer has not yet completed.
    pub fn pending_downloads(&self) -> usize {
        self.tasks.download_name_count()
    }

    /// Cancel every in-flight task, drop all cached decoded values, and
    /// clear session cookies.
    pub fn reset(&self) {
        self.tasks.cancel_all();
        self.cache.invalidate();
        *self.client.write() = Self::build_client();
        tracing::debug!("webservice reset: tasks cancelled, cache invalidated, cookies cleared");
    }

    fn authorization_delegate(&self) -> Arc<dyn Authorization> {
        let delegate = self.authorization.read().as_ref().and_then(Weak::upgrade);
        delegate.expect("authorization must be set when a resource requires authorization")
    }

    fn download_listener(&self) -> Option<Arc<dyn DownloadEvents>> {
        self.download_listener.read().as_ref().and_then(Weak::upgrade)
    }

    /// Execute a request, racing the operation's cancellation token, and
    /// classify the outcome.
    async fn execute(
        &self,
        request: reqwest::Request,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, NetworkError> {
        let client = self.client.read().clone();
        let work = async move {
            let response = client.execute(request).await?;
            classify_status(response.status())?;
            let bytes = response.bytes().await?;
            Ok(bytes.to_vec())
        };

        tokio::select! {
            _ = token.cancelled() => Err(NetworkError::Cancelled),
            result = work => result,
        }
    }

    async fn run_download(&self, request: reqwest::Request, lease: TaskLease, transport_id: u64, url: Url) {
        // Peek the name first; it is cleared unconditionally below.
        let file_name = self.tasks.download_name(transport_id);
        let result = match &file_name {
            Some(name) => self.transfer(request, lease.token(), transport_id, name).await,
            None => {
                debug_assert!(false, "no file name recorded for download task");
                Err(Error::Network(NetworkError::Cancelled))
            }
        };

        self.tasks.take_download_name(transport_id);
        drop(lease);

        let listener = self.download_listener();
        match result {
            Ok(location) => {
                tracing::debug!(url = %url, location = %location.display(), "download finished");
                if let Some(listener) = listener {
                    listener.download_finished(
                        url.as_str(),
                        &location,
                        file_name.as_deref().unwrap_or_default(),
                    );
                }
            }
            Err(error) => {
                tracing::warn!(url = %url, %error, "download failed");
                if let Some(name) = &file_name {
                    if let Err(cleanup) = self.files.remove(name).await {
                        tracing::warn!(file_name = %name, error = %cleanup, "failed to remove partial download");
                    }
                }
                if let Some(listener) = listener {
                    listener.download_failed(url.as_str(), error, file_name.as_deref());
                }
            }
        }
    }

    /// Stream the response body to a temporary file and move it to its
    /// permanent destination.
    async fn transfer(
        &self,
        request: reqwest::Request,
        token: &CancellationToken,
        transport_id: u64,
        file_name: &str,
    ) -> Result<PathBuf, Error> {
        let client = self.client.read().clone();
        let temp = self.files.temp_path(transport_id);

        let work = async {
            self.files.ensure_dir().await?;
            let response = client.execute(request).await.map_err(NetworkError::from)?;
            classify_status(response.status())?;

            let mut file = tokio::fs::File::create(&temp).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(NetworkError::from)?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<_, Error>(())
        };

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(Error::Network(NetworkError::Cancelled)),
            result = work => result,
        };

        match outcome {
            Ok(()) => Ok(self.files.move_to_permanent(&temp, file_name).await?),
            Err(error) => {
                if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(temp = %temp.display(), error = %cleanup, "failed to remove temp file");
                    }
                }
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for HttpWebservice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWebservice")
            .field("tasks", &self.tasks)
            .field("cache", &self.cache)
            .finish()
    }
}

fn build_request(
    url: Url,
    method: reqwest::Method,
    headers: &Headers,
    body: Option<&[u8]>,
) -> reqwest::Request {
    let mut request = reqwest::Request::new(method, url);

    if let Some(accept) = &headers.accept {
        insert_header(&mut request, ACCEPT, accept);
    }
    if let Some(content_type) = &headers.content_type {
        insert_header(&mut request, CONTENT_TYPE, content_type);
    }
    for (key, value) in &headers.other {
        match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => insert_header(&mut request, name, value),
            Err(_) => tracing::warn!(header = %key, "skipping invalid header name"),
        }
    }
    if let Some(body) = body {
        *request.body_mut() = Some(reqwest::Body::from(body.to_vec()));
    }

    request
}

fn insert_header(request: &mut reqwest::Request, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            request.headers_mut().insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "skipping invalid header value"),
    }
}

fn classify_status(status: reqwest::StatusCode) -> Result<(), NetworkError> {
    // 401 and 404 carry meaning for callers and get their own variants
    if status.as_u16() == 401 {
        return Err(NetworkError::Unauthorized);
    }
    if status.as_u16() == 404 {
        return Err(NetworkError::NotFound);
    }
    if !status.is_success() {
        return Err(NetworkError::BadResponseCode {
            code: status.as_u16(),
        });
    }
    Ok(())
}
