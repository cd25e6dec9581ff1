//! Byte storage for datasets, checkpoints and plots.
//!
//! Paths are parsed once into a [`StoragePath`]: either a local filesystem
//! path or a `scheme://bucket/key` object. [`Storage`] routes each request to
//! the backend that owns the path.
//!
//! # Example
//!
//! ```
//! use sunset_gan::storage::{Storage, StoragePath};
//!
//! # fn main() -> sunset_gan::Result<()> {
//! let storage = Storage::in_memory();
//! let path = StoragePath::parse("gs://sunsets/models")?.join("generator.safetensors");
//! storage.put(&path, b"weights")?;
//! assert_eq!(storage.get(&path)?, b"weights");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::config::StorageConfig;
use crate::error::{GanError, Result};

/// Environment variable consulted when no access token is configured.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// A parsed storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoragePath {
    /// Local filesystem path.
    Local(PathBuf),
    /// Object in a bucket.
    Bucket {
        /// URL scheme, e.g. `gs`.
        scheme: String,
        /// Bucket name.
        bucket: String,
        /// Object key, possibly empty for the bucket root.
        key: String,
    },
}

impl StoragePath {
    /// Parse a local path, `file://` path or `scheme://bucket/key` URL.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Storage`] for an empty path or a URL without a bucket.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GanError::Storage("empty storage path".into()));
        }
        let Some((scheme, rest)) = raw.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(raw)));
        };
        if scheme == "file" {
            return Ok(Self::Local(PathBuf::from(rest)));
        }
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(GanError::Storage(format!("no bucket in '{raw}'")));
        }
        Ok(Self::Bucket {
            scheme: scheme.to_ascii_lowercase(),
            bucket: bucket.to_string(),
            key: key.trim_matches('/').to_string(),
        })
    }

    /// Child location `name` under this one.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        match self {
            Self::Local(path) => Self::Local(path.join(name)),
            Self::Bucket {
                scheme,
                bucket,
                key,
            } => Self::Bucket {
                scheme: scheme.clone(),
                bucket: bucket.clone(),
                key: if key.is_empty() {
                    name.to_string()
                } else {
                    format!("{key}/{name}")
                },
            },
        }
    }

    /// Whether this is an object-store location.
    #[must_use]
    pub fn is_bucket(&self) -> bool {
        matches!(self, Self::Bucket { .. })
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Bucket {
                scheme,
                bucket,
                key,
            } => write!(f, "{scheme}://{bucket}/{key}"),
        }
    }
}

/// A store of byte blobs addressed by [`StoragePath`].
pub trait ObjectStore: Send + Sync {
    /// Read a whole object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is missing or the backend fails.
    fn get(&self, path: &StoragePath) -> Result<Vec<u8>>;

    /// Write a whole object, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()>;

    /// Whether the object exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot answer.
    fn exists(&self, path: &StoragePath) -> Result<bool>;

    /// Backend name for logs.
    fn backend_type(&self) -> &'static str;
}

/// Local filesystem backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl LocalBackend {
    fn local_path(path: &StoragePath) -> Result<&PathBuf> {
        match path {
            StoragePath::Local(p) => Ok(p),
            StoragePath::Bucket { .. } => Err(GanError::Storage(format!(
                "local backend cannot serve '{path}'"
            ))),
        }
    }
}

impl ObjectStore for LocalBackend {
    fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        Ok(std::fs::read(Self::local_path(path)?)?)
    }

    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        let path = Self::local_path(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    fn exists(&self, path: &StoragePath) -> Result<bool> {
        Ok(Self::local_path(path)?.exists())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

/// Google Cloud Storage over its XML API.
pub struct GcsBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
    project: Option<String>,
}

impl GcsBackend {
    /// Backend using the configured credentials, falling back to
    /// [`ACCESS_TOKEN_ENV`] for the token. Without a token requests are
    /// anonymous.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let token = config
            .access_token
            .clone()
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
            .filter(|t| !t.is_empty());
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
            endpoint: GCS_ENDPOINT.to_string(),
            token,
            project: config.project_name.clone(),
        })
    }

    /// Override the service endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// URL of the object at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GanError::Storage`] for local paths and non-`gs` schemes.
    pub fn object_url(&self, path: &StoragePath) -> Result<String> {
        match path {
            StoragePath::Bucket {
                scheme,
                bucket,
                key,
            } if scheme == "gs" => Ok(format!("{}/{bucket}/{key}", self.endpoint)),
            _ => Err(GanError::Storage(format!(
                "GCS backend cannot serve '{path}'"
            ))),
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &StoragePath,
    ) -> Result<reqwest::blocking::RequestBuilder> {
        let mut request = self.client.request(method, self.object_url(path)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(project) = &self.project {
            request = request.header("x-goog-project-id", project);
        }
        Ok(request)
    }
}

impl ObjectStore for GcsBackend {
    fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        tracing::debug!("GET {path}");
        let response = self.request(reqwest::Method::GET, path)?.send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GanError::Storage(format!("'{path}' not found")));
        }
        Ok(response.error_for_status()?.bytes()?.to_vec())
    }

    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        tracing::debug!("PUT {path} ({} bytes)", data.len());
        self.request(reqwest::Method::PUT, path)?
            .body(data.to_vec())
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn exists(&self, path: &StoragePath) -> Result<bool> {
        let response = self.request(reqwest::Method::HEAD, path)?.send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    fn backend_type(&self) -> &'static str {
        "gcs"
    }
}

/// In-memory backend for tests.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for InMemoryBackend {
    fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        self.objects
            .read()
            .map_err(|e| GanError::Storage(e.to_string()))?
            .get(&path.to_string())
            .cloned()
            .ok_or_else(|| GanError::Storage(format!("'{path}' not found")))
    }

    fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        self.objects
            .write()
            .map_err(|e| GanError::Storage(e.to_string()))?
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&self, path: &StoragePath) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .map_err(|e| GanError::Storage(e.to_string()))?
            .contains_key(&path.to_string()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Routes local paths and bucket objects to their backends.
#[derive(Clone)]
pub struct Storage {
    local: Arc<dyn ObjectStore>,
    bucket: Arc<dyn ObjectStore>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("local", &self.local.backend_type())
            .field("bucket", &self.bucket.backend_type())
            .finish()
    }
}

impl Storage {
    /// Local filesystem plus GCS.
    ///
    /// # Errors
    ///
    /// Returns an error if the GCS client cannot be built.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Ok(Self::with_backends(
            Arc::new(LocalBackend),
            Arc::new(GcsBackend::new(config)?),
        ))
    }

    /// Explicit backends.
    #[must_use]
    pub fn with_backends(local: Arc<dyn ObjectStore>, bucket: Arc<dyn ObjectStore>) -> Self {
        Self { local, bucket }
    }

    /// One shared in-memory backend for every path.
    #[must_use]
    pub fn in_memory() -> Self {
        let memory: Arc<dyn ObjectStore> = Arc::new(InMemoryBackend::new());
        Self::with_backends(Arc::clone(&memory), memory)
    }

    fn backend(&self, path: &StoragePath) -> &dyn ObjectStore {
        if path.is_bucket() {
            self.bucket.as_ref()
        } else {
            self.local.as_ref()
        }
    }

    /// Read an object.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        self.backend(path).get(path)
    }

    /// Write an object.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn put(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        self.backend(path).put(path, data)
    }

    /// Whether an object exists.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn exists(&self, path: &StoragePath) -> Result<bool> {
        self.backend(path).exists(path)
    }
}
