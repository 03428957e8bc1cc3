//! Order persistence.
//!
//! All orders live in a single document keyed by order reference. The
//! in-process [`OrderStore`] is the only writer: every mutation takes the
//! writer lock, is persisted, and only then becomes visible to readers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::Order;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("order store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("order store document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("order {0} already exists")]
    Duplicate(String),

    #[error("order store write rejected: {0}")]
    WriteRejected(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::StorageError(anyhow::Error::new(err))
    }
}

/// The persisted document: `{"orders": {"<reference>": {...}}}`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub orders: BTreeMap<String, Order>,
}

#[async_trait]
pub trait OrderPersistence: Send + Sync {
    async fn load_all(&self) -> Result<OrderBook, StorageError>;
    async fn persist_all(&self, book: &OrderBook) -> Result<(), StorageError>;
}

/// JSON document on local disk, replaced atomically on every write.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl OrderPersistence for JsonFilePersistence {
    async fn load_all(&self) -> Result<OrderBook, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let book: OrderBook = serde_json::from_slice(&bytes)?;
                tracing::info!(
                    path = %self.path.display(),
                    orders = book.orders.len(),
                    "Order store loaded"
                );
                Ok(book)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Order store not found, creating empty one");
                let book = OrderBook::default();
                self.persist_all(&book).await?;
                Ok(book)
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn persist_all(&self, book: &OrderBook) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(book)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        Ok(())
    }
}

/// Keeps the last persisted document in memory. Used in tests.
#[derive(Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<OrderBook>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(book: OrderBook) -> Self {
        Self {
            snapshot: Mutex::new(book),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> OrderBook {
        self.snapshot
            .lock()
            .map(|book| book.clone())
            .unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail, to exercise error paths.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderPersistence for MemoryPersistence {
    async fn load_all(&self) -> Result<OrderBook, StorageError> {
        Ok(self.snapshot())
    }

    async fn persist_all(&self, book: &OrderBook) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected("memory store is read-only".to_string()));
        }
        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = book.clone();
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct OrderStore {
    book: Arc<RwLock<OrderBook>>,
    persistence: Arc<dyn OrderPersistence>,
}

impl OrderStore {
    /// Load the backing document. A missing document starts empty; an
    /// unreadable one is an error.
    pub async fn open(persistence: Arc<dyn OrderPersistence>) -> Result<Self, StorageError> {
        let book = persistence.load_all().await?;
        Ok(Self {
            book: Arc::new(RwLock::new(book)),
            persistence,
        })
    }

    pub async fn get(&self, reference: &str) -> Option<Order> {
        self.book.read().await.orders.get(reference).cloned()
    }

    /// Insert or replace an order.
    pub async fn put(&self, order: Order) -> Result<(), StorageError> {
        let mut book = self.book.write().await;
        let reference = order.reference.clone();
        let previous = book.orders.insert(reference.clone(), order);

        if let Err(e) = self.persistence.persist_all(&book).await {
            match previous {
                Some(previous) => book.orders.insert(reference, previous),
                None => book.orders.remove(&reference),
            };
            return Err(e);
        }

        Ok(())
    }

    /// Insert an order whose reference must not exist yet.
    pub async fn insert_new(&self, order: Order) -> Result<(), StorageError> {
        let mut book = self.book.write().await;
        if book.orders.contains_key(&order.reference) {
            return Err(StorageError::Duplicate(order.reference));
        }

        let reference = order.reference.clone();
        book.orders.insert(reference.clone(), order);

        if let Err(e) = self.persistence.persist_all(&book).await {
            book.orders.remove(&reference);
            return Err(e);
        }

        Ok(())
    }

    /// Atomic read-modify-write of one order.
    ///
    /// Concurrent updates are serialized; the closure always observes the
    /// latest committed state. Returns `None` when the reference is unknown.
    pub async fn update<F, T>(&self, reference: &str, f: F) -> Result<Option<T>, StorageError>
    where
        F: FnOnce(&mut Order) -> T + Send,
        T: Send,
    {
        let mut book = self.book.write().await;
        let Some(order) = book.orders.get_mut(reference) else {
            return Ok(None);
        };

        let before = order.clone();
        let result = f(order);

        if *order == before {
            return Ok(Some(result));
        }

        if let Err(e) = self.persistence.persist_all(&book).await {
            book.orders.insert(reference.to_string(), before);
            return Err(e);
        }

        Ok(Some(result))
    }

    pub async fn len(&self) -> usize {
        self.book.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current document, as a copy.
    pub async fn load_all(&self) -> OrderBook {
        self.book.read().await.clone()
    }

    pub async fn persist_all(&self) -> Result<(), StorageError> {
        let book = self.book.read().await;
        self.persistence.persist_all(&book).await
    }
}
