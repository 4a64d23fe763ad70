use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use sqlx::{Pool, Sqlite, sqlite::SqliteConnectOptions, sqlite::SqlitePool};

use crate::model::Document;
use crate::store::DiagramStore;

/// The single key the document is mirrored under.
pub const DOCUMENT_KEY: &str = "mindmap-data";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let path = std::env::var("MINDCANVAS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_database_path());
        Self { path }
    }
}

fn default_database_path() -> PathBuf {
    ProjectDirs::from("", "", "mindcanvas")
        .map(|dirs| dirs.data_dir().join("mindcanvas.db"))
        .unwrap_or_else(|| PathBuf::from("mindcanvas.db"))
}

/// Host-side persistence for the diagram document.
///
/// Mutations never write by themselves; the host saves after each change.
#[derive(Debug, Clone)]
pub enum Storage {
    Sqlite(SqliteStorage),
    File(FileStorage),
}

impl Storage {
    /// A plain file when `file` is given, otherwise SQLite at `db` or the
    /// configured default path.
    pub async fn open(db: Option<PathBuf>, file: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = file {
            return Ok(Storage::File(FileStorage::new(path)));
        }
        let mut config = StorageConfig::default();
        if let Some(path) = db {
            config.path = path;
        }
        Ok(Storage::Sqlite(SqliteStorage::new(&config).await?))
    }

    pub fn location(&self) -> &Path {
        match self {
            Storage::Sqlite(db) => &db.path,
            Storage::File(file) => &file.path,
        }
    }

    pub async fn load(&self) -> Result<Option<String>> {
        match self {
            Storage::Sqlite(db) => db.load(DOCUMENT_KEY).await,
            Storage::File(file) => file.load().await,
        }
    }

    pub async fn save(&self, content: &str) -> Result<()> {
        match self {
            Storage::Sqlite(db) => db.save(DOCUMENT_KEY, content).await,
            Storage::File(file) => file.save(content).await,
        }
    }

    /// When the document was last saved, if it ever was.
    pub async fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self {
            Storage::Sqlite(db) => db.updated_at(DOCUMENT_KEY).await,
            Storage::File(file) => file.updated_at().await,
        }
    }

    /// Stored document, or the starter document when nothing usable is
    /// stored.
    pub async fn load_document(&self) -> Document {
        match self.load().await {
            Ok(Some(content)) => match DiagramStore::deserialize(&content) {
                Ok(document) => document,
                Err(err) => {
                    log::warn!("stored document is malformed, starting fresh: {err:#}");
                    Document::starter()
                }
            },
            Ok(None) => Document::starter(),
            Err(err) => {
                log::warn!("failed to read stored document, starting fresh: {err:#}");
                Document::starter()
            }
        }
    }

    pub async fn save_store(&self, store: &DiagramStore) -> Result<()> {
        let content = store.serialize()?;
        self.save(&content).await
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
    path: PathBuf,
}

impl SqliteStorage {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create data directory '{}'", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let db = Self {
            pool,
            path: config.path.clone(),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY NOT NULL,
                content TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create documents table")?;
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Option<String>> {
        let content: Option<String> =
            sqlx::query_scalar("SELECT content FROM documents WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load document")?;
        Ok(content)
    }

    pub async fn save(&self, key: &str, content: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO documents (key, content, updated_at) VALUES (?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(content)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save document")?;
        Ok(())
    }

    pub async fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT updated_at FROM documents WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read document timestamp")?;
        Ok(raw.and_then(|value| value.parse().ok()))
    }
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read '{}'", self.path.display()))
            }
        }
    }

    pub async fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => {
                let modified = metadata.modified().with_context(|| {
                    format!("no modification time for '{}'", self.path.display())
                })?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to inspect '{}'", self.path.display()))
            }
        }
    }

    pub async fn save(&self, content: &str) -> Result<()> {
        tokio::fs::write(&self.path, content.as_bytes())
            .await
            .with_context(|| format!("failed to write '{}'", self.path.display()))
    }
}
