//! SQLite Media Store
//!
//! Persistent storage for every node's asset records in one database.
//! Provenance lives on the asset row; the replication ledger is a separate
//! normalized table keyed by (owner node, asset, target node), so "is this
//! original synced to node X" is an exact key lookup.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::id::{AssetId, AssetRef, NodeId};
use crate::media::{AssetMetadata, AssetRecord, NewAsset, Provenance, ReplicationLedger, UnsyncedSet};
use crate::network::RelationshipGraph;
use crate::store::MediaStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    node_id INTEGER PRIMARY KEY,
    base_url TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS asset_sequences (
    node_id INTEGER PRIMARY KEY,
    last_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS assets (
    node_id INTEGER NOT NULL,
    asset_id INTEGER NOT NULL,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    guid TEXT NOT NULL,
    parent_id INTEGER,
    source_node INTEGER,
    source_asset_id INTEGER,
    uploaded_at TEXT NOT NULL,
    PRIMARY KEY (node_id, asset_id),
    CHECK ((source_node IS NULL) = (source_asset_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_assets_source
    ON assets(node_id, source_node, source_asset_id);

CREATE TABLE IF NOT EXISTS replication_ledger (
    owner_node INTEGER NOT NULL,
    asset_id INTEGER NOT NULL,
    target_node INTEGER NOT NULL,
    copy_id INTEGER NOT NULL,
    recorded_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (owner_node, asset_id, target_node)
);

CREATE TABLE IF NOT EXISTS network_options (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
"#;

const ASSET_COLUMNS: &str = "asset_id, file_name, mime_type, title, status, guid, parent_id, \
                             source_node, source_asset_id, uploaded_at";

/// Media store backed by SQLite
pub struct SqliteStore {
    /// Database connection
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the store database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn to_sql_id(id: u64) -> i64 {
    id as i64
}

/// Read one asset row (selected with ASSET_COLUMNS) plus its ledger
fn load_record(conn: &Connection, node: NodeId, id: AssetId) -> Result<Option<AssetRecord>> {
    let sql = format!(
        "SELECT {} FROM assets WHERE node_id = ?1 AND asset_id = ?2",
        ASSET_COLUMNS
    );
    let row = conn
        .query_row(&sql, params![to_sql_id(node.0), to_sql_id(id.0)], read_row)
        .optional()?;

    let Some((id, metadata, provenance, uploaded_at)) = row else {
        return Ok(None);
    };

    let ledger = match provenance {
        Provenance::Original => load_ledger(conn, node, id)?,
        Provenance::Copy { .. } => ReplicationLedger::new(),
    };

    Ok(Some(AssetRecord::new(node, id, metadata, uploaded_at, provenance, ledger)))
}

type AssetRow = (AssetId, AssetMetadata, Provenance, DateTime<Utc>);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRow> {
    let id = AssetId(row.get::<_, i64>(0)? as u64);
    let metadata = AssetMetadata {
        file_name: row.get(1)?,
        mime_type: row.get(2)?,
        title: row.get(3)?,
        status: row.get(4)?,
        guid: row.get(5)?,
        parent: row.get::<_, Option<i64>>(6)?.map(|p| AssetId(p as u64)),
    };
    let provenance = match (row.get::<_, Option<i64>>(7)?, row.get::<_, Option<i64>>(8)?) {
        (Some(node), Some(asset)) => Provenance::Copy {
            source_node: NodeId(node as u64),
            source_asset_id: AssetId(asset as u64),
        },
        _ => Provenance::Original,
    };
    let uploaded_at: DateTime<Utc> = row.get(9)?;
    Ok((id, metadata, provenance, uploaded_at))
}

fn load_ledger(conn: &Connection, node: NodeId, id: AssetId) -> Result<ReplicationLedger> {
    let mut stmt = conn.prepare(
        "SELECT target_node, copy_id FROM replication_ledger
         WHERE owner_node = ?1 AND asset_id = ?2 ORDER BY target_node",
    )?;
    let rows = stmt.query_map(params![to_sql_id(node.0), to_sql_id(id.0)], |row| {
        Ok((
            NodeId(row.get::<_, i64>(0)? as u64),
            AssetId(row.get::<_, i64>(1)? as u64),
        ))
    })?;

    let mut ledger = ReplicationLedger::new();
    for result in rows {
        let (target, copy) = result?;
        ledger.record(target, copy);
    }
    Ok(ledger)
}

#[async_trait]
impl MediaStore for SqliteStore {
    async fn register_node(&self, node: NodeId, base_url: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO nodes (node_id, base_url) VALUES (?1, ?2)
            ON CONFLICT(node_id) DO UPDATE SET base_url = ?2, updated_at = CURRENT_TIMESTAMP
            "#,
            params![to_sql_id(node.0), base_url.trim_end_matches('/')],
        )?;
        Ok(())
    }

    async fn node_url(&self, node: NodeId) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let url = conn
            .query_row(
                "SELECT base_url FROM nodes WHERE node_id = ?1",
                params![to_sql_id(node.0)],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(url)
    }

    async fn list_nodes(&self) -> Result<Vec<(NodeId, String)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT node_id, base_url FROM nodes ORDER BY node_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((NodeId(row.get::<_, i64>(0)? as u64), row.get::<_, String>(1)?))
        })?;

        let mut nodes = Vec::new();
        for result in rows {
            nodes.push(result?);
        }
        Ok(nodes)
    }

    async fn insert_asset(&self, node: NodeId, asset: NewAsset) -> Result<AssetId> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO asset_sequences (node_id, last_id) VALUES (?1, 1)
            ON CONFLICT(node_id) DO UPDATE SET last_id = last_id + 1
            "#,
            params![to_sql_id(node.0)],
        )?;
        let id: i64 = tx.query_row(
            "SELECT last_id FROM asset_sequences WHERE node_id = ?1",
            params![to_sql_id(node.0)],
            |row| row.get(0),
        )?;

        let (source_node, source_asset) = match asset.provenance {
            Provenance::Original => (None, None),
            Provenance::Copy { source_node, source_asset_id } => {
                (Some(to_sql_id(source_node.0)), Some(to_sql_id(source_asset_id.0)))
            }
        };
        let meta = &asset.metadata;
        tx.execute(
            r#"
            INSERT INTO assets (node_id, asset_id, file_name, mime_type, title, status, guid,
                                parent_id, source_node, source_asset_id, uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                to_sql_id(node.0),
                id,
                meta.file_name,
                meta.mime_type,
                meta.title,
                meta.status,
                meta.guid,
                meta.parent.map(|p| to_sql_id(p.0)),
                source_node,
                source_asset,
                asset.uploaded_at,
            ],
        )?;

        tx.commit()?;
        Ok(AssetId(id as u64))
    }

    async fn get_asset(&self, node: NodeId, id: AssetId) -> Result<Option<AssetRecord>> {
        let conn = self.conn.lock().await;
        load_record(&conn, node, id)
    }

    async fn list_assets(&self, node: NodeId) -> Result<Vec<AssetRecord>> {
        let conn = self.conn.lock().await;
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare("SELECT asset_id FROM assets WHERE node_id = ?1 ORDER BY asset_id")?;
            let rows = stmt.query_map(params![to_sql_id(node.0)], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = load_record(&conn, node, AssetId(id as u64))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn find_copy_of(&self, node: NodeId, original: AssetRef) -> Result<Option<AssetId>> {
        let conn = self.conn.lock().await;
        let id = conn
            .query_row(
                r#"
                SELECT asset_id FROM assets
                WHERE node_id = ?1 AND source_node = ?2 AND source_asset_id = ?3
                ORDER BY uploaded_at ASC, asset_id ASC
                LIMIT 1
                "#,
                params![
                    to_sql_id(node.0),
                    to_sql_id(original.node.0),
                    to_sql_id(original.asset.0)
                ],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(|id| AssetId(id as u64)))
    }

    async fn unsynced_originals(&self, node: NodeId, target: NodeId, limit: usize) -> Result<UnsyncedSet> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        const UNSYNCED: &str = r#"
            FROM assets a
            WHERE a.node_id = ?1
              AND a.source_node IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM replication_ledger l
                  WHERE l.owner_node = a.node_id
                    AND l.asset_id = a.asset_id
                    AND l.target_node = ?2
              )
        "#;

        let total: i64 = tx.query_row(
            &format!("SELECT COUNT(*) {}", UNSYNCED),
            params![to_sql_id(node.0), to_sql_id(target.0)],
            |row| row.get(0),
        )?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT a.asset_id {} ORDER BY a.asset_id ASC LIMIT ?3",
                UNSYNCED
            ))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt.query_map(
                params![to_sql_id(node.0), to_sql_id(target.0), limit],
                |row| row.get(0),
            )?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = load_record(&tx, node, AssetId(id as u64))? {
                items.push(record);
            }
        }

        tx.commit()?;
        Ok(UnsyncedSet {
            items,
            total_unsynced: total as u64,
        })
    }

    async fn count_originals(&self, node: NodeId) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM assets WHERE node_id = ?1 AND source_node IS NULL",
            params![to_sql_id(node.0)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn record_ledger(&self, node: NodeId, id: AssetId, ledger: &ReplicationLedger) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let source: Option<Option<i64>> = tx
            .query_row(
                "SELECT source_node FROM assets WHERE node_id = ?1 AND asset_id = ?2",
                params![to_sql_id(node.0), to_sql_id(id.0)],
                |row| row.get(0),
            )
            .optional()?;

        match source {
            None => return Err(Error::AssetNotFound { node, asset: id }),
            Some(Some(_)) => return Err(Error::ProvenanceViolation { node, asset: id }),
            Some(None) => {}
        }

        for (target, copy) in ledger.iter() {
            tx.execute(
                r#"
                INSERT INTO replication_ledger (owner_node, asset_id, target_node, copy_id)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(owner_node, asset_id, target_node) DO NOTHING
                "#,
                params![
                    to_sql_id(node.0),
                    to_sql_id(id.0),
                    to_sql_id(target.0),
                    to_sql_id(copy.0)
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn delete_asset(&self, node: NodeId, id: AssetId) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM replication_ledger WHERE owner_node = ?1 AND asset_id = ?2",
            params![to_sql_id(node.0), to_sql_id(id.0)],
        )?;
        let deleted = tx.execute(
            "DELETE FROM assets WHERE node_id = ?1 AND asset_id = ?2",
            params![to_sql_id(node.0), to_sql_id(id.0)],
        )?;

        tx.commit()?;
        Ok(deleted > 0)
    }

    async fn load_relationships(&self) -> Result<RelationshipGraph> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT key, value FROM network_options WHERE key GLOB 'site_*'")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut links = Vec::new();
        for result in rows {
            let (key, value) = result?;
            let Some(node) = NodeId::from_option_key(&key) else {
                tracing::warn!("Ignoring malformed relationship key '{}'", key);
                continue;
            };
            let peers: Vec<NodeId> = serde_json::from_str(&value)?;
            links.push((node, peers));
        }

        Ok(RelationshipGraph::from_links(links))
    }

    async fn save_relationships(&self, graph: &RelationshipGraph) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM network_options WHERE key GLOB 'site_*'", [])?;
        for (key, peers) in graph.to_option_map() {
            tx.execute(
                "INSERT INTO network_options (key, value) VALUES (?1, ?2)",
                params![key, serde_json::to_string(&peers)?],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
