//! Embedded property-graph engine on SQLite.
//!
//! Schema:
//!   - vertices / vertex_props: labeled vertices with typed properties
//!   - edges / edge_props: directed labeled edges, unique per
//!     (label, out_vertex, in_vertex)
//!
//! Multi-valued properties are one row per element; a property read back
//! from a single row is a scalar. Property values are compared as strings.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::Result;
use crate::graph::{
    edge, prop, Direction, EdgeRecord, Filters, GraphStore, PropMap, Vertex,
};

/// SQLite-backed graph store
pub struct SqliteGraph {
    conn: Mutex<Connection>,
}

impl SqliteGraph {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL for read-write concurrency; cascading FKs so that dropping a
        // vertex drops its properties and incident edges.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vertices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS vertex_props (
                vertex_id INTEGER NOT NULL REFERENCES vertices(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                pos INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                out_vertex INTEGER NOT NULL REFERENCES vertices(id) ON DELETE CASCADE,
                in_vertex INTEGER NOT NULL REFERENCES vertices(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS edge_props (
                edge_id INTEGER NOT NULL REFERENCES edges(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                pos INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_vertices_label ON vertices(label);
            CREATE INDEX IF NOT EXISTS idx_vertex_props_vertex ON vertex_props(vertex_id);
            CREATE INDEX IF NOT EXISTS idx_vertex_props_lookup ON vertex_props(name, value);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_identity
                ON edges(label, out_vertex, in_vertex);
            CREATE INDEX IF NOT EXISTS idx_edges_out ON edges(out_vertex);
            CREATE INDEX IF NOT EXISTS idx_edges_in ON edges(in_vertex);
            CREATE INDEX IF NOT EXISTS idx_edge_props_edge ON edge_props(edge_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn encode_prop(value: &Value) -> (&'static str, String) {
    match value {
        Value::String(s) => ("s", s.clone()),
        Value::Bool(b) => ("b", b.to_string()),
        Value::Number(n) => ("n", n.to_string()),
        other => ("j", other.to_string()),
    }
}

fn decode_prop(kind: &str, raw: &str) -> Value {
    match kind {
        "b" => Value::Bool(raw == "true"),
        "n" | "j" => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        }
        _ => Value::String(raw.to_string()),
    }
}

fn now_instant() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_instant(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Newest first: `lastUpdated` descending, `versionId` descending.
fn sort_versions_desc(versions: &mut [Vertex]) {
    versions.sort_by_key(|v| {
        let ts = v.prop_str(prop::LAST_UPDATED).map(parse_instant).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let vid: i64 = v
            .prop_str(prop::VERSION_ID)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        std::cmp::Reverse((ts, vid))
    });
}

fn write_vertex_props(conn: &Connection, vertex_id: i64, props: &PropMap) -> Result<()> {
    for (name, value) in props {
        conn.execute(
            "DELETE FROM vertex_props WHERE vertex_id = ? AND name = ?",
            params![vertex_id, name],
        )?;
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for (pos, item) in items.iter().enumerate() {
                    let (kind, raw) = encode_prop(item);
                    conn.execute(
                        "INSERT INTO vertex_props (vertex_id, name, pos, kind, value) \
                         VALUES (?, ?, ?, ?, ?)",
                        params![vertex_id, name, pos as i64, kind, raw],
                    )?;
                }
            }
            scalar => {
                let (kind, raw) = encode_prop(scalar);
                conn.execute(
                    "INSERT INTO vertex_props (vertex_id, name, pos, kind, value) \
                     VALUES (?, ?, 0, ?, ?)",
                    params![vertex_id, name, kind, raw],
                )?;
            }
        }
    }
    Ok(())
}

fn group_props(rows: Vec<(String, String, String)>) -> PropMap {
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (name, kind, raw) in rows {
        grouped.entry(name).or_default().push(decode_prop(&kind, &raw));
    }
    grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            (name, value)
        })
        .collect()
}

fn read_vertex(conn: &Connection, id: i64) -> Result<Option<Vertex>> {
    let label: Option<String> = conn
        .query_row("SELECT label FROM vertices WHERE id = ?", params![id], |r| {
            r.get(0)
        })
        .optional()?;
    let label = match label {
        Some(l) => l,
        None => return Ok(None),
    };

    let mut stmt = conn.prepare(
        "SELECT name, kind, value FROM vertex_props WHERE vertex_id = ? ORDER BY name, pos",
    )?;
    let rows = stmt
        .query_map(params![id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(Vertex {
        id,
        label,
        properties: group_props(rows),
    }))
}

fn read_vertices(conn: &Connection, ids: &[i64]) -> Result<Vec<Vertex>> {
    let mut vertices = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(v) = read_vertex(conn, *id)? {
            vertices.push(v);
        }
    }
    Ok(vertices)
}

fn insert_vertex(conn: &Connection, label: &str, props: &PropMap) -> Result<i64> {
    conn.execute("INSERT INTO vertices (label) VALUES (?)", params![label])?;
    let id = conn.last_insert_rowid();
    write_vertex_props(conn, id, props)?;
    Ok(id)
}

fn select_vertex_ids(
    conn: &Connection,
    label: &str,
    filters: &Filters,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<i64>> {
    let mut sql = String::from("SELECT v.id FROM vertices v WHERE v.label = ?");
    let mut args: Vec<String> = vec![label.to_string()];
    for (name, value) in filters {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM vertex_props p \
             WHERE p.vertex_id = v.id AND p.name = ? AND p.value = ?)",
        );
        args.push(name.clone());
        args.push(value.clone());
    }
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    sql.push_str(&format!(" ORDER BY v.id LIMIT {} OFFSET {}", limit, offset));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |r| r.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count_by_label(conn: &Connection, label: &str, filters: &Filters) -> Result<i64> {
    let mut sql = String::from("SELECT COUNT(*) FROM vertices v WHERE v.label = ?");
    let mut args: Vec<String> = vec![label.to_string()];
    for (name, value) in filters {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM vertex_props p \
             WHERE p.vertex_id = v.id AND p.name = ? AND p.value = ?)",
        );
        args.push(name.clone());
        args.push(value.clone());
    }
    let count =
        conn.query_row(&sql, params_from_iter(args.iter()), |r| r.get::<_, i64>(0))?;
    Ok(count)
}

fn first_vertex_id(
    conn: &Connection,
    label: &str,
    key: &str,
    value: &str,
) -> Result<Option<i64>> {
    let filters = [(key.to_string(), value.to_string())];
    Ok(select_vertex_ids(conn, label, &filters, Some(1), 0)?.into_iter().next())
}

fn write_edge_props(conn: &Connection, edge_id: i64, props: &PropMap) -> Result<()> {
    for (name, value) in props {
        conn.execute(
            "DELETE FROM edge_props WHERE edge_id = ? AND name = ?",
            params![edge_id, name],
        )?;
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for (pos, item) in items.iter().enumerate() {
                    let (kind, raw) = encode_prop(item);
                    conn.execute(
                        "INSERT INTO edge_props (edge_id, name, pos, kind, value) \
                         VALUES (?, ?, ?, ?, ?)",
                        params![edge_id, name, pos as i64, kind, raw],
                    )?;
                }
            }
            scalar => {
                let (kind, raw) = encode_prop(scalar);
                conn.execute(
                    "INSERT INTO edge_props (edge_id, name, pos, kind, value) \
                     VALUES (?, ?, 0, ?, ?)",
                    params![edge_id, name, kind, raw],
                )?;
            }
        }
    }
    Ok(())
}

fn read_edge_props(conn: &Connection, edge_id: i64) -> Result<PropMap> {
    let mut stmt = conn.prepare(
        "SELECT name, kind, value FROM edge_props WHERE edge_id = ? ORDER BY name, pos",
    )?;
    let rows = stmt
        .query_map(params![edge_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(group_props(rows))
}

fn insert_edge(
    conn: &Connection,
    label: &str,
    out: i64,
    into: i64,
    props: &PropMap,
) -> Result<()> {
    // The unique (label, out, in) index makes re-insertion a no-op.
    conn.execute(
        "INSERT OR IGNORE INTO edges (label, out_vertex, in_vertex) VALUES (?, ?, ?)",
        params![label, out, into],
    )?;
    let edge_id: i64 = conn.query_row(
        "SELECT id FROM edges WHERE label = ? AND out_vertex = ? AND in_vertex = ?",
        params![label, out, into],
        |r| r.get(0),
    )?;
    write_edge_props(conn, edge_id, props)
}

fn neighbor_ids(
    conn: &Connection,
    id: i64,
    direction: Direction,
    edge_label: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<i64>> {
    let (select_col, where_col) = match direction {
        Direction::Out => ("in_vertex", "out_vertex"),
        Direction::In => ("out_vertex", "in_vertex"),
    };
    let mut sql = format!(
        "SELECT DISTINCT {} FROM edges WHERE {} = ?",
        select_col, where_col
    );
    let mut args: Vec<String> = vec![id.to_string()];
    if let Some(label) = edge_label {
        sql.push_str(" AND label = ?");
        args.push(label.to_string());
    }
    sql.push_str(&format!(
        " ORDER BY {} LIMIT {}",
        select_col,
        limit.map(|l| l as i64).unwrap_or(-1)
    ));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |r| r.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn versions_of(conn: &Connection, label: &str, fhir_id: &str) -> Result<Vec<Vertex>> {
    let ids = select_vertex_ids(
        conn,
        label,
        &[(prop::ID.to_string(), fhir_id.to_string())],
        None,
        0,
    )?;
    let vertices = read_vertices(conn, &ids)?;
    Ok(vertices
        .into_iter()
        .filter(|v| v.prop_str(prop::VERSION_ID).is_some())
        .collect())
}

fn current_version_sync(conn: &Connection, label: &str, fhir_id: &str) -> Result<Option<Vertex>> {
    let filters = [
        (prop::ID.to_string(), fhir_id.to_string()),
        (prop::IS_CURRENT.to_string(), "true".to_string()),
    ];
    let ids = select_vertex_ids(conn, label, &filters, Some(1), 0)?;
    match ids.first() {
        Some(id) => read_vertex(conn, *id),
        None => Ok(None),
    }
}

fn next_version_number_sync(conn: &Connection, label: &str, fhir_id: &str) -> Result<i64> {
    let max = versions_of(conn, label, fhir_id)?
        .iter()
        .filter_map(|v| v.prop_str(prop::VERSION_ID))
        .filter_map(|s| s.parse::<i64>().ok())
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

fn mark_non_current_sync(conn: &Connection, label: &str, fhir_id: &str) -> Result<bool> {
    let filters = [
        (prop::ID.to_string(), fhir_id.to_string()),
        (prop::IS_CURRENT.to_string(), "true".to_string()),
    ];
    let ids = select_vertex_ids(conn, label, &filters, None, 0)?;
    for id in &ids {
        conn.execute(
            "UPDATE vertex_props SET kind = 'b', value = 'false' \
             WHERE vertex_id = ? AND name = ?",
            params![id, prop::IS_CURRENT],
        )?;
    }
    Ok(!ids.is_empty())
}

fn create_versioned_sync(
    conn: &Connection,
    label: &str,
    fhir_id: &str,
    mut props: PropMap,
) -> Result<(i64, i64)> {
    let next = next_version_number_sync(conn, label, fhir_id)?;
    let prev = current_version_sync(conn, label, fhir_id)?;
    if prev.is_some() {
        mark_non_current_sync(conn, label, fhir_id)?;
    }

    // A pending placeholder target becomes version 1 in place, so edges
    // already pointing at it keep pointing at the real resource.
    let placeholder = if next == 1 {
        let filters = [
            (prop::ID.to_string(), fhir_id.to_string()),
            (prop::IS_PLACEHOLDER.to_string(), "true".to_string()),
        ];
        select_vertex_ids(conn, label, &filters, Some(1), 0)?.into_iter().next()
    } else {
        None
    };

    props.insert(prop::ID.to_string(), Value::String(fhir_id.to_string()));
    props.insert(
        prop::VERSION_ID.to_string(),
        Value::String(next.to_string()),
    );
    props.insert(prop::LAST_UPDATED.to_string(), Value::String(now_instant()));
    props.insert(prop::IS_CURRENT.to_string(), Value::Bool(true));

    let vertex_id = match placeholder {
        Some(id) => {
            props.insert(prop::IS_PLACEHOLDER.to_string(), Value::Bool(false));
            write_vertex_props(conn, id, &props)?;
            id
        }
        None => insert_vertex(conn, label, &props)?,
    };

    if let Some(prev) = prev {
        insert_edge(conn, edge::SUPERSEDES, vertex_id, prev.id, &PropMap::new())?;
    }

    Ok((vertex_id, next))
}

#[async_trait]
impl GraphStore for SqliteGraph {
    async fn add_vertex(&self, label: &str, props: PropMap) -> Result<Vertex> {
        let conn = self.conn.lock().unwrap();
        let id = insert_vertex(&conn, label, &props)?;
        read_vertex(&conn, id)?
            .ok_or_else(|| crate::error::StoreError::Other(format!("vertex {} not readable", id)))
    }

    async fn add_vertex_returning_id(&self, label: &str, props: PropMap) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        insert_vertex(&conn, label, &props)
    }

    async fn vertex_by_id(&self, id: i64) -> Result<Option<Vertex>> {
        let conn = self.conn.lock().unwrap();
        read_vertex(&conn, id)
    }

    async fn update_vertex_properties(&self, id: i64, props: PropMap) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM vertices WHERE id = ?", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Ok(false);
        }
        write_vertex_props(&conn, id, &props)?;
        Ok(true)
    }

    async fn delete_vertex(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM vertices WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    async fn count_vertices(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM vertices", [], |r| r.get(0))?;
        Ok(count)
    }

    async fn drop_all(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vertices", [], |r| r.get(0))?;
        conn.execute("DELETE FROM vertices", [])?;
        Ok(count)
    }

    async fn upsert_vertex_by_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
        props: PropMap,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        match first_vertex_id(&conn, label, key, value)? {
            Some(id) => {
                write_vertex_props(&conn, id, &props)?;
                Ok(id)
            }
            None => {
                let id = insert_vertex(&conn, label, &props)?;
                if !props.contains_key(key) {
                    let mut keyed = PropMap::new();
                    keyed.insert(key.to_string(), Value::String(value.to_string()));
                    write_vertex_props(&conn, id, &keyed)?;
                }
                Ok(id)
            }
        }
    }

    async fn vertex_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<Vertex>> {
        let conn = self.conn.lock().unwrap();
        match first_vertex_id(&conn, label, key, value)? {
            Some(id) => read_vertex(&conn, id),
            None => Ok(None),
        }
    }

    async fn vertex_id_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        first_vertex_id(&conn, label, key, value)
    }

    async fn add_edge(&self, label: &str, out: i64, into: i64, props: PropMap) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insert_edge(&conn, label, out, into, &props)
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_edge_by_property(
        &self,
        label: &str,
        out_label: &str,
        out_key: &str,
        out_value: &str,
        in_label: &str,
        in_key: &str,
        in_value: &str,
        props: PropMap,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let out = first_vertex_id(&conn, out_label, out_key, out_value)?;
        let into = first_vertex_id(&conn, in_label, in_key, in_value)?;
        match (out, into) {
            (Some(out), Some(into)) => {
                insert_edge(&conn, label, out, into, &props)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn edge_exists(&self, label: &str, out: i64, into: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE label = ? AND out_vertex = ? AND in_vertex = ?",
            params![label, out, into],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    async fn edges_for_vertex(&self, id: i64) -> Result<Vec<EdgeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut records = Vec::new();

        let mut stmt =
            conn.prepare("SELECT id, label, in_vertex FROM edges WHERE out_vertex = ? ORDER BY id")?;
        let out_rows = stmt
            .query_map(params![id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (edge_id, label, other) in out_rows {
            records.push(EdgeRecord {
                direction: Direction::Out,
                label,
                other_vertex: other,
                properties: read_edge_props(&conn, edge_id)?,
            });
        }

        let mut stmt =
            conn.prepare("SELECT id, label, out_vertex FROM edges WHERE in_vertex = ? ORDER BY id")?;
        let in_rows = stmt
            .query_map(params![id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (edge_id, label, other) in in_rows {
            records.push(EdgeRecord {
                direction: Direction::In,
                label,
                other_vertex: other,
                properties: read_edge_props(&conn, edge_id)?,
            });
        }

        Ok(records)
    }

    async fn vertices_by_label(
        &self,
        label: &str,
        filters: &Filters,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Vertex>> {
        let conn = self.conn.lock().unwrap();
        let ids = select_vertex_ids(&conn, label, filters, limit, offset)?;
        read_vertices(&conn, &ids)
    }

    async fn count_vertices_by_label(&self, label: &str, filters: &Filters) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        count_by_label(&conn, label, filters)
    }

    async fn out_neighbors(
        &self,
        id: i64,
        edge_label: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>> {
        let conn = self.conn.lock().unwrap();
        let ids = neighbor_ids(&conn, id, Direction::Out, edge_label, limit)?;
        read_vertices(&conn, &ids)
    }

    async fn in_neighbors(
        &self,
        id: i64,
        edge_label: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>> {
        let conn = self.conn.lock().unwrap();
        let ids = neighbor_ids(&conn, id, Direction::In, edge_label, limit)?;
        read_vertices(&conn, &ids)
    }

    async fn traverse(
        &self,
        start: i64,
        max_hops: u32,
        edge_label: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>> {
        let conn = self.conn.lock().unwrap();
        let mut visited: HashSet<i64> = HashSet::from([start]);
        let mut frontier = vec![start];
        let mut reached: Vec<i64> = Vec::new();
        let cap = limit.unwrap_or(usize::MAX);

        'hops: for _ in 0..max_hops {
            let mut next = Vec::new();
            for v in &frontier {
                let mut neighbors = neighbor_ids(&conn, *v, Direction::Out, edge_label, None)?;
                neighbors.extend(neighbor_ids(&conn, *v, Direction::In, edge_label, None)?);
                for n in neighbors {
                    if visited.insert(n) {
                        reached.push(n);
                        next.push(n);
                        if reached.len() >= cap {
                            break 'hops;
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        read_vertices(&conn, &reached)
    }

    async fn current_version(&self, label: &str, fhir_id: &str) -> Result<Option<Vertex>> {
        let conn = self.conn.lock().unwrap();
        current_version_sync(&conn, label, fhir_id)
    }

    async fn version(
        &self,
        label: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<Option<Vertex>> {
        let conn = self.conn.lock().unwrap();
        let filters = [
            (prop::ID.to_string(), fhir_id.to_string()),
            (prop::VERSION_ID.to_string(), version_id.to_string()),
        ];
        let ids = select_vertex_ids(&conn, label, &filters, Some(1), 0)?;
        match ids.first() {
            Some(id) => read_vertex(&conn, *id),
            None => Ok(None),
        }
    }

    async fn version_history(
        &self,
        label: &str,
        fhir_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Vertex>> {
        let conn = self.conn.lock().unwrap();
        let mut versions = versions_of(&conn, label, fhir_id)?;
        sort_versions_desc(&mut versions);
        if let Some(limit) = limit {
            versions.truncate(limit);
        }
        Ok(versions)
    }

    async fn type_history(
        &self,
        label: &str,
        limit: Option<usize>,
        since: Option<&str>,
    ) -> Result<Vec<Vertex>> {
        let conn = self.conn.lock().unwrap();
        let ids = select_vertex_ids(&conn, label, &[], None, 0)?;
        let mut versions: Vec<Vertex> = read_vertices(&conn, &ids)?
            .into_iter()
            .filter(|v| v.prop_str(prop::VERSION_ID).is_some())
            .collect();
        if let Some(since) = since {
            let cutoff = parse_instant(since);
            versions.retain(|v| {
                v.prop_str(prop::LAST_UPDATED)
                    .map(parse_instant)
                    .map(|ts| ts > cutoff)
                    .unwrap_or(false)
            });
        }
        sort_versions_desc(&mut versions);
        if let Some(limit) = limit {
            versions.truncate(limit);
        }
        Ok(versions)
    }

    async fn next_version_number(&self, label: &str, fhir_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        next_version_number_sync(&conn, label, fhir_id)
    }

    async fn mark_version_non_current(&self, label: &str, fhir_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        mark_non_current_sync(&conn, label, fhir_id)
    }

    async fn create_supersedes_edge(&self, newer: i64, older: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insert_edge(&conn, edge::SUPERSEDES, newer, older, &PropMap::new())
    }

    async fn create_versioned_vertex(
        &self,
        label: &str,
        fhir_id: &str,
        props: PropMap,
    ) -> Result<(i64, i64)> {
        let conn = self.conn.lock().unwrap();
        create_versioned_sync(&conn, label, fhir_id, props)
    }

    async fn create_tombstone(&self, label: &str, fhir_id: &str) -> Result<Option<(i64, i64)>> {
        let conn = self.conn.lock().unwrap();
        if current_version_sync(&conn, label, fhir_id)?.is_none() {
            return Ok(None);
        }
        let mut props = PropMap::new();
        props.insert(
            prop::RESOURCE_TYPE.to_string(),
            Value::String(label.to_string()),
        );
        props.insert(prop::IS_DELETED.to_string(), Value::Bool(true));
        Ok(Some(create_versioned_sync(&conn, label, fhir_id, props)?))
    }

    async fn delete_all_versions(&self, label: &str, fhir_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let ids = select_vertex_ids(
            &conn,
            label,
            &[(prop::ID.to_string(), fhir_id.to_string())],
            None,
            0,
        )?;
        let count = ids.len() as i64;
        for id in ids {
            conn.execute("DELETE FROM vertices WHERE id = ?", params![id])?;
        }
        Ok(count)
    }

    async fn delete_version(
        &self,
        label: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let filters = [
            (prop::ID.to_string(), fhir_id.to_string()),
            (prop::VERSION_ID.to_string(), version_id.to_string()),
        ];
        let ids = select_vertex_ids(&conn, label, &filters, Some(1), 0)?;
        match ids.first() {
            Some(id) => {
                conn.execute("DELETE FROM vertices WHERE id = ?", params![id])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
