//! AtoN node and link repository.
//!
//! # Invariants
//! - `upsert_node` replaces the full tag set of the node atomically.
//! - Link members keep their insertion order.

use crate::model::aton::{AtonLink, AtonLinkType, AtonNode, AtonTag, ATON_UID_KEY, SEAMARK_TYPE_KEY};
use crate::repo::{
    bool_to_int, ensure_connection_ready, int_to_bool, map_constraint_error, parse_uuid, RepoError,
    RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

const NODE_SELECT_SQL: &str = "SELECT
    id,
    lat,
    lon,
    user_name,
    visible,
    version,
    changeset,
    timestamp
FROM aton_nodes";

/// Listing options for AtoN nodes.
#[derive(Debug, Clone, Default)]
pub struct AtonListQuery {
    /// Matches `seamark:type` values starting with this prefix.
    pub seamark_type_prefix: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

pub trait AtonRepository {
    /// Inserts or replaces a node together with all its tags.
    fn upsert_node(&self, node: &AtonNode) -> RepoResult<()>;
    fn get_node(&self, id: i64) -> RepoResult<Option<AtonNode>>;
    fn get_node_by_uid(&self, uid: &str) -> RepoResult<Option<AtonNode>>;
    fn list_nodes(&self, query: &AtonListQuery) -> RepoResult<Vec<AtonNode>>;
    fn delete_node(&self, id: i64) -> RepoResult<()>;
    fn create_link(&self, link: &AtonLink) -> RepoResult<Uuid>;
    fn get_link(&self, link_id: Uuid) -> RepoResult<Option<AtonLink>>;
    fn links_for_node(&self, node_id: i64) -> RepoResult<Vec<AtonLink>>;
    fn delete_link(&self, link_id: Uuid) -> RepoResult<()>;
}

pub struct SqliteAtonRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAtonRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AtonRepository for SqliteAtonRepository<'_> {
    fn upsert_node(&self, node: &AtonNode) -> RepoResult<()> {
        node.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO aton_nodes (id, lat, lon, user_name, visible, version, changeset, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (id) DO UPDATE SET
                lat = excluded.lat,
                lon = excluded.lon,
                user_name = excluded.user_name,
                visible = excluded.visible,
                version = excluded.version,
                changeset = excluded.changeset,
                timestamp = excluded.timestamp;",
            params![
                node.id,
                node.lat,
                node.lon,
                node.user.as_deref(),
                bool_to_int(node.visible),
                node.version,
                node.changeset,
                node.timestamp,
            ],
        )?;
        tx.execute("DELETE FROM aton_tags WHERE node_id = ?1;", [node.id])?;
        for tag in &node.tags {
            tx.execute(
                "INSERT INTO aton_tags (node_id, k, v) VALUES (?1, ?2, ?3);",
                params![node.id, tag.k.as_str(), tag.v.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_node(&self, id: i64) -> RepoResult<Option<AtonNode>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NODE_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.load_node(row)?));
        }
        Ok(None)
    }

    fn get_node_by_uid(&self, uid: &str) -> RepoResult<Option<AtonNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NODE_SELECT_SQL}
             WHERE id IN (SELECT node_id FROM aton_tags WHERE k = ?1 AND v = ?2)
             ORDER BY id ASC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query(params![ATON_UID_KEY, uid])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.load_node(row)?));
        }
        Ok(None)
    }

    fn list_nodes(&self, query: &AtonListQuery) -> RepoResult<Vec<AtonNode>> {
        let mut sql = format!("{NODE_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(prefix) = query.seamark_type_prefix.as_ref() {
            sql.push_str(
                " AND id IN (SELECT node_id FROM aton_tags WHERE k = ? AND substr(v, 1, length(?)) = ?)",
            );
            bind_values.push(Value::Text(SEAMARK_TYPE_KEY.to_string()));
            bind_values.push(Value::Text(prefix.clone()));
            bind_values.push(Value::Text(prefix.clone()));
        }

        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ? OFFSET ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            bind_values.push(Value::Integer(i64::from(query.offset)));
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next()? {
            nodes.push(self.load_node(row)?);
        }
        Ok(nodes)
    }

    fn delete_node(&self, id: i64) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM aton_nodes WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::AtonNotFound(id));
        }
        Ok(())
    }

    fn create_link(&self, link: &AtonLink) -> RepoResult<Uuid> {
        if link.name.trim().is_empty() {
            return Err(RepoError::InvalidData("aton link name must not be blank".to_string()));
        }
        let tags_json = serde_json::to_string(&link.tags).map_err(|err| {
            RepoError::InvalidData(format!("cannot encode link {} tags: {err}", link.link_id))
        })?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO aton_links (link_id, name, link_type, tags_json) VALUES (?1, ?2, ?3, ?4);",
            params![
                link.link_id.to_string(),
                link.name.trim(),
                link.link_type.as_str(),
                tags_json,
            ],
        )
        .map_err(|err| map_constraint_error(err, format!("aton link {}", link.link_id)))?;

        for (position, node_id) in link.node_ids.iter().enumerate() {
            let node_exists: i64 = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM aton_nodes WHERE id = ?1);",
                [node_id],
                |row| row.get(0),
            )?;
            if node_exists != 1 {
                return Err(RepoError::AtonNotFound(*node_id));
            }
            tx.execute(
                "INSERT INTO aton_link_nodes (link_id, node_id, position) VALUES (?1, ?2, ?3);",
                params![link.link_id.to_string(), node_id, position as i64],
            )
            .map_err(|err| map_constraint_error(err, format!("aton link {}", link.link_id)))?;
        }
        tx.commit()?;
        Ok(link.link_id)
    }

    fn get_link(&self, link_id: Uuid) -> RepoResult<Option<AtonLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT link_id, name, link_type, tags_json FROM aton_links WHERE link_id = ?1;",
        )?;
        let mut rows = stmt.query([link_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.load_link(row)?));
        }
        Ok(None)
    }

    fn links_for_node(&self, node_id: i64) -> RepoResult<Vec<AtonLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT link_id, name, link_type, tags_json
             FROM aton_links
             WHERE link_id IN (SELECT link_id FROM aton_link_nodes WHERE node_id = ?1)
             ORDER BY name COLLATE NOCASE ASC, link_id ASC;",
        )?;
        let mut rows = stmt.query([node_id])?;
        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            links.push(self.load_link(row)?);
        }
        Ok(links)
    }

    fn delete_link(&self, link_id: Uuid) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM aton_links WHERE link_id = ?1;",
            [link_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::LinkNotFound(link_id));
        }
        Ok(())
    }
}

impl SqliteAtonRepository<'_> {
    fn load_node(&self, row: &Row<'_>) -> RepoResult<AtonNode> {
        let id: i64 = row.get("id")?;
        let mut tag_stmt = self
            .conn
            .prepare("SELECT k, v FROM aton_tags WHERE node_id = ?1 ORDER BY rowid ASC;")?;
        let mut tag_rows = tag_stmt.query([id])?;
        let mut tags = Vec::new();
        while let Some(tag_row) = tag_rows.next()? {
            tags.push(AtonTag {
                k: tag_row.get(0)?,
                v: tag_row.get(1)?,
            });
        }

        Ok(AtonNode {
            id,
            lat: row.get("lat")?,
            lon: row.get("lon")?,
            user: row.get("user_name")?,
            visible: int_to_bool(row.get("visible")?, "aton_nodes.visible")?,
            version: row.get("version")?,
            changeset: row.get("changeset")?,
            timestamp: row.get("timestamp")?,
            tags,
        })
    }

    fn load_link(&self, row: &Row<'_>) -> RepoResult<AtonLink> {
        let link_text: String = row.get("link_id")?;
        let link_id = parse_uuid(&link_text, "aton_links.link_id")?;

        let type_text: String = row.get("link_type")?;
        let link_type = AtonLinkType::parse(&type_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid link type `{type_text}` in aton_links.link_type"))
        })?;

        let tags_text: String = row.get("tags_json")?;
        let tags = serde_json::from_str(&tags_text).map_err(|err| {
            RepoError::InvalidData(format!("invalid tags_json for link {link_id}: {err}"))
        })?;

        let mut stmt = self.conn.prepare(
            "SELECT node_id FROM aton_link_nodes WHERE link_id = ?1 ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([link_text.as_str()])?;
        let mut node_ids = Vec::new();
        while let Some(member) = rows.next()? {
            node_ids.push(member.get(0)?);
        }

        Ok(AtonLink {
            link_id,
            name: row.get("name")?,
            link_type,
            tags,
            node_ids,
        })
    }
}
