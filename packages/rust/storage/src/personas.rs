//! Persona definitions and their assignment to jobs.
//!
//! Personas are owned by an external source; this store only mirrors them so
//! jobs and mapping queries can reference them.

use libsql::{Connection, params};
use personamap_shared::{JobId, PersonaDefinition, PersonaMapError, Result};

use crate::{Storage, db_err, now_ts};

impl Storage {
    /// Insert or update a persona.
    pub async fn upsert_persona(&self, persona: &PersonaDefinition) -> Result<()> {
        self.check_writable()?;
        upsert_persona_on(&self.conn, persona).await
    }

    /// Mirror an external persona set: upsert every entry and deactivate the rest.
    ///
    /// Applied in one transaction, so a failure leaves the previous set intact.
    /// Returns `(upserted, deactivated)`.
    pub async fn sync_personas(&self, personas: &[PersonaDefinition]) -> Result<(usize, usize)> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        match sync_on(&tx, personas).await {
            Ok(deactivated) => {
                tx.commit().await.map_err(db_err)?;
                tracing::info!(upserted = personas.len(), deactivated, "synced personas");
                Ok((personas.len(), deactivated))
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// List personas, optionally only active ones.
    pub async fn list_personas(&self, active_only: bool) -> Result<Vec<PersonaDefinition>> {
        let sql = if active_only {
            "SELECT id, title, description, keywords_json, is_active FROM personas
             WHERE is_active = 1 ORDER BY title"
        } else {
            "SELECT id, title, description, keywords_json, is_active FROM personas ORDER BY title"
        };
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;

        let mut personas = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            personas.push(row_to_persona(&row)?);
        }
        Ok(personas)
    }

    /// Replace the persona subset assigned to a job. An empty list means all active personas.
    pub async fn assign_personas(&self, job_id: &JobId, persona_ids: &[String]) -> Result<()> {
        self.check_writable()?;
        let id = job_id.to_string();
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let result = async {
            tx.execute("DELETE FROM job_personas WHERE job_id = ?1", params![id.as_str()])
                .await?;
            for persona_id in persona_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO job_personas (job_id, persona_id) VALUES (?1, ?2)",
                    params![id.as_str(), persona_id.as_str()],
                )
                .await?;
            }
            Ok::<_, libsql::Error>(())
        }
        .await;

        match result {
            Ok(()) => tx.commit().await.map_err(db_err),
            Err(e) => {
                let _ = tx.rollback().await;
                Err(db_err(e))
            }
        }
    }

    /// Active personas a job classifies against.
    pub async fn personas_for_job(&self, job_id: &JobId) -> Result<Vec<PersonaDefinition>> {
        let mut rows = self
            .conn
            .query(
                "SELECT p.id, p.title, p.description, p.keywords_json, p.is_active
                 FROM personas p JOIN job_personas jp ON jp.persona_id = p.id
                 WHERE jp.job_id = ?1 AND p.is_active = 1
                 ORDER BY p.title",
                params![job_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut assigned = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            assigned.push(row_to_persona(&row)?);
        }

        if assigned.is_empty() && !self.has_persona_assignments(job_id).await? {
            return self.list_personas(true).await;
        }
        Ok(assigned)
    }

    async fn has_persona_assignments(&self, job_id: &JobId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM job_personas WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? > 0),
            None => Ok(false),
        }
    }
}

async fn upsert_persona_on(conn: &Connection, persona: &PersonaDefinition) -> Result<()> {
    let keywords = serde_json::to_string(&persona.keywords)
        .map_err(|e| PersonaMapError::Storage(e.to_string()))?;
    conn.execute(
        "INSERT INTO personas (id, title, description, keywords_json, is_active, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           description = excluded.description,
           keywords_json = excluded.keywords_json,
           is_active = excluded.is_active,
           updated_at = excluded.updated_at",
        params![
            persona.id.as_str(),
            persona.title.as_str(),
            persona.description.as_str(),
            keywords,
            i64::from(persona.is_active),
            now_ts(),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Upsert `personas` and deactivate active rows missing from it. Returns the deactivated count.
async fn sync_on(conn: &Connection, personas: &[PersonaDefinition]) -> Result<usize> {
    for persona in personas {
        upsert_persona_on(conn, persona).await?;
    }

    let mut rows = conn
        .query("SELECT id FROM personas WHERE is_active = 1", params![])
        .await
        .map_err(db_err)?;
    let mut stale = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        let id: String = row.get(0).map_err(db_err)?;
        if !personas.iter().any(|p| p.id == id) {
            stale.push(id);
        }
    }

    let now = now_ts();
    for id in &stale {
        conn.execute(
            "UPDATE personas SET is_active = 0, updated_at = ?1 WHERE id = ?2",
            params![now.as_str(), id.as_str()],
        )
        .await
        .map_err(db_err)?;
    }
    Ok(stale.len())
}

/// Convert a database row to a [`PersonaDefinition`].
fn row_to_persona(row: &libsql::Row) -> Result<PersonaDefinition> {
    let keywords: String = row.get(3).map_err(db_err)?;
    Ok(PersonaDefinition {
        id: row.get::<String>(0).map_err(db_err)?,
        title: row.get::<String>(1).map_err(db_err)?,
        description: row.get::<String>(2).map_err(db_err)?,
        keywords: serde_json::from_str(&keywords)
            .map_err(|e| PersonaMapError::Storage(format!("invalid keywords: {e}")))?,
        is_active: row.get::<i64>(4).map_err(db_err)? != 0,
    })
}
