//! Typed access to sites, transmitters, metrics, and traps, plus the
//! idempotent schema bootstrap. The store uniquely owns all on-disk state;
//! everything the scheduler keeps in memory is a cache reconciled from here.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::metric::{TransmitterMetric, TransmitterMetricData};
use crate::models::site::{
    contact_info_to_stored, CreateSiteRequest, Site, SiteRow, UpdateSiteRequest,
};
use crate::models::transmitter::{Transmitter, TransmitterRow, UpsertTransmitter};
use crate::models::trap::{IncomingTrap, Trap, TrapFilters, TrapRow};

/// Ordered DDL to ensure the fleet schema exists. Every statement is
/// idempotent (`IF NOT EXISTS` / `ADD COLUMN IF NOT EXISTS`) so the whole
/// list is safe to run on every start.
const SCHEMA: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS sites (
    id           UUID PRIMARY KEY,
    name         TEXT NOT NULL,
    location     TEXT NOT NULL DEFAULT '',
    latitude     DOUBLE PRECISION,
    longitude    DOUBLE PRECISION,
    address      TEXT,
    contact_info TEXT,
    is_active    BOOLEAN NOT NULL DEFAULT TRUE,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
)",
    r"CREATE TABLE IF NOT EXISTS transmitters (
    id             UUID PRIMARY KEY,
    site_id        UUID NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    name           TEXT NOT NULL,
    frequency_mhz  DOUBLE PRECISION,
    power_watts    DOUBLE PRECISION,
    status         TEXT NOT NULL DEFAULT 'unknown',
    snmp_host      TEXT NOT NULL,
    snmp_port      INTEGER NOT NULL DEFAULT 161,
    snmp_community TEXT NOT NULL DEFAULT 'public',
    snmp_version   INTEGER NOT NULL DEFAULT 1,
    oids           JSONB NOT NULL DEFAULT '[]',
    poll_interval  INTEGER DEFAULT 10000,
    is_active      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
)",
    // Presentation columns arrived after the first deployments.
    "ALTER TABLE transmitters ADD COLUMN IF NOT EXISTS display_label TEXT",
    "ALTER TABLE transmitters ADD COLUMN IF NOT EXISTS display_order INTEGER NOT NULL DEFAULT 0",
    // Poll cadence moved from 30 s to 10 s; migrate rows still on the old
    // default (or never set) before tightening the column.
    "ALTER TABLE transmitters ALTER COLUMN poll_interval SET DEFAULT 10000",
    "UPDATE transmitters SET poll_interval = 10000 WHERE poll_interval IS NULL OR poll_interval = 30000",
    "ALTER TABLE transmitters ALTER COLUMN poll_interval SET NOT NULL",
    r"CREATE TABLE IF NOT EXISTS transmitter_metrics (
    transmitter_id  UUID NOT NULL REFERENCES transmitters(id) ON DELETE CASCADE,
    timestamp       TIMESTAMPTZ NOT NULL,
    power_output    DOUBLE PRECISION,
    forward_power   DOUBLE PRECISION,
    reflected_power DOUBLE PRECISION,
    frequency       DOUBLE PRECISION,
    vswr            DOUBLE PRECISION,
    temperature     DOUBLE PRECISION,
    status          TEXT,
    raw_data        JSONB,
    error           TEXT,
    PRIMARY KEY (transmitter_id, timestamp)
)",
    r"CREATE TABLE IF NOT EXISTS alarms (
    id              UUID PRIMARY KEY,
    transmitter_id  UUID NOT NULL REFERENCES transmitters(id) ON DELETE CASCADE,
    severity        TEXT NOT NULL,
    alarm_type      TEXT NOT NULL,
    message         TEXT NOT NULL DEFAULT '',
    is_active       BOOLEAN NOT NULL DEFAULT TRUE,
    acknowledged_by TEXT,
    acknowledged_at TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)",
    r"CREATE TABLE IF NOT EXISTS snmp_traps (
    id             UUID PRIMARY KEY,
    transmitter_id UUID REFERENCES transmitters(id) ON DELETE SET NULL,
    site_id        UUID REFERENCES sites(id) ON DELETE SET NULL,
    source_host    TEXT NOT NULL,
    source_port    INTEGER NOT NULL DEFAULT 0,
    community      TEXT,
    version        INTEGER NOT NULL DEFAULT 1,
    trap_oid       TEXT,
    enterprise_oid TEXT,
    varbinds       JSONB NOT NULL DEFAULT '[]',
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
)",
    "CREATE INDEX IF NOT EXISTS idx_snmp_traps_created_at ON snmp_traps (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_snmp_traps_source_host ON snmp_traps (source_host)",
    "CREATE INDEX IF NOT EXISTS idx_snmp_traps_transmitter ON snmp_traps (transmitter_id)",
];

const TRANSMITTER_COLUMNS: &str = "id, site_id, name, display_label, display_order, \
     frequency_mhz, power_watts, status, snmp_host, snmp_port, snmp_community, snmp_version, \
     oids, poll_interval, is_active, created_at, updated_at";

const TRAP_COLUMNS: &str = "id, transmitter_id, site_id, source_host, source_port, community, \
     version, trap_oid, enterprise_oid, varbinds, created_at";

const METRIC_COLUMNS: &str = "transmitter_id, timestamp, power_output, forward_power, \
     reflected_power, frequency, vswr, temperature, status, raw_data, error";

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the schema bootstrap. Safe to call on every start; a failure
    /// here is fatal for the process.
    pub async fn initialize_schema(&self) -> anyhow::Result<()> {
        tracing::info!("running schema bootstrap ({} statements)", SCHEMA.len());
        for (i, sql) in SCHEMA.iter().enumerate() {
            sqlx::query(sql).execute(&self.pool).await.map_err(|e| {
                tracing::error!("schema statement {}/{} failed: {e}", i + 1, SCHEMA.len());
                e
            })?;
        }

        // TimescaleDB is optional; without the extension the metrics table
        // stays a plain table and range queries still work.
        let hypertable = "SELECT create_hypertable('transmitter_metrics', 'timestamp', \
             if_not_exists => TRUE, migrate_data => TRUE)";
        if let Err(e) = sqlx::query(hypertable).execute(&self.pool).await {
            tracing::warn!("transmitter_metrics not converted to hypertable: {e}");
        }

        tracing::info!("schema bootstrap complete");
        Ok(())
    }

    // ── Sites ──

    pub async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT id, name, location, latitude, longitude, address, contact_info, is_active, \
             created_at, updated_at FROM sites ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().map(Site::from).collect())
    }

    pub async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        let row = sqlx::query_as::<_, SiteRow>(
            "SELECT id, name, location, latitude, longitude, address, contact_info, is_active, \
             created_at, updated_at FROM sites WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(Site::from))
    }

    pub async fn create_site(&self, req: &CreateSiteRequest) -> StoreResult<Site> {
        let id = Uuid::new_v4();
        let contact = req.contact_info.as_ref().and_then(contact_info_to_stored);
        let row = sqlx::query_as::<_, SiteRow>(
            "INSERT INTO sites (id, name, location, latitude, longitude, address, contact_info, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, name, location, latitude, longitude, address, contact_info, is_active, \
             created_at, updated_at",
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.location)
        .bind(req.latitude)
        .bind(req.longitude)
        .bind(&req.address)
        .bind(contact)
        .bind(req.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(Site::from(row))
    }

    pub async fn update_site(&self, id: Uuid, patch: &UpdateSiteRequest) -> StoreResult<Option<Site>> {
        let contact = patch.contact_info.as_ref().and_then(contact_info_to_stored);
        let row = sqlx::query_as::<_, SiteRow>(
            "UPDATE sites SET \
               name = COALESCE($2, name), \
               location = COALESCE($3, location), \
               latitude = COALESCE($4, latitude), \
               longitude = COALESCE($5, longitude), \
               address = COALESCE($6, address), \
               contact_info = COALESCE($7, contact_info), \
               is_active = COALESCE($8, is_active), \
               updated_at = now() \
             WHERE id = $1 \
             RETURNING id, name, location, latitude, longitude, address, contact_info, is_active, \
             created_at, updated_at",
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.location)
        .bind(patch.latitude)
        .bind(patch.longitude)
        .bind(&patch.address)
        .bind(contact)
        .bind(patch.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(Site::from))
    }

    /// Cascades to transmitters, their metrics and alarms; trap references
    /// are nulled by the foreign key.
    pub async fn delete_site(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // ── Transmitters ──

    pub async fn list_transmitters(&self) -> StoreResult<Vec<Transmitter>> {
        let rows = sqlx::query_as::<_, TransmitterRow>(&format!(
            "SELECT {TRANSMITTER_COLUMNS} FROM transmitters ORDER BY display_order ASC, created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().map(Transmitter::from).collect())
    }

    pub async fn get_transmitter(&self, id: Uuid) -> StoreResult<Option<Transmitter>> {
        let row = sqlx::query_as::<_, TransmitterRow>(&format!(
            "SELECT {TRANSMITTER_COLUMNS} FROM transmitters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(Transmitter::from))
    }

    /// Exactly-one match wins; zero or many matches attribute to nobody.
    pub async fn find_transmitter_by_host(&self, host: &str) -> StoreResult<Option<Transmitter>> {
        let rows = sqlx::query_as::<_, TransmitterRow>(&format!(
            "SELECT {TRANSMITTER_COLUMNS} FROM transmitters WHERE snmp_host = $1 LIMIT 2"
        ))
        .bind(host)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        if rows.len() == 1 {
            Ok(rows.into_iter().next().map(Transmitter::from))
        } else {
            Ok(None)
        }
    }

    /// Insert when the id is absent or unknown, otherwise patch. Returns
    /// the full record either way.
    pub async fn upsert_transmitter(&self, req: &UpsertTransmitter) -> StoreResult<Transmitter> {
        if let Some(id) = req.id {
            let oids = req.oids.as_ref().map(|o| serde_json::json!(o));
            let row = sqlx::query_as::<_, TransmitterRow>(&format!(
                "UPDATE transmitters SET \
                   site_id = COALESCE($2, site_id), \
                   name = COALESCE($3, name), \
                   display_label = COALESCE($4, display_label), \
                   display_order = COALESCE($5, display_order), \
                   frequency_mhz = COALESCE($6, frequency_mhz), \
                   power_watts = COALESCE($7, power_watts), \
                   status = COALESCE($8, status), \
                   snmp_host = COALESCE($9, snmp_host), \
                   snmp_port = COALESCE($10, snmp_port), \
                   snmp_community = COALESCE($11, snmp_community), \
                   snmp_version = COALESCE($12, snmp_version), \
                   oids = COALESCE($13, oids), \
                   poll_interval = COALESCE($14, poll_interval), \
                   is_active = COALESCE($15, is_active), \
                   updated_at = now() \
                 WHERE id = $1 \
                 RETURNING {TRANSMITTER_COLUMNS}"
            ))
            .bind(id)
            .bind(req.site_id)
            .bind(&req.name)
            .bind(&req.label)
            .bind(req.display_order)
            .bind(req.frequency_mhz)
            .bind(req.power_watts)
            .bind(&req.status)
            .bind(&req.host)
            .bind(req.port)
            .bind(&req.community)
            .bind(req.version)
            .bind(oids)
            .bind(req.poll_interval)
            .bind(req.is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
            if let Some(row) = row {
                return Ok(Transmitter::from(row));
            }
        }

        let site_id = req
            .site_id
            .ok_or_else(|| StoreError::Constraint("siteId is required".to_string()))?;
        let host = req
            .host
            .clone()
            .ok_or_else(|| StoreError::Constraint("host is required".to_string()))?;
        let id = req.id.unwrap_or_else(Uuid::new_v4);
        let name = req.name.clone().unwrap_or_else(|| host.clone());
        let oids = serde_json::json!(req.oids.clone().unwrap_or_default());

        let row = sqlx::query_as::<_, TransmitterRow>(&format!(
            "INSERT INTO transmitters \
               (id, site_id, name, display_label, display_order, frequency_mhz, power_watts, \
                status, snmp_host, snmp_port, snmp_community, snmp_version, oids, poll_interval, \
                is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {TRANSMITTER_COLUMNS}"
        ))
        .bind(id)
        .bind(site_id)
        .bind(name)
        .bind(&req.label)
        .bind(req.display_order.unwrap_or(0))
        .bind(req.frequency_mhz)
        .bind(req.power_watts)
        .bind(req.status.clone().unwrap_or_else(|| "unknown".to_string()))
        .bind(host)
        .bind(req.port.unwrap_or(161))
        .bind(req.community.clone().unwrap_or_else(|| "public".to_string()))
        .bind(req.version.unwrap_or(1))
        .bind(oids)
        .bind(req.poll_interval.unwrap_or(10_000))
        .bind(req.is_active.unwrap_or(true))
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(Transmitter::from(row))
    }

    pub async fn delete_transmitter(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM transmitters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // ── Metrics ──

    /// Append one observation. A vanished transmitter is a logged no-op,
    /// never an error back into the polling loop.
    pub async fn store_metrics(
        &self,
        transmitter_id: Uuid,
        data: &TransmitterMetricData,
    ) -> StoreResult<()> {
        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM transmitters WHERE id = $1")
            .bind(transmitter_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        if exists.is_none() {
            tracing::warn!(%transmitter_id, "metrics for unknown transmitter dropped");
            return Ok(());
        }

        let raw = serde_json::to_value(&data.raw).unwrap_or(serde_json::Value::Null);
        sqlx::query(&format!(
            "INSERT INTO transmitter_metrics ({METRIC_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (transmitter_id, timestamp) DO NOTHING"
        ))
        .bind(transmitter_id)
        .bind(data.timestamp)
        .bind(data.power_output)
        .bind(data.forward_power)
        .bind(data.reflected_power)
        .bind(data.frequency)
        .bind(data.vswr)
        .bind(data.temperature)
        .bind(&data.status)
        .bind(raw)
        .bind(&data.error)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        sqlx::query("UPDATE transmitters SET status = $2, updated_at = now() WHERE id = $1 AND status <> $2")
            .bind(transmitter_id)
            .bind(&data.status)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        // Adopt the device-reported radio name when it differs.
        if let Some(name) = &data.radio_name {
            sqlx::query("UPDATE transmitters SET name = $2, updated_at = now() WHERE id = $1 AND name <> $2")
                .bind(transmitter_id)
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        }
        Ok(())
    }

    pub async fn get_latest_metrics(&self, id: Uuid) -> StoreResult<Option<TransmitterMetric>> {
        let row = sqlx::query_as::<_, TransmitterMetric>(&format!(
            "SELECT {METRIC_COLUMNS} FROM transmitter_metrics WHERE transmitter_id = $1 \
             ORDER BY timestamp DESC LIMIT 1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row)
    }

    pub async fn get_metrics_range(
        &self,
        id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<TransmitterMetric>> {
        let rows = sqlx::query_as::<_, TransmitterMetric>(&format!(
            "SELECT {METRIC_COLUMNS} FROM transmitter_metrics \
             WHERE transmitter_id = $1 AND timestamp >= $2 AND timestamp <= $3 \
             ORDER BY timestamp DESC LIMIT $4"
        ))
        .bind(id)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(rows)
    }

    // ── Traps ──

    pub async fn store_trap(
        &self,
        trap: &IncomingTrap,
        transmitter_id: Option<Uuid>,
        site_id: Option<Uuid>,
    ) -> StoreResult<Trap> {
        let id = Uuid::new_v4();
        let varbinds = serde_json::to_value(&trap.varbinds).unwrap_or(serde_json::json!([]));
        let row = sqlx::query_as::<_, TrapRow>(&format!(
            "INSERT INTO snmp_traps \
               (id, transmitter_id, site_id, source_host, source_port, community, version, \
                trap_oid, enterprise_oid, varbinds) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {TRAP_COLUMNS}"
        ))
        .bind(id)
        .bind(transmitter_id)
        .bind(site_id)
        .bind(&trap.source_host)
        .bind(trap.source_port as i32)
        .bind(&trap.community)
        .bind(trap.version)
        .bind(&trap.trap_oid)
        .bind(&trap.enterprise_oid)
        .bind(varbinds)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(Trap::from(row))
    }

    pub async fn get_latest_traps(
        &self,
        filters: &TrapFilters,
        limit: i64,
    ) -> StoreResult<Vec<Trap>> {
        let rows = sqlx::query_as::<_, TrapRow>(&format!(
            "SELECT {TRAP_COLUMNS} FROM snmp_traps \
             WHERE ($1::uuid IS NULL OR transmitter_id = $1) \
               AND ($2::uuid IS NULL OR site_id = $2) \
               AND ($3::text IS NULL OR source_host = $3) \
             ORDER BY created_at DESC LIMIT $4"
        ))
        .bind(filters.transmitter_id)
        .bind(filters.site_id)
        .bind(&filters.source_host)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().map(Trap::from).collect())
    }

    pub async fn get_traps_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &TrapFilters,
        limit: i64,
    ) -> StoreResult<Vec<Trap>> {
        let rows = sqlx::query_as::<_, TrapRow>(&format!(
            "SELECT {TRAP_COLUMNS} FROM snmp_traps \
             WHERE created_at >= $1 AND created_at <= $2 \
               AND ($3::uuid IS NULL OR transmitter_id = $3) \
               AND ($4::uuid IS NULL OR site_id = $4) \
               AND ($5::text IS NULL OR source_host = $5) \
             ORDER BY created_at DESC LIMIT $6"
        ))
        .bind(start)
        .bind(end)
        .bind(filters.transmitter_id)
        .bind(filters.site_id)
        .bind(&filters.source_host)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().map(Trap::from).collect())
    }
}
