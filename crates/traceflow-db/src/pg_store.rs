//! [`SupplyChainStore`] on `PostgreSQL`.
//!
//! Batch writes use `UNNEST` over parallel column arrays. A year commit
//! runs in one transaction: rewind the country to the start of the year,
//! end and create edges, then insert flows and privileged exports.
//!
//! Text ordering uses `COLLATE "C"` so ids sort the same way they do in
//! memory.

use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use traceflow_core::error::StoreError;
use traceflow_core::network::EdgeKey;
use traceflow_core::store::{SupplyChainStore, YearCommit};
use traceflow_types::{
    Actor, Country, CountryId, Exporter, Farmer, FarmerId, Geography, Middleman, PrimaryCrop,
    PrivilegedExport, RelationKind, RelationshipEdge, Tier, TradeFlow,
};

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// Rows per `UNNEST` statement.
const BATCH_SIZE: usize = 5_000;

fn kg(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn year_col(year: u32) -> i32 {
    i32::try_from(year).unwrap_or(i32::MAX)
}

fn unsigned<T: TryFrom<i64>>(value: i64, what: &str) -> Result<T, DbError>
where
    T::Error: std::fmt::Display,
{
    T::try_from(value).map_err(|e| DbError::InvalidRow(format!("{what} = {value}: {e}")))
}

fn missing(what: &str, id: &str) -> DbError {
    DbError::InvalidRow(format!("{what} missing for actor {id}"))
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct CountryRow {
    config: Json<Country>,
}

/// A row from `geographies`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeographyRow {
    /// Owning country.
    pub country_id: String,
    /// Geography id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Producing area.
    pub producing_area: String,
    /// Farmer count.
    pub num_farmers: i64,
    /// Annual production.
    pub total_production_kg: i64,
    /// Crop class storage name.
    pub primary_crop: String,
}

impl TryFrom<GeographyRow> for Geography {
    type Error = DbError;

    fn try_from(row: GeographyRow) -> Result<Self, Self::Error> {
        let primary_crop = PrimaryCrop::parse(&row.primary_crop)
            .ok_or_else(|| DbError::InvalidRow(format!("unknown crop {}", row.primary_crop)))?;
        Ok(Self {
            num_farmers: unsigned(row.num_farmers, "num_farmers")?,
            total_production_kg: unsigned(row.total_production_kg, "total_production_kg")?,
            id: row.id.into(),
            name: row.name,
            country_id: row.country_id.into(),
            producing_area: row.producing_area,
            primary_crop,
        })
    }
}

/// A row from `actors`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActorRow {
    /// Owning country.
    pub country_id: String,
    /// Tier storage name.
    pub tier: String,
    /// Actor id.
    pub id: String,
    /// Loyalty.
    pub loyalty: f64,
    /// Farmer geography.
    pub geography_id: Option<String>,
    /// Farmer plot count.
    pub num_plots: Option<i16>,
    /// Farmer production.
    pub production_kg: Option<i64>,
    /// Middleman or exporter weight.
    pub competitiveness: Option<f64>,
    /// Exporter EU preference.
    pub eu_preference: Option<f64>,
}

impl TryFrom<ActorRow> for Actor {
    type Error = DbError;

    fn try_from(row: ActorRow) -> Result<Self, Self::Error> {
        let tier = Tier::parse(&row.tier)
            .ok_or_else(|| DbError::InvalidRow(format!("unknown tier {}", row.tier)))?;
        let country_id = CountryId::from(row.country_id);
        Ok(match tier {
            Tier::Farmer => {
                let production = row.production_kg.ok_or_else(|| missing("production_kg", &row.id))?;
                let plots = row.num_plots.ok_or_else(|| missing("num_plots", &row.id))?;
                Self::Farmer(Farmer {
                    geography_id: row
                        .geography_id
                        .ok_or_else(|| missing("geography_id", &row.id))?
                        .into(),
                    num_plots: unsigned(i64::from(plots), "num_plots")?,
                    production_kg: unsigned(production, "production_kg")?,
                    id: row.id.into(),
                    country_id,
                    loyalty: row.loyalty,
                })
            }
            Tier::Middleman => Self::Middleman(Middleman {
                competitiveness: row
                    .competitiveness
                    .ok_or_else(|| missing("competitiveness", &row.id))?,
                id: row.id.into(),
                country_id,
                loyalty: row.loyalty,
            }),
            Tier::Exporter => Self::Exporter(Exporter {
                competitiveness: row
                    .competitiveness
                    .ok_or_else(|| missing("competitiveness", &row.id))?,
                eu_preference: row
                    .eu_preference
                    .ok_or_else(|| missing("eu_preference", &row.id))?,
                id: row.id.into(),
                country_id,
                loyalty: row.loyalty,
            }),
        })
    }
}

/// A row from `relationships`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EdgeRow {
    /// Owning country.
    pub country_id: String,
    /// Kind storage name.
    pub kind: String,
    /// Lower-tier endpoint.
    pub source_id: String,
    /// Upper-tier endpoint.
    pub target_id: String,
    /// First active year.
    pub start_year: i32,
    /// First inactive year.
    pub end_year: Option<i32>,
}

impl TryFrom<EdgeRow> for RelationshipEdge {
    type Error = DbError;

    fn try_from(row: EdgeRow) -> Result<Self, Self::Error> {
        let kind = RelationKind::parse(&row.kind)
            .ok_or_else(|| DbError::InvalidRow(format!("unknown relation kind {}", row.kind)))?;
        Ok(Self {
            kind,
            country_id: row.country_id.into(),
            source_id: row.source_id,
            target_id: row.target_id,
            start_year: unsigned(i64::from(row.start_year), "start_year")?,
            end_year: row
                .end_year
                .map(|y| unsigned(i64::from(y), "end_year"))
                .transpose()?,
        })
    }
}

/// A row from `trade_flows`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FlowRow {
    /// Owning country.
    pub country_id: String,
    /// Year.
    pub year: i32,
    /// Farmer.
    pub farmer_id: String,
    /// Middleman.
    pub middleman_id: String,
    /// Exporter.
    pub exporter_id: String,
    /// Privileged channel flag.
    pub sold_to_eu: bool,
    /// Volume.
    pub amount_kg: i64,
}

impl TryFrom<FlowRow> for TradeFlow {
    type Error = DbError;

    fn try_from(row: FlowRow) -> Result<Self, Self::Error> {
        Ok(Self {
            year: unsigned(i64::from(row.year), "year")?,
            country_id: row.country_id.into(),
            farmer_id: row.farmer_id.into(),
            middleman_id: row.middleman_id.into(),
            exporter_id: row.exporter_id.into(),
            amount_kg: unsigned(row.amount_kg, "amount_kg")?,
            sold_to_privileged_channel: row.sold_to_eu,
        })
    }
}

/// A row from `privileged_exports`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExportRow {
    /// Owning country.
    pub country_id: String,
    /// Year.
    pub year: i32,
    /// Exporter.
    pub exporter_id: String,
    /// Allocated volume.
    pub volume_kg: i64,
    /// Traceable farmers, sorted.
    pub traceable_farmer_ids: Json<Vec<FarmerId>>,
}

impl TryFrom<ExportRow> for PrivilegedExport {
    type Error = DbError;

    fn try_from(row: ExportRow) -> Result<Self, Self::Error> {
        Ok(Self {
            year: unsigned(i64::from(row.year), "year")?,
            country_id: row.country_id.into(),
            exporter_id: row.exporter_id.into(),
            volume_kg: unsigned(row.volume_kg, "volume_kg")?,
            traceable_farmer_ids: row.traceable_farmer_ids.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Statements shared by single writes and year commits
// ---------------------------------------------------------------------------

async fn insert_edges(conn: &mut PgConnection, edges: &[RelationshipEdge]) -> Result<(), DbError> {
    for chunk in edges.chunks(BATCH_SIZE) {
        let len = chunk.len();
        let mut countries = Vec::with_capacity(len);
        let mut kinds = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut targets = Vec::with_capacity(len);
        let mut starts = Vec::with_capacity(len);
        let mut ends: Vec<Option<i32>> = Vec::with_capacity(len);
        for edge in chunk {
            countries.push(edge.country_id.as_str());
            kinds.push(edge.kind.as_str());
            sources.push(edge.source_id.as_str());
            targets.push(edge.target_id.as_str());
            starts.push(year_col(edge.start_year));
            ends.push(edge.end_year.map(year_col));
        }
        sqlx::query(
            r"INSERT INTO relationships (country_id, kind, source_id, target_id, start_year, end_year)
              SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[], $4::TEXT[], $5::INTEGER[], $6::INTEGER[])",
        )
        .bind(&countries)
        .bind(&kinds)
        .bind(&sources)
        .bind(&targets)
        .bind(&starts)
        .bind(&ends)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn end_edges(
    conn: &mut PgConnection,
    country: &CountryId,
    keys: &[EdgeKey],
    year: u32,
) -> Result<u64, DbError> {
    let mut ended = 0;
    for chunk in keys.chunks(BATCH_SIZE) {
        let kinds: Vec<&str> = chunk.iter().map(|k| k.kind.as_str()).collect();
        let sources: Vec<&str> = chunk.iter().map(|k| k.source_id.as_str()).collect();
        let targets: Vec<&str> = chunk.iter().map(|k| k.target_id.as_str()).collect();
        let result = sqlx::query(
            r"UPDATE relationships r SET end_year = $2
              FROM UNNEST($3::TEXT[], $4::TEXT[], $5::TEXT[]) AS k(kind, source_id, target_id)
              WHERE r.country_id = $1
                AND r.end_year IS NULL
                AND r.kind = k.kind
                AND r.source_id = k.source_id
                AND r.target_id = k.target_id",
        )
        .bind(country.as_str())
        .bind(year_col(year))
        .bind(&kinds)
        .bind(&sources)
        .bind(&targets)
        .execute(&mut *conn)
        .await?;
        ended += result.rows_affected();
    }
    Ok(ended)
}

async fn insert_flows(conn: &mut PgConnection, flows: &[TradeFlow]) -> Result<(), DbError> {
    for chunk in flows.chunks(BATCH_SIZE) {
        let len = chunk.len();
        let mut countries = Vec::with_capacity(len);
        let mut years = Vec::with_capacity(len);
        let mut farmers = Vec::with_capacity(len);
        let mut middlemen = Vec::with_capacity(len);
        let mut exporters = Vec::with_capacity(len);
        let mut flags = Vec::with_capacity(len);
        let mut amounts = Vec::with_capacity(len);
        for flow in chunk {
            countries.push(flow.country_id.as_str());
            years.push(year_col(flow.year));
            farmers.push(flow.farmer_id.as_str());
            middlemen.push(flow.middleman_id.as_str());
            exporters.push(flow.exporter_id.as_str());
            flags.push(flow.sold_to_privileged_channel);
            amounts.push(kg(flow.amount_kg));
        }
        sqlx::query(
            r"INSERT INTO trade_flows (country_id, year, farmer_id, middleman_id, exporter_id, sold_to_eu, amount_kg)
              SELECT * FROM UNNEST($1::TEXT[], $2::INTEGER[], $3::TEXT[], $4::TEXT[], $5::TEXT[], $6::BOOLEAN[], $7::BIGINT[])",
        )
        .bind(&countries)
        .bind(&years)
        .bind(&farmers)
        .bind(&middlemen)
        .bind(&exporters)
        .bind(&flags)
        .bind(&amounts)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_exports(conn: &mut PgConnection, exports: &[PrivilegedExport]) -> Result<(), DbError> {
    if exports.is_empty() {
        return Ok(());
    }
    let mut countries = Vec::with_capacity(exports.len());
    let mut years = Vec::with_capacity(exports.len());
    let mut exporters = Vec::with_capacity(exports.len());
    let mut volumes = Vec::with_capacity(exports.len());
    let mut farmers: Vec<Value> = Vec::with_capacity(exports.len());
    for export in exports {
        countries.push(export.country_id.as_str());
        years.push(year_col(export.year));
        exporters.push(export.exporter_id.as_str());
        volumes.push(kg(export.volume_kg));
        farmers.push(serde_json::to_value(&export.traceable_farmer_ids)?);
    }
    sqlx::query(
        r"INSERT INTO privileged_exports (country_id, year, exporter_id, volume_kg, traceable_farmer_ids)
          SELECT * FROM UNNEST($1::TEXT[], $2::INTEGER[], $3::TEXT[], $4::BIGINT[], $5::JSONB[])",
    )
    .bind(&countries)
    .bind(&years)
    .bind(&exporters)
    .bind(&volumes)
    .bind(&farmers)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// `PostgreSQL`-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Bind a store to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bind a store to a [`PostgresPool`].
    pub fn from_pool(pool: &PostgresPool) -> Self {
        Self::new(pool.pool().clone())
    }

    async fn upsert_country(&self, country: &Country) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO countries (id, name, config) VALUES ($1, $2, $3)
              ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, config = EXCLUDED.config",
        )
        .bind(country.id.as_str())
        .bind(&country.name)
        .bind(Json(country))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_country(&self, id: &CountryId) -> Result<Option<Country>, DbError> {
        let row = sqlx::query_as::<_, CountryRow>("SELECT config FROM countries WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.config.0))
    }

    async fn upsert_geographies(&self, geographies: &[Geography]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for chunk in geographies.chunks(BATCH_SIZE) {
            let countries: Vec<&str> = chunk.iter().map(|g| g.country_id.as_str()).collect();
            let ids: Vec<&str> = chunk.iter().map(|g| g.id.as_str()).collect();
            let names: Vec<&str> = chunk.iter().map(|g| g.name.as_str()).collect();
            let areas: Vec<&str> = chunk.iter().map(|g| g.producing_area.as_str()).collect();
            let farmers: Vec<i64> = chunk.iter().map(|g| i64::from(g.num_farmers)).collect();
            let production: Vec<i64> = chunk.iter().map(|g| kg(g.total_production_kg)).collect();
            let crops: Vec<&str> = chunk.iter().map(|g| g.primary_crop.as_str()).collect();
            sqlx::query(
                r"INSERT INTO geographies (country_id, id, name, producing_area, num_farmers, total_production_kg, primary_crop)
                  SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[], $4::TEXT[], $5::BIGINT[], $6::BIGINT[], $7::TEXT[])
                  ON CONFLICT (country_id, id) DO UPDATE SET
                    name = EXCLUDED.name,
                    producing_area = EXCLUDED.producing_area,
                    num_farmers = EXCLUDED.num_farmers,
                    total_production_kg = EXCLUDED.total_production_kg,
                    primary_crop = EXCLUDED.primary_crop",
            )
            .bind(&countries)
            .bind(&ids)
            .bind(&names)
            .bind(&areas)
            .bind(&farmers)
            .bind(&production)
            .bind(&crops)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_geographies(&self, country: &CountryId) -> Result<Vec<Geography>, DbError> {
        let rows = sqlx::query_as::<_, GeographyRow>(
            r#"SELECT country_id, id, name, producing_area, num_farmers, total_production_kg, primary_crop
               FROM geographies
               WHERE country_id = $1
               ORDER BY id COLLATE "C""#,
        )
        .bind(country.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Geography::try_from).collect()
    }

    async fn upsert_actors(&self, tier: Tier, actors: &[Actor]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for chunk in actors.chunks(BATCH_SIZE) {
            let len = chunk.len();
            let mut countries = Vec::with_capacity(len);
            let mut ids = Vec::with_capacity(len);
            let mut loyalty = Vec::with_capacity(len);
            let mut geographies: Vec<Option<&str>> = Vec::with_capacity(len);
            let mut plots: Vec<Option<i16>> = Vec::with_capacity(len);
            let mut production: Vec<Option<i64>> = Vec::with_capacity(len);
            let mut competitiveness: Vec<Option<f64>> = Vec::with_capacity(len);
            let mut eu_preference: Vec<Option<f64>> = Vec::with_capacity(len);
            for actor in chunk {
                countries.push(actor.country_id().as_str());
                ids.push(actor.id());
                loyalty.push(actor.loyalty());
                let (geo, plot, prod, comp, eu) = match actor {
                    Actor::Farmer(f) => (
                        Some(f.geography_id.as_str()),
                        Some(i16::from(f.num_plots)),
                        Some(kg(f.production_kg)),
                        None,
                        None,
                    ),
                    Actor::Middleman(m) => (None, None, None, Some(m.competitiveness), None),
                    Actor::Exporter(e) => {
                        (None, None, None, Some(e.competitiveness), Some(e.eu_preference))
                    }
                };
                geographies.push(geo);
                plots.push(plot);
                production.push(prod);
                competitiveness.push(comp);
                eu_preference.push(eu);
            }
            sqlx::query(
                r"INSERT INTO actors (country_id, tier, id, loyalty, geography_id, num_plots, production_kg, competitiveness, eu_preference)
                  SELECT c, $2::TEXT, i, l, g, p, pr, co, eu
                  FROM UNNEST($1::TEXT[], $3::TEXT[], $4::DOUBLE PRECISION[], $5::TEXT[], $6::SMALLINT[], $7::BIGINT[], $8::DOUBLE PRECISION[], $9::DOUBLE PRECISION[])
                    AS t(c, i, l, g, p, pr, co, eu)
                  ON CONFLICT (country_id, tier, id) DO UPDATE SET
                    loyalty = EXCLUDED.loyalty,
                    geography_id = EXCLUDED.geography_id,
                    num_plots = EXCLUDED.num_plots,
                    production_kg = EXCLUDED.production_kg,
                    competitiveness = EXCLUDED.competitiveness,
                    eu_preference = EXCLUDED.eu_preference",
            )
            .bind(&countries)
            .bind(tier.as_str())
            .bind(&ids)
            .bind(&loyalty)
            .bind(&geographies)
            .bind(&plots)
            .bind(&production)
            .bind(&competitiveness)
            .bind(&eu_preference)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::debug!(tier = %tier, count = actors.len(), "Inserted actors (batch UNNEST)");
        Ok(())
    }

    async fn fetch_actors(&self, tier: Tier, country: &CountryId) -> Result<Vec<Actor>, DbError> {
        let rows = sqlx::query_as::<_, ActorRow>(
            r#"SELECT country_id, tier, id, loyalty, geography_id, num_plots, production_kg, competitiveness, eu_preference
               FROM actors
               WHERE country_id = $1 AND tier = $2
               ORDER BY id COLLATE "C""#,
        )
        .bind(country.as_str())
        .bind(tier.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Actor::try_from).collect()
    }

    async fn fetch_active_edges(
        &self,
        year: u32,
        country: &CountryId,
        kind: RelationKind,
    ) -> Result<Vec<RelationshipEdge>, DbError> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"SELECT country_id, kind, source_id, target_id, start_year, end_year
               FROM relationships
               WHERE country_id = $1
                 AND kind = $2
                 AND start_year <= $3
                 AND (end_year IS NULL OR end_year > $3)
               ORDER BY source_id COLLATE "C", target_id COLLATE "C", start_year"#,
        )
        .bind(country.as_str())
        .bind(kind.as_str())
        .bind(year_col(year))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RelationshipEdge::try_from).collect()
    }

    async fn end_active(&self, country: &CountryId, keys: &[EdgeKey], year: u32) -> Result<u64, DbError> {
        let mut tx = self.pool.begin().await?;
        let ended = end_edges(&mut tx, country, keys, year).await?;
        tx.commit().await?;
        Ok(ended)
    }

    async fn create_edges(&self, edges: &[RelationshipEdge]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        insert_edges(&mut tx, edges).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_flows(&self, country: &CountryId, year: u32, flows: &[TradeFlow]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM trade_flows WHERE country_id = $1 AND year = $2")
            .bind(country.as_str())
            .bind(year_col(year))
            .execute(&mut *tx)
            .await?;
        insert_flows(&mut tx, flows).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_flows(&self, year: u32, country: &CountryId) -> Result<Vec<TradeFlow>, DbError> {
        let rows = sqlx::query_as::<_, FlowRow>(
            r#"SELECT country_id, year, farmer_id, middleman_id, exporter_id, sold_to_eu, amount_kg
               FROM trade_flows
               WHERE country_id = $1 AND year = $2
               ORDER BY farmer_id COLLATE "C", middleman_id COLLATE "C", exporter_id COLLATE "C", amount_kg, sold_to_eu"#,
        )
        .bind(country.as_str())
        .bind(year_col(year))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TradeFlow::try_from).collect()
    }

    async fn replace_exports(
        &self,
        country: &CountryId,
        year: u32,
        exports: &[PrivilegedExport],
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM privileged_exports WHERE country_id = $1 AND year = $2")
            .bind(country.as_str())
            .bind(year_col(year))
            .execute(&mut *tx)
            .await?;
        insert_exports(&mut tx, exports).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_exports(&self, year: u32, country: &CountryId) -> Result<Vec<PrivilegedExport>, DbError> {
        let rows = sqlx::query_as::<_, ExportRow>(
            r#"SELECT country_id, year, exporter_id, volume_kg, traceable_farmer_ids
               FROM privileged_exports
               WHERE country_id = $1 AND year = $2
               ORDER BY exporter_id COLLATE "C""#,
        )
        .bind(country.as_str())
        .bind(year_col(year))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PrivilegedExport::try_from).collect()
    }

    async fn commit(&self, commit: &YearCommit) -> Result<(), DbError> {
        let country = commit.country_id.as_str();
        let year = year_col(commit.year);
        let mut tx = self.pool.begin().await?;

        // Rewind to the start of the year.
        sqlx::query("DELETE FROM relationships WHERE country_id = $1 AND start_year >= $2")
            .bind(country)
            .bind(year)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE relationships SET end_year = NULL WHERE country_id = $1 AND end_year >= $2")
            .bind(country)
            .bind(year)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM trade_flows WHERE country_id = $1 AND year >= $2")
            .bind(country)
            .bind(year)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM privileged_exports WHERE country_id = $1 AND year >= $2")
            .bind(country)
            .bind(year)
            .execute(&mut *tx)
            .await?;

        let ended = end_edges(&mut tx, &commit.country_id, &commit.ended, commit.year).await?;
        insert_edges(&mut tx, &commit.created).await?;
        insert_flows(&mut tx, &commit.flows).await?;
        insert_exports(&mut tx, &commit.exports).await?;
        tx.commit().await?;

        tracing::debug!(
            country,
            year = commit.year,
            ended,
            created = commit.created.len(),
            flows = commit.flows.len(),
            "Committed year"
        );
        Ok(())
    }

    async fn remove_country(&self, country: &CountryId) -> Result<(), DbError> {
        sqlx::query("DELETE FROM countries WHERE id = $1")
            .bind(country.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl SupplyChainStore for PgStore {
    async fn create_country(&self, country: &Country) -> Result<(), StoreError> {
        Ok(self.upsert_country(country).await?)
    }

    async fn get_country(&self, id: &CountryId) -> Result<Option<Country>, StoreError> {
        Ok(self.fetch_country(id).await?)
    }

    async fn create_geographies(&self, geographies: &[Geography]) -> Result<(), StoreError> {
        Ok(self.upsert_geographies(geographies).await?)
    }

    async fn get_geographies(&self, country: &CountryId) -> Result<Vec<Geography>, StoreError> {
        Ok(self.fetch_geographies(country).await?)
    }

    async fn create_actors(&self, tier: Tier, actors: &[Actor]) -> Result<(), StoreError> {
        if let Some(wrong) = actors.iter().find(|a| a.tier() != tier) {
            return Err(StoreError::InvalidInput(format!(
                "{} {} in a {tier} batch",
                wrong.tier(),
                wrong.id()
            )));
        }
        Ok(self.upsert_actors(tier, actors).await?)
    }

    async fn get_actors_by_country(
        &self,
        tier: Tier,
        country: &CountryId,
    ) -> Result<Vec<Actor>, StoreError> {
        Ok(self.fetch_actors(tier, country).await?)
    }

    async fn get_active_relationships(
        &self,
        year: u32,
        country: &CountryId,
        kind: RelationKind,
    ) -> Result<Vec<RelationshipEdge>, StoreError> {
        Ok(self.fetch_active_edges(year, country, kind).await?)
    }

    async fn end_relationships(
        &self,
        country: &CountryId,
        edges: &[EdgeKey],
        year: u32,
    ) -> Result<u64, StoreError> {
        Ok(self.end_active(country, edges, year).await?)
    }

    async fn create_relationships(&self, edges: &[RelationshipEdge]) -> Result<(), StoreError> {
        Ok(self.create_edges(edges).await?)
    }

    async fn create_trade_flows(
        &self,
        country: &CountryId,
        year: u32,
        flows: &[TradeFlow],
    ) -> Result<(), StoreError> {
        if flows.iter().any(|f| &f.country_id != country || f.year != year) {
            return Err(StoreError::InvalidInput(format!(
                "flows outside {country}/{year}"
            )));
        }
        Ok(self.replace_flows(country, year, flows).await?)
    }

    async fn get_trade_flows(&self, year: u32, country: &CountryId) -> Result<Vec<TradeFlow>, StoreError> {
        Ok(self.fetch_flows(year, country).await?)
    }

    async fn create_privileged_exports(
        &self,
        country: &CountryId,
        year: u32,
        exports: &[PrivilegedExport],
    ) -> Result<(), StoreError> {
        if exports.iter().any(|e| &e.country_id != country || e.year != year) {
            return Err(StoreError::InvalidInput(format!(
                "exports outside {country}/{year}"
            )));
        }
        Ok(self.replace_exports(country, year, exports).await?)
    }

    async fn get_privileged_exports(
        &self,
        year: u32,
        country: &CountryId,
    ) -> Result<Vec<PrivilegedExport>, StoreError> {
        Ok(self.fetch_exports(year, country).await?)
    }

    async fn commit_year(&self, commit: &YearCommit) -> Result<(), StoreError> {
        Ok(self.commit(commit).await?)
    }

    async fn delete_country(&self, country: &CountryId) -> Result<(), StoreError> {
        Ok(self.remove_country(country).await?)
    }
}
