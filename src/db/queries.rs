use sqlx::{Row, SqlitePool};

use crate::models::lookup::{CacheEntry, Flag};

/// Fetch the cache row for a CNPJ, regardless of age.
pub async fn get_cache_entry(
    pool: &SqlitePool,
    cnpj: &str,
) -> Result<Option<CacheEntry>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT cnpj, razao_social, simples_nacional, simei, data_consulta, fetched_at
        FROM cnpja_cache
        WHERE cnpj = ?
        "#,
    )
    .bind(cnpj)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(r) => {
            let razao_social: Option<String> = r.try_get("razao_social")?;
            let simples: Option<String> = r.try_get("simples_nacional")?;
            let simei: Option<String> = r.try_get("simei")?;
            let data_consulta: Option<String> = r.try_get("data_consulta")?;
            let fetched_at: Option<i64> = r.try_get("fetched_at")?;

            Some(CacheEntry {
                cnpj: r.try_get("cnpj")?,
                razao_social: razao_social.unwrap_or_default(),
                simples_nacional: Flag::from_stored(simples.as_deref().unwrap_or_default()),
                simei: Flag::from_stored(simei.as_deref().unwrap_or_default()),
                data_consulta: data_consulta.unwrap_or_default(),
                fetched_at: fetched_at.unwrap_or(0),
            })
        }
        None => None,
    })
}

/// Insert or overwrite the cache row for `entry.cnpj`.
pub async fn upsert_cache_entry(pool: &SqlitePool, entry: &CacheEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO cnpja_cache (cnpj, razao_social, simples_nacional, simei, data_consulta, fetched_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(cnpj) DO UPDATE SET
            razao_social = excluded.razao_social,
            simples_nacional = excluded.simples_nacional,
            simei = excluded.simei,
            data_consulta = excluded.data_consulta,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(&entry.cnpj)
    .bind(&entry.razao_social)
    .bind(entry.simples_nacional.as_ref())
    .bind(entry.simei.as_ref())
    .bind(&entry.data_consulta)
    .bind(entry.fetched_at)
    .execute(pool)
    .await?;

    Ok(())
}
