//! Destructive base maintenance: dropping transactional collections and
//! purging dated movement history. Both leave the deployment's configuration
//! and registration data in place.

use std::time::Instant;

use chrono::NaiveDate;
use mongodb::bson::{doc, Bson, Document};
use mongodb::Database;

use crate::db::collections;
use crate::ops::{note_cancelled, OpContext, OpOutcome, OpStatus};
use crate::state::OperationKind;
use crate::{AppError, AppResult};

pub const INVALID_DATE_CODE: &str = "OPS/INVALID_DATE";

/// Collections that survive a base clean. `Pessoas` is special-cased: it is
/// kept but stripped down to the emitter records.
const PRESERVED_COLLECTIONS: &[&str] = &[
    "startup_log",
    "ConfiguracoesServidor",
    "ConfiguracoesSincronizacao",
    "DigisatUpdate",
    collections::PESSOAS,
    "SequenciasDocumentos",
    "Estados",
    "Cidades",
];

pub(crate) fn is_preserved(name: &str) -> bool {
    name.starts_with("system.") || PRESERVED_COLLECTIONS.contains(&name)
}

/// Drop every collection except the preserve list; `Pessoas` keeps only the
/// emitter documents. Cancellable between collections, and a collection that
/// fails to drop is reported and skipped.
pub async fn clean_database(ctx: &OpContext, db: &Database) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::CleanBase);

    ctx.progress("Starting base clean...");
    let names = db.list_collection_names().await?;

    for name in names {
        if ctx.should_stop() {
            note_cancelled(ctx, &mut outcome);
            break;
        }

        if is_preserved(&name) {
            if name == collections::PESSOAS {
                ctx.progress(format!("Cleaning collection {name} (keeping emitters)..."));
                match db
                    .collection::<Document>(&name)
                    .delete_many(doc! { "_t": { "$ne": "Emitente" } })
                    .await
                {
                    Ok(result) => outcome.modified += result.deleted_count,
                    Err(err) => {
                        outcome.failed_steps += 1;
                        ctx.warn(format!("Failed to clean {name}: {err}"));
                    }
                }
            }
            continue;
        }

        ctx.progress(format!("Dropping collection {name}..."));
        outcome.matched += 1;
        match db.collection::<Document>(&name).drop().await {
            Ok(()) => outcome.modified += 1,
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!("Failed to drop collection {name}: {err}"));
            }
        }
    }

    if outcome.status != OpStatus::Cancelled {
        ctx.progress("Base clean finished. Another base can be restored now.");
    }
    Ok(outcome.finish(started))
}

/// Movement-bearing collections and the date field each one is purged by.
const DATED_COLLECTIONS: &[(&str, &str)] = &[
    (collections::MOVIMENTACOES, "DataMovimentacao"),
    ("ContasReceber", "DataEmissao"),
    ("ContasPagar", "DataEmissao"),
    ("DocumentosFiscaisSaida", "DataEmissao"),
];

/// Delete movement history strictly older than `before` (`YYYY-MM-DD`),
/// reporting per-collection deletion counts.
pub async fn purge_movements_before(
    ctx: &OpContext,
    db: &Database,
    before: &str,
) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::PurgeMovements);

    let date = parse_cutoff(before)?;
    ctx.progress(format!("Purging movements recorded before {before}..."));

    for (name, date_field) in DATED_COLLECTIONS {
        if ctx.should_stop() {
            note_cancelled(ctx, &mut outcome);
            break;
        }

        let filter = doc! { *date_field: { "$lt": date.clone() } };
        match db.collection::<Document>(name).delete_many(filter).await {
            Ok(result) => {
                outcome.modified += result.deleted_count;
                if result.deleted_count > 0 {
                    ctx.progress(format!(
                        "{name}: {} record(s) removed.",
                        result.deleted_count
                    ));
                }
            }
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!("Failed to purge {name}: {err}"));
            }
        }
    }

    if outcome.status != OpStatus::Cancelled {
        ctx.progress(format!(
            "Purge finished: {} record(s) removed in total.",
            outcome.modified
        ));
    }
    Ok(outcome.finish(started))
}

pub(crate) fn parse_cutoff(input: &str) -> AppResult<Bson> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| {
        AppError::new(
            INVALID_DATE_CODE,
            format!("'{input}' is not a valid date; use YYYY-MM-DD."),
        )
    })?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::new(INVALID_DATE_CODE, "date out of range"))?
        .and_utc();
    Ok(Bson::DateTime(mongodb::bson::DateTime::from_millis(
        midnight.timestamp_millis(),
    )))
}
