//! Bulk stock and price resets. Each is a single `update_many`; the
//! interesting part is only which slot of the embedded arrays gets zeroed.

use std::time::Instant;

use mongodb::bson::{doc, Document};
use mongodb::Database;

use crate::db::collections;
use crate::ops::{OpContext, OpOutcome};
use crate::state::OperationKind;
use crate::AppResult;

/// Zero the primary quantity slot on every stock record.
pub async fn zero_all_stock(ctx: &OpContext, db: &Database) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::ZeroStock);

    ctx.progress("Zeroing all stock quantities...");
    let result = db
        .collection::<Document>(collections::ESTOQUES)
        .update_many(
            doc! {},
            doc! { "$set": { "Quantidades.0.Quantidade": 0.0 } },
        )
        .await?;

    outcome.matched = result.matched_count;
    outcome.modified = result.modified_count;
    ctx.progress(format!("{} stock record(s) zeroed.", outcome.modified));
    Ok(outcome.finish(started))
}

/// Zero only stock records whose primary quantity went negative.
pub async fn zero_negative_stock(ctx: &OpContext, db: &Database) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::ZeroNegativeStock);

    ctx.progress("Zeroing negative stock quantities...");
    let result = db
        .collection::<Document>(collections::ESTOQUES)
        .update_many(
            doc! { "Quantidades.0.Quantidade": { "$lt": 0 } },
            doc! { "$set": { "Quantidades.0.Quantidade": 0.0 } },
        )
        .await?;

    outcome.matched = result.matched_count;
    outcome.modified = result.modified_count;
    ctx.progress(format!(
        "{} negative stock record(s) zeroed.",
        outcome.modified
    ));
    Ok(outcome.finish(started))
}

/// Zero the primary cost and sale price slots on every company product.
pub async fn zero_all_prices(ctx: &OpContext, db: &Database) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::ZeroPrices);

    ctx.progress("Zeroing all product prices...");
    let result = db
        .collection::<Document>(collections::PRODUTOS_SERVICOS_EMPRESA)
        .update_many(
            doc! {},
            doc! { "$set": {
                "PrecosCustos.0.Valor": 0.0,
                "PrecosVendas.0.Valor": 0.0,
            } },
        )
        .await?;

    outcome.matched = result.matched_count;
    outcome.modified = result.modified_count;
    ctx.progress(format!("{} product price(s) zeroed.", outcome.modified));
    Ok(outcome.finish(started))
}
