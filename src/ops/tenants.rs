//! Tenant (emitter) record maintenance.

use std::time::Instant;

use mongodb::bson::{doc, Document};
use mongodb::Database;

use crate::db::collections;
use crate::ops::{OpContext, OpOutcome};
use crate::state::OperationKind;
use crate::AppResult;

/// Flip the MEI enablement flag on every emitter record. One bulk update over
/// `Pessoas` keyed on the third type discriminator. Re-running against an
/// already-toggled base modifies nothing, which gets its own advisory line.
pub async fn enable_mei(ctx: &OpContext, db: &Database) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::EnableMei);

    ctx.progress("Enabling the MEI flag on emitter records...");
    let people = db.collection::<Document>(collections::PESSOAS);
    let result = people
        .update_many(
            doc! { "_t.2": "Emitente" },
            doc! { "$set": { "MicroempreendedorIndividual.Habilitado": true } },
        )
        .await?;

    outcome.matched = result.matched_count;
    outcome.modified = result.modified_count;

    match result.modified_count {
        0 => ctx.warn(
            "No record was modified. Either the flag is already enabled or no base was restored."
                .to_string(),
        ),
        1 => ctx.progress("1 record found and updated."),
        n => ctx.progress(format!("{n} records found and updated.")),
    }

    Ok(outcome.finish(started))
}
