//! Product-record maintenance: deactivating depleted items and bulk tax
//! reclassification by NCM prefix.

use std::time::Instant;

use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;
use serde::Serialize;

use crate::db::collections;
use crate::ops::{note_cancelled, OpContext, OpOutcome, OpStatus};
use crate::state::OperationKind;
use crate::{AppError, AppResult};

pub const INVALID_TRIBUTATION_ID_CODE: &str = "OPS/INVALID_TRIBUTATION_ID";
pub const TRIBUTATION_NOT_FOUND_CODE: &str = "OPS/TRIBUTATION_NOT_FOUND";
pub const NO_VALID_PREFIX_CODE: &str = "OPS/NO_VALID_NCM_PREFIX";

/// Deactivate every product whose linked stock record is depleted: quantity
/// at or below zero, or no quantity entries at all. Walks stock records one
/// by one so the run can stop between documents on cancellation.
pub async fn inactivate_zero_products(ctx: &OpContext, db: &Database) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::InactivateProducts);

    let stocks = db.collection::<Document>(collections::ESTOQUES);
    let company_products = db.collection::<Document>(collections::PRODUTOS_SERVICOS_EMPRESA);
    let products = db.collection::<Document>(collections::PRODUTOS_SERVICOS);

    ctx.progress("Searching depleted stock records...");
    let filter = doc! {
        "$or": [
            { "Quantidades.0.Quantidade": { "$lte": 0 } },
            { "Quantidades": [] },
        ]
    };
    let mut cursor = stocks.find(filter).await?;
    ctx.progress("Search finished; iterating stock records...");

    while let Some(stock) = cursor.try_next().await? {
        if ctx.should_stop() {
            note_cancelled(ctx, &mut outcome);
            break;
        }

        let Ok(stock_id) = stock.get_object_id("_id") else {
            continue;
        };
        let Some(link) = company_products
            .find_one(doc! { "EstoqueReferencia": stock_id })
            .await?
        else {
            continue;
        };
        let Ok(product_ref) = link.get_object_id("ProdutoServicoReferencia") else {
            continue;
        };

        outcome.matched += 1;
        match products
            .update_one(
                doc! { "_id": product_ref },
                doc! { "$set": { "Ativo": false } },
            )
            .await
        {
            Ok(result) if result.modified_count > 0 => {
                outcome.modified += result.modified_count;
                ctx.progress(format!("Product {} deactivated.", product_ref.to_hex()));
            }
            Ok(_) => {}
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!(
                    "Failed to deactivate product {}: {err}",
                    product_ref.to_hex()
                ));
            }
        }
    }

    if outcome.status != OpStatus::Cancelled {
        ctx.progress(format!(
            "Done: {} product(s) deactivated out of {} depleted stock record(s).",
            outcome.modified, outcome.matched
        ));
    }
    Ok(outcome.finish(started))
}

/// Anchored, escaped pattern for a case-insensitive NCM prefix match. The
/// prefix is operator input, so regex metacharacters are taken literally.
pub(crate) fn ncm_prefix_pattern(prefix: &str) -> String {
    format!("^{}", regex::escape(prefix))
}

/// Point every product whose nested NCM code starts with one of `prefixes`
/// (case-insensitive) at the given state tax classification. One bulk update
/// per prefix; per-prefix failures are reported and the loop continues.
pub async fn change_tributation_by_ncm(
    ctx: &OpContext,
    db: &Database,
    prefixes: &[String],
    tributation_id: &str,
) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::RetributeNcm);

    let trib_id = ObjectId::parse_str(tributation_id).map_err(|_| {
        AppError::new(
            INVALID_TRIBUTATION_ID_CODE,
            format!("'{tributation_id}' is not a valid tax classification id."),
        )
    })?;

    let tributations = db.collection::<Document>(collections::TRIBUTACOES_ESTADUAL);
    let exists = tributations
        .count_documents(doc! { "_id": trib_id })
        .await?;
    if exists == 0 {
        return Err(AppError::new(
            TRIBUTATION_NOT_FOUND_CODE,
            format!("Tax classification {tributation_id} does not exist in the database."),
        ));
    }

    let cleaned: Vec<&str> = prefixes
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Err(AppError::new(
            NO_VALID_PREFIX_CODE,
            "No usable NCM prefix was supplied.",
        ));
    }

    let company_products = db.collection::<Document>(collections::PRODUTOS_SERVICOS_EMPRESA);
    for prefix in cleaned {
        if ctx.should_stop() {
            note_cancelled(ctx, &mut outcome);
            break;
        }

        let filter = doc! {
            "NcmNbs.Codigo": { "$regex": ncm_prefix_pattern(prefix), "$options": "i" }
        };
        let update = doc! { "$set": { "TributacaoEstadualReferencia": trib_id } };
        match company_products.update_many(filter, update).await {
            Ok(result) => {
                outcome.matched += result.matched_count;
                if result.modified_count > 0 {
                    outcome.modified += result.modified_count;
                    ctx.progress(format!(
                        "Updated {} product(s) with NCM starting with {prefix}.",
                        result.modified_count
                    ));
                } else {
                    ctx.progress(format!("No product found for NCM starting with {prefix}."));
                }
            }
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!("Failed to process NCM {prefix}: {err}"));
            }
        }
    }

    if outcome.status != OpStatus::Cancelled {
        ctx.progress(format!(
            "Reclassification finished: {} product(s) updated.",
            outcome.modified
        ));
    }
    Ok(outcome.finish(started))
}

#[derive(Debug, Clone, Serialize)]
pub struct TributationEntry {
    pub id: String,
    pub description: String,
}

/// Active state tax classifications, for looking up the target id before a
/// reclassification run.
pub async fn list_tributations(db: &Database) -> AppResult<Vec<TributationEntry>> {
    collect_tributations(db, collections::TRIBUTACOES_ESTADUAL, doc! { "Ativo": true }).await
}

/// Federal tax classifications, id and description only.
pub async fn list_federal_tributations(db: &Database) -> AppResult<Vec<TributationEntry>> {
    collect_tributations(db, collections::TRIBUTACOES_FEDERAL, doc! {}).await
}

async fn collect_tributations(
    db: &Database,
    collection: &str,
    filter: Document,
) -> AppResult<Vec<TributationEntry>> {
    let mut cursor = db
        .collection::<Document>(collection)
        .find(filter)
        .projection(doc! { "_id": 1, "Descricao": 1 })
        .await?;

    let mut entries = Vec::new();
    while let Some(doc) = cursor.try_next().await? {
        let Ok(id) = doc.get_object_id("_id") else {
            continue;
        };
        let description = doc
            .get_str("Descricao")
            .unwrap_or("No description")
            .to_string();
        entries.push(TributationEntry {
            id: id.to_hex(),
            description,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pattern_is_anchored() {
        assert_eq!(ncm_prefix_pattern("8471"), "^8471");
    }

    #[test]
    fn prefix_pattern_escapes_metacharacters() {
        let pattern = ncm_prefix_pattern("84.71");
        assert_eq!(pattern, r"^84\.71");

        let re = regex::RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .expect("pattern compiles");
        assert!(re.is_match("84.71.10"));
        assert!(!re.is_match("84X71"));
    }

    #[test]
    fn prefix_pattern_matches_case_insensitively() {
        let re = regex::RegexBuilder::new(&ncm_prefix_pattern("ab"))
            .case_insensitive(true)
            .build()
            .expect("pattern compiles");
        assert!(re.is_match("AB123"));
        assert!(re.is_match("ab123"));
        assert!(!re.is_match("1ab23"));
    }
}
