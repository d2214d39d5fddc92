//! Scrubbing embedded person images out of card-payment history documents.
//!
//! Receipt printers embed the operator photo into every card payment entry,
//! which balloons the transactional collections. The statements below unset
//! those blobs wherever the payment-kind description mentions cards. The
//! history array is only ever written at indices 0..3 by the server, hence
//! the fixed index range.

use std::time::Instant;

use mongodb::bson::{doc, Document};
use mongodb::Database;

use crate::db::collections;
use crate::ops::{note_cancelled, OpContext, OpOutcome, OpStatus};
use crate::state::OperationKind;
use crate::AppResult;

const CARD_DESCRIPTION_PATTERN: &str = ".*Cart.*";
const HISTORY_INDICES: std::ops::Range<usize> = 0..3;

/// One `update_many` to issue: filter field matched against the card pattern,
/// image field to unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScrubStatement {
    pub collection: &'static str,
    pub filter_field: String,
    pub unset_field: String,
}

pub(crate) fn scrub_statements() -> Vec<ScrubStatement> {
    let mut statements = Vec::new();

    for i in HISTORY_INDICES {
        statements.push(ScrubStatement {
            collection: collections::MOVIMENTACOES,
            filter_field: format!(
                "PagamentoRecebimento.Parcelas.0.Historico.{i}.EspeciePagamento.Descricao"
            ),
            unset_field: format!(
                "PagamentoRecebimento.Parcelas.0.Historico.{i}.EspeciePagamento.Pessoa.Imagem"
            ),
        });
    }
    statements.push(ScrubStatement {
        collection: collections::MOVIMENTACOES,
        filter_field: "PagamentoRecebimento.Parcelas.0.Historico.0.EspeciePagamento.Descricao"
            .to_string(),
        unset_field: "PagamentoRecebimento.Parcelas.0.Pessoa.Imagem".to_string(),
    });

    for i in HISTORY_INDICES {
        statements.push(ScrubStatement {
            collection: collections::RECEBIMENTOS,
            filter_field: format!("Historico.{i}.EspeciePagamento.Descricao"),
            unset_field: format!("Historico.{i}.EspeciePagamento.Pessoa.Imagem"),
        });
    }
    statements.push(ScrubStatement {
        collection: collections::RECEBIMENTOS,
        filter_field: "Historico.0.EspeciePagamento.Descricao".to_string(),
        unset_field: "Pessoa.Imagem".to_string(),
    });

    statements.push(ScrubStatement {
        collection: collections::TURNOS_LANCAMENTOS,
        filter_field: "EspeciePagamento.Descricao".to_string(),
        unset_field: "EspeciePagamento.Pessoa.Imagem".to_string(),
    });

    statements
}

/// Run the full scrub sequence, cancellable between statements. A failing
/// statement is reported and the sequence moves on.
pub async fn scrub_payment_images(ctx: &OpContext, db: &Database) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::ScrubMovements);

    ctx.progress("Starting payment-image scrub...");
    let mut current_collection = "";

    for statement in scrub_statements() {
        if ctx.should_stop() {
            note_cancelled(ctx, &mut outcome);
            break;
        }

        if statement.collection != current_collection {
            current_collection = statement.collection;
            ctx.progress(format!("Updating {current_collection}..."));
        }

        let filter = doc! {
            &statement.filter_field: { "$regex": CARD_DESCRIPTION_PATTERN, "$options": "i" }
        };
        let update = doc! { "$unset": { &statement.unset_field: "" } };
        match db
            .collection::<Document>(statement.collection)
            .update_many(filter, update)
            .await
        {
            Ok(result) => {
                outcome.matched += result.matched_count;
                outcome.modified += result.modified_count;
            }
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!(
                    "Failed to update {} ({}): {err}",
                    statement.collection, statement.unset_field
                ));
            }
        }
    }

    if outcome.status != OpStatus::Cancelled {
        ctx.progress(format!(
            "Scrub finished: {} document(s) updated.",
            outcome.modified
        ));
    }
    Ok(outcome.finish(started))
}
