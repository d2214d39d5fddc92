//! End-to-end operation tests against a real MongoDB server.
//!
//! The whole file is gated on `DIGIMAINT_TEST_MONGODB_URI`; when the variable
//! is unset every test returns early so the suite stays green on machines
//! without a server. Each test works in its own throwaway database and drops
//! it on the way out.

mod support;

use std::sync::Arc;

use digimaint::ops::{
    base, movements, products, search, stock, tenants, OpContext, OpEvent, OpReporter, OpStatus,
};
use digimaint::state::OperationState;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::{Client, Database};

use support::{event_lines, recording_reporter};

const URI_VAR: &str = "DIGIMAINT_TEST_MONGODB_URI";

async fn test_db(name: &str) -> Option<Database> {
    let uri = std::env::var(URI_VAR).ok()?;
    let client = Client::with_uri_str(&uri)
        .await
        .expect("connect to the test server");
    let db = client.database(&format!("digimaint_test_{name}"));
    db.drop().await.expect("start from an empty database");
    Some(db)
}

fn quiet_ctx() -> OpContext {
    OpContext::new(OperationState::new(), recording_reporter().0)
}

async fn insert(db: &Database, collection: &str, docs: Vec<Document>) {
    db.collection::<Document>(collection)
        .insert_many(docs)
        .await
        .expect("seed documents");
}

#[tokio::test]
async fn inactivation_only_touches_products_linked_to_depleted_stock() {
    let Some(db) = test_db("inactivate").await else {
        return;
    };

    let depleted_stock = ObjectId::new();
    let empty_stock = ObjectId::new();
    let healthy_stock = ObjectId::new();
    let depleted_product = ObjectId::new();
    let empty_product = ObjectId::new();
    let healthy_product = ObjectId::new();

    insert(
        &db,
        "Estoques",
        vec![
            doc! { "_id": depleted_stock, "Quantidades": [ { "Quantidade": 0.0 } ] },
            doc! { "_id": empty_stock, "Quantidades": [] },
            doc! { "_id": healthy_stock, "Quantidades": [ { "Quantidade": 5.0 } ] },
        ],
    )
    .await;
    insert(
        &db,
        "ProdutosServicosEmpresa",
        vec![
            doc! { "EstoqueReferencia": depleted_stock, "ProdutoServicoReferencia": depleted_product },
            doc! { "EstoqueReferencia": empty_stock, "ProdutoServicoReferencia": empty_product },
            doc! { "EstoqueReferencia": healthy_stock, "ProdutoServicoReferencia": healthy_product },
        ],
    )
    .await;
    insert(
        &db,
        "ProdutosServicos",
        vec![
            doc! { "_id": depleted_product, "Ativo": true },
            doc! { "_id": empty_product, "Ativo": true },
            doc! { "_id": healthy_product, "Ativo": true },
        ],
    )
    .await;

    let outcome = products::inactivate_zero_products(&quiet_ctx(), &db)
        .await
        .expect("operation runs");

    assert_eq!(outcome.status, OpStatus::Completed);
    assert_eq!(outcome.matched, 2);
    assert_eq!(outcome.modified, 2);

    let product_coll = db.collection::<Document>("ProdutosServicos");
    for (id, expected) in [
        (depleted_product, false),
        (empty_product, false),
        (healthy_product, true),
    ] {
        let doc = product_coll
            .find_one(doc! { "_id": id })
            .await
            .expect("read back")
            .expect("product exists");
        assert_eq!(doc.get_bool("Ativo").expect("Ativo field"), expected);
    }

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn ncm_reclassification_matches_prefixes_case_insensitively() {
    let Some(db) = test_db("retribute").await else {
        return;
    };

    let trib = ObjectId::new();
    let old_trib = ObjectId::new();
    insert(
        &db,
        "TributacoesEstadual",
        vec![doc! { "_id": trib, "Ativo": true, "Descricao": "ICMS 18%" }],
    )
    .await;
    insert(
        &db,
        "ProdutosServicosEmpresa",
        vec![
            doc! { "NcmNbs": { "Codigo": "84715010" }, "TributacaoEstadualReferencia": old_trib },
            doc! { "NcmNbs": { "Codigo": "84713000" }, "TributacaoEstadualReferencia": old_trib },
            doc! { "NcmNbs": { "Codigo": "85098090" }, "TributacaoEstadualReferencia": old_trib },
        ],
    )
    .await;

    let outcome = products::change_tributation_by_ncm(
        &quiet_ctx(),
        &db,
        &["  8471 ".to_string(), String::new()],
        &trib.to_hex(),
    )
    .await
    .expect("operation runs");

    assert_eq!(outcome.modified, 2);

    let updated = db
        .collection::<Document>("ProdutosServicosEmpresa")
        .count_documents(doc! { "TributacaoEstadualReferencia": trib })
        .await
        .expect("count updated");
    assert_eq!(updated, 2);

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn ncm_reclassification_rejects_an_unknown_tributation() {
    let Some(db) = test_db("retribute_unknown").await else {
        return;
    };

    let err = products::change_tributation_by_ncm(
        &quiet_ctx(),
        &db,
        &["8471".to_string()],
        &ObjectId::new().to_hex(),
    )
    .await
    .expect_err("missing tributation is an error");
    assert_eq!(err.code(), products::TRIBUTATION_NOT_FOUND_CODE);

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn enable_mei_modifies_nothing_on_a_second_run() {
    let Some(db) = test_db("mei").await else {
        return;
    };

    insert(
        &db,
        "Pessoas",
        vec![
            doc! { "_t": ["Pessoa", "PessoaJuridica", "Emitente"], "Nome": "Emitente" },
            doc! { "_t": ["Pessoa", "PessoaFisica", "Cliente"], "Nome": "Cliente" },
        ],
    )
    .await;

    let first = tenants::enable_mei(&quiet_ctx(), &db)
        .await
        .expect("first run");
    assert_eq!(first.modified, 1);

    let second = tenants::enable_mei(&quiet_ctx(), &db)
        .await
        .expect("second run");
    assert_eq!(second.status, OpStatus::Completed);
    assert_eq!(second.modified, 0);

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn scrub_cancellation_keeps_earlier_writes_and_skips_later_statements() {
    let Some(db) = test_db("scrub_cancel").await else {
        return;
    };

    insert(
        &db,
        "Movimentacoes",
        vec![doc! {
            "PagamentoRecebimento": { "Parcelas": [ {
                "Historico": [ {
                    "EspeciePagamento": {
                        "Descricao": "Cartao de Credito",
                        "Pessoa": { "Imagem": "blob" },
                    },
                } ],
            } ] },
        }],
    )
    .await;
    insert(
        &db,
        "TurnosLancamentos",
        vec![doc! {
            "EspeciePagamento": {
                "Descricao": "Cartao de Debito",
                "Pessoa": { "Imagem": "blob" },
            },
        }],
    )
    .await;

    let state = OperationState::new();
    let cancel_state = Arc::clone(&state);
    // Cancel once the first collection is announced; the statement in flight
    // still lands, the checkpoint before the second one stops the run.
    let reporter: OpReporter = Arc::new(move |event| {
        if let OpEvent::Progress(line) = &event {
            if line == "Updating Movimentacoes..." {
                cancel_state.cancel_all();
            }
        }
    });
    let ctx = OpContext::new(state, reporter);
    let outcome = movements::scrub_payment_images(&ctx, &db)
        .await
        .expect("operation runs");

    assert_eq!(outcome.status, OpStatus::Cancelled);

    let scrubbed = db
        .collection::<Document>("Movimentacoes")
        .count_documents(doc! {
            "PagamentoRecebimento.Parcelas.0.Historico.0.EspeciePagamento.Pessoa.Imagem":
                { "$exists": true }
        })
        .await
        .expect("count scrubbed");
    assert_eq!(scrubbed, 0);

    let untouched = db
        .collection::<Document>("TurnosLancamentos")
        .count_documents(doc! { "EspeciePagamento.Pessoa.Imagem": { "$exists": true } })
        .await
        .expect("count untouched");
    assert_eq!(untouched, 1);

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn cancelled_inactivation_leaves_products_alone_and_prints_no_summary() {
    let Some(db) = test_db("inactivate_cancel").await else {
        return;
    };

    let stock_id = ObjectId::new();
    let product_id = ObjectId::new();
    insert(
        &db,
        "Estoques",
        vec![doc! { "_id": stock_id, "Quantidades": [ { "Quantidade": 0.0 } ] }],
    )
    .await;
    insert(
        &db,
        "ProdutosServicosEmpresa",
        vec![doc! { "EstoqueReferencia": stock_id, "ProdutoServicoReferencia": product_id }],
    )
    .await;
    insert(&db, "ProdutosServicos", vec![doc! { "_id": product_id, "Ativo": true }]).await;

    let state = OperationState::new();
    state.cancel_all();
    let (reporter, events) = recording_reporter();
    let ctx = OpContext::new(state, reporter);
    let outcome = products::inactivate_zero_products(&ctx, &db)
        .await
        .expect("operation runs");

    assert_eq!(outcome.status, OpStatus::Cancelled);
    assert!(event_lines(&events).iter().all(|l| !l.starts_with("Done:")));

    let product = db
        .collection::<Document>("ProdutosServicos")
        .find_one(doc! { "_id": product_id })
        .await
        .expect("read back")
        .expect("product exists");
    assert!(product.get_bool("Ativo").expect("Ativo field"));

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn cancelled_reclassification_prints_no_summary() {
    let Some(db) = test_db("retribute_cancel").await else {
        return;
    };

    let trib = ObjectId::new();
    insert(
        &db,
        "TributacoesEstadual",
        vec![doc! { "_id": trib, "Ativo": true, "Descricao": "ICMS 18%" }],
    )
    .await;

    let state = OperationState::new();
    state.cancel_all();
    let (reporter, events) = recording_reporter();
    let ctx = OpContext::new(state, reporter);
    let outcome = products::change_tributation_by_ncm(
        &ctx,
        &db,
        &["8471".to_string()],
        &trib.to_hex(),
    )
    .await
    .expect("operation runs");

    assert_eq!(outcome.status, OpStatus::Cancelled);
    assert_eq!(outcome.matched, 0);
    assert!(event_lines(&events)
        .iter()
        .all(|l| !l.starts_with("Reclassification finished")));

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn zeroing_negative_stock_leaves_positive_quantities_alone() {
    let Some(db) = test_db("negative_stock").await else {
        return;
    };

    insert(
        &db,
        "Estoques",
        vec![
            doc! { "Codigo": 1, "Quantidades": [ { "Quantidade": -3.5 } ] },
            doc! { "Codigo": 2, "Quantidades": [ { "Quantidade": 2.0 } ] },
        ],
    )
    .await;

    let outcome = stock::zero_negative_stock(&quiet_ctx(), &db)
        .await
        .expect("operation runs");
    assert_eq!(outcome.modified, 1);

    let stocks = db.collection::<Document>("Estoques");
    let zeroed = stocks
        .find_one(doc! { "Codigo": 1 })
        .await
        .expect("read back")
        .expect("record exists");
    let untouched = stocks
        .find_one(doc! { "Codigo": 2 })
        .await
        .expect("read back")
        .expect("record exists");

    let quantity = |d: &Document| {
        d.get_array("Quantidades").expect("array")[0]
            .as_document()
            .expect("entry")
            .get_f64("Quantidade")
            .expect("quantity")
    };
    assert_eq!(quantity(&zeroed), 0.0);
    assert_eq!(quantity(&untouched), 2.0);

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn purge_deletes_only_records_before_the_cutoff() {
    let Some(db) = test_db("purge").await else {
        return;
    };

    let old = Bson::DateTime(mongodb::bson::DateTime::from_millis(0));
    let recent = Bson::DateTime(mongodb::bson::DateTime::now());
    insert(
        &db,
        "Movimentacoes",
        vec![
            doc! { "Codigo": 1, "DataMovimentacao": old.clone() },
            doc! { "Codigo": 2, "DataMovimentacao": recent.clone() },
        ],
    )
    .await;
    insert(
        &db,
        "ContasReceber",
        vec![doc! { "Codigo": 3, "DataEmissao": old }],
    )
    .await;

    let outcome = base::purge_movements_before(&quiet_ctx(), &db, "2020-01-01")
        .await
        .expect("operation runs");
    assert_eq!(outcome.modified, 2);

    let remaining = db
        .collection::<Document>("Movimentacoes")
        .count_documents(doc! {})
        .await
        .expect("count");
    assert_eq!(remaining, 1);

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn clean_base_preserves_configuration_and_emitters() {
    let Some(db) = test_db("clean_base").await else {
        return;
    };

    insert(&db, "Movimentacoes", vec![doc! { "Codigo": 1 }]).await;
    insert(&db, "Estoques", vec![doc! { "Codigo": 1 }]).await;
    insert(
        &db,
        "ConfiguracoesServidor",
        vec![doc! { "Porta": 12220 }],
    )
    .await;
    insert(
        &db,
        "Pessoas",
        vec![
            doc! { "_t": "Emitente", "Nome": "Emitente" },
            doc! { "_t": "Cliente", "Nome": "Cliente" },
        ],
    )
    .await;

    let outcome = base::clean_database(&quiet_ctx(), &db)
        .await
        .expect("operation runs");
    assert_eq!(outcome.status, OpStatus::Completed);

    let names = db.list_collection_names().await.expect("list collections");
    assert!(!names.contains(&"Movimentacoes".to_string()));
    assert!(!names.contains(&"Estoques".to_string()));
    assert!(names.contains(&"ConfiguracoesServidor".to_string()));

    let people = db.collection::<Document>("Pessoas");
    assert_eq!(people.count_documents(doc! {}).await.expect("count"), 1);
    let kept = people
        .find_one(doc! {})
        .await
        .expect("read back")
        .expect("one person left");
    assert_eq!(kept.get_str("_t").expect("_t"), "Emitente");

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn identifier_search_reports_collection_and_field_for_each_hit() {
    let Some(db) = test_db("search").await else {
        return;
    };

    let person = ObjectId::new();
    insert(
        &db,
        "Pessoas",
        vec![doc! { "_id": person, "Nome": "Fulano" }],
    )
    .await;
    insert(
        &db,
        "Movimentacoes",
        vec![doc! { "Pessoa": { "Referencia": person } }],
    )
    .await;

    let (reporter, events) = recording_reporter();
    let ctx = OpContext::new(OperationState::new(), reporter);
    let outcome = search::find_identifier(&ctx, &db, &person.to_hex())
        .await
        .expect("operation runs");

    assert_eq!(outcome.matched, 2);
    let lines = event_lines(&events);
    assert!(lines.contains(&"Found in collection Pessoas, field _id".to_string()));
    assert!(lines
        .contains(&"Found in collection Movimentacoes, field Pessoa.Referencia".to_string()));

    db.drop().await.expect("drop test database");
}

#[tokio::test]
async fn identifier_search_reports_a_distinct_no_match_line() {
    let Some(db) = test_db("search_miss").await else {
        return;
    };

    insert(&db, "Pessoas", vec![doc! { "Nome": "Fulano" }]).await;

    let absent = ObjectId::new().to_hex();
    let (reporter, events) = recording_reporter();
    let ctx = OpContext::new(OperationState::new(), reporter);
    let outcome = search::find_identifier(&ctx, &db, &absent)
        .await
        .expect("operation runs");

    assert_eq!(outcome.status, OpStatus::Completed);
    assert_eq!(outcome.matched, 0);
    assert!(event_lines(&events)
        .contains(&format!("No occurrences of {absent} were found.")));

    db.drop().await.expect("drop test database");
}
