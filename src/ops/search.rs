//! Locating every occurrence of an identifier across the whole database.
//!
//! A plain linear scan: every collection, every document, every field. The
//! document walker is a pure function over `bson::Document` so the matching
//! rules are testable without a server.

use std::time::Instant;

use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::Database;

use crate::ops::{note_cancelled, OpContext, OpOutcome, OpStatus};
use crate::state::OperationKind;
use crate::AppResult;

/// The identifier being searched for, compared both as an ObjectId (when the
/// input parses as one) and as its literal string form.
#[derive(Debug, Clone)]
pub struct SearchTarget {
    raw: String,
    oid: Option<ObjectId>,
}

impl SearchTarget {
    pub fn parse(raw: &str) -> Self {
        SearchTarget {
            raw: raw.trim().to_string(),
            oid: ObjectId::parse_str(raw.trim()).ok(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn matches(&self, value: &Bson) -> bool {
        match value {
            Bson::ObjectId(oid) => {
                self.oid.map(|target| target == *oid).unwrap_or(false) || oid.to_hex() == self.raw
            }
            Bson::String(s) => *s == self.raw,
            _ => false,
        }
    }
}

/// Field paths within `doc` whose value equals the target. Nested documents
/// are reported dotted (`Pessoa.Referencia`), array elements indexed
/// (`Parcelas[0].Pessoa`).
pub fn matching_fields(doc: &Document, target: &SearchTarget) -> Vec<String> {
    let mut matches = Vec::new();
    for (key, value) in doc {
        collect_matches(key, value, target, &mut matches);
    }
    matches
}

fn collect_matches(path: &str, value: &Bson, target: &SearchTarget, matches: &mut Vec<String>) {
    if target.matches(value) {
        matches.push(path.to_string());
        return;
    }
    match value {
        Bson::Document(nested) => {
            for (key, nested_value) in nested {
                collect_matches(&format!("{path}.{key}"), nested_value, target, matches);
            }
        }
        Bson::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_matches(&format!("{path}[{index}]"), item, target, matches);
            }
        }
        _ => {}
    }
}

/// Scan all collections for the identifier, reporting one line per
/// (collection, field path) hit. Cancellable between collections and between
/// documents. A collection that cannot be read is reported and skipped.
pub async fn find_identifier(ctx: &OpContext, db: &Database, raw_id: &str) -> AppResult<OpOutcome> {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::FindIdentifier);
    let target = SearchTarget::parse(raw_id);

    ctx.progress(format!(
        "Searching for {} across all collections...",
        target.raw()
    ));

    let names = db.list_collection_names().await?;
    'collections: for name in names {
        if ctx.should_stop() {
            note_cancelled(ctx, &mut outcome);
            break;
        }

        let collection = db.collection::<Document>(&name);
        let mut cursor = match collection.find(doc! {}).await {
            Ok(cursor) => cursor,
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!("Could not read collection {name}: {err}"));
                continue;
            }
        };

        loop {
            if ctx.should_stop() {
                note_cancelled(ctx, &mut outcome);
                break 'collections;
            }
            let document = match cursor.try_next().await {
                Ok(Some(document)) => document,
                Ok(None) => break,
                Err(err) => {
                    outcome.failed_steps += 1;
                    ctx.warn(format!("Cursor error in collection {name}: {err}"));
                    break;
                }
            };
            for field in matching_fields(&document, &target) {
                outcome.matched += 1;
                ctx.progress(format!("Found in collection {name}, field {field}"));
            }
        }
    }

    if outcome.matched == 0 && outcome.status != OpStatus::Cancelled {
        ctx.progress(format!("No occurrences of {} were found.", target.raw()));
    }
    Ok(outcome.finish(started))
}
