use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use opensearch::http::request::JsonBody;
use opensearch::http::response::Response;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::http::{StatusCode, Url};
use opensearch::indices::{IndicesCreateParts, IndicesExistsParts};
use opensearch::params::Refresh;
use opensearch::{BulkParts, DeleteParts, IndexParts, OpenSearch, SearchParts};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::SearchError;
use crate::models::{Game, GameDocument, GameMetrics, Paging, SearchPage, MAX_PAGE_SIZE};

use super::buckets::{normalize_metrics, BucketPolicy, RawMetrics};
use super::GameSearch;

pub struct OpenSearchEngine {
    client: OpenSearch,
    index: String,
    policy: BucketPolicy,
    ready: OnceCell<()>,
}

impl OpenSearchEngine {
    pub fn new(url: &str, index: &str, policy: BucketPolicy, timeout: Duration) -> Result<Self, SearchError> {
        let url = Url::parse(url).map_err(|e| SearchError::Bootstrap(format!("invalid search url '{url}': {e}")))?;
        let transport = TransportBuilder::new(SingleNodeConnectionPool::new(url))
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Bootstrap(e.to_string()))?;

        let index = match index.trim() {
            "" => "games".to_string(),
            name => name.to_string(),
        };

        Ok(Self {
            client: OpenSearch::new(transport),
            index,
            policy,
            ready: OnceCell::new(),
        })
    }

    /// Creates the index on first use. Losing a creation race to another
    /// process counts as success; a failed attempt is retried next call.
    async fn ensure_index(&self) -> Result<(), SearchError> {
        self.ready
            .get_or_try_init(|| self.create_index_if_missing())
            .await
            .map(|_| ())
    }

    async fn create_index_if_missing(&self) -> Result<(), SearchError> {
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index.as_str()]))
            .send()
            .await
            .map_err(|e| SearchError::Bootstrap(e.to_string()))?;
        if index_exists(exists.status_code())? {
            return Ok(());
        }

        let res = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&self.index))
            .body(mapping_body())
            .send()
            .await
            .map_err(|e| SearchError::Bootstrap(e.to_string()))?;

        let status = res.status_code();
        let body = if status.is_success() {
            Value::Null
        } else {
            res.json::<Value>().await.unwrap_or(Value::Null)
        };
        match creation_outcome(status, &body)? {
            Creation::Created => tracing::info!(index = %self.index, "created search index"),
            Creation::AlreadyExisted => tracing::debug!(index = %self.index, "search index created concurrently"),
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Creation {
    Created,
    AlreadyExisted,
}

/// Reading of the index-exists check: 2xx present, 404 absent.
fn index_exists(status: StatusCode) -> Result<bool, SearchError> {
    match status {
        s if s.is_success() => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        s => Err(SearchError::Bootstrap(format!("index existence check returned {s}"))),
    }
}

/// Losing the creation race to another writer is still a usable index.
fn creation_outcome(status: StatusCode, body: &Value) -> Result<Creation, SearchError> {
    if status.is_success() {
        Ok(Creation::Created)
    } else if is_already_exists(body) {
        Ok(Creation::AlreadyExisted)
    } else {
        Err(SearchError::Bootstrap(error_reason(status, body)))
    }
}

/// Text fields carry an unanalyzed `keyword` sub-field for sorting; price
/// is a double.
pub(crate) fn mapping_body() -> Value {
    let text_with_keyword = json!({
        "type": "text",
        "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
    });
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "title": text_with_keyword.clone(),
                "description": text_with_keyword,
                "price": { "type": "double" }
            }
        }
    })
}

/// Default `index.max_result_window`; `from + size` beyond it is rejected
/// by the engine.
pub(crate) const MAX_RESULT_WINDOW: i64 = 10_000;

/// Pages past the result window fetch no hits but still report the total.
pub(crate) fn search_body(q: &str, paging: Paging) -> Value {
    let q = q.trim();
    let query = if q.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({
            "multi_match": {
                "query": q,
                "fields": ["title^2", "description"],
                "type": "best_fields",
                "lenient": true
            }
        })
    };
    let from = paging.offset();
    let (from, size) = if from >= MAX_RESULT_WINDOW {
        (0, 0)
    } else {
        (from, (paging.size as i64).min(MAX_RESULT_WINDOW - from))
    };
    json!({
        "from": from,
        "size": size,
        "track_total_hits": true,
        "query": query,
        "sort": [ { "title.keyword": { "order": "asc" } } ]
    })
}

pub(crate) fn metrics_body(policy: &BucketPolicy) -> Value {
    let ranges: Vec<Value> = policy
        .ranges()
        .into_iter()
        .map(|(from, to)| {
            let mut r = json!({
                "key": BucketPolicy::key_for(from),
                "from": from.to_f64().unwrap_or_default(),
            });
            if let Some(to) = to {
                r["to"] = json!(to.to_f64().unwrap_or_default());
            }
            r
        })
        .collect();

    json!({
        "size": 0,
        "aggs": {
            "total_docs": { "value_count": { "field": "price" } },
            "avg_price": { "avg": { "field": "price" } },
            "min_price": { "min": { "field": "price" } },
            "max_price": { "max": { "field": "price" } },
            "price_ranges": { "range": { "field": "price", "ranges": ranges } }
        }
    })
}

/// Action/source line pairs for the `_bulk` endpoint.
pub(crate) fn bulk_body(games: &[Game]) -> Vec<Value> {
    let mut body = Vec::with_capacity(games.len() * 2);
    for game in games {
        let doc = GameDocument::from(game);
        body.push(json!({ "index": { "_id": doc.id.to_string() } }));
        body.push(json!(doc));
    }
    body
}

pub(crate) fn parse_search_response(body: &Value) -> Result<SearchPage, SearchError> {
    let hits = &body["hits"];
    // object form on 7.x+, bare number on older clusters
    let total = hits["total"]["value"]
        .as_u64()
        .or_else(|| hits["total"].as_u64())
        .ok_or_else(|| SearchError::Response("missing hits.total".into()))?;

    let items = hits["hits"]
        .as_array()
        .map(|arr| arr.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|h| {
            let doc: GameDocument = serde_json::from_value(h["_source"].clone())
                .map_err(|e| SearchError::Response(format!("bad document {}: {e}", h["_id"])))?;
            Game::try_from(doc).map_err(|e| SearchError::Response(format!("invalid document {}: {e}", h["_id"])))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SearchPage { items, total })
}

fn decimal(v: &Value) -> Option<Decimal> {
    v.as_f64().and_then(|f| Decimal::from_str(&f.to_string()).ok())
}

pub(crate) fn parse_metrics_response(policy: &BucketPolicy, body: &Value) -> Result<GameMetrics, SearchError> {
    let aggs = body
        .get("aggregations")
        .ok_or_else(|| SearchError::Response("missing aggregations".into()))?;

    let by_key: HashMap<&str, u64> = aggs["price_ranges"]["buckets"]
        .as_array()
        .map(|arr| arr.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(|b| Some((b["key"].as_str()?, b["doc_count"].as_u64().unwrap_or(0))))
        .collect();

    let raw = RawMetrics {
        count: aggs["total_docs"]["value"].as_f64().unwrap_or(0.0).max(0.0) as u64,
        avg: decimal(&aggs["avg_price"]["value"]),
        min: decimal(&aggs["min_price"]["value"]),
        max: decimal(&aggs["max_price"]["value"]),
        buckets: policy
            .ranges()
            .into_iter()
            .filter_map(|(from, _)| by_key.get(BucketPolicy::key_for(from).as_str()).map(|n| (from, *n)))
            .collect(),
    };
    Ok(normalize_metrics(policy, raw))
}

fn is_already_exists(body: &Value) -> bool {
    body["error"]["type"].as_str() == Some("resource_already_exists_exception")
}

fn error_reason(status: StatusCode, body: &Value) -> String {
    body["error"]["reason"]
        .as_str()
        .or_else(|| body["error"].as_str())
        .map(|r| format!("{status}: {r}"))
        .unwrap_or_else(|| status.to_string())
}

/// Body of a 2xx response, or the error reason wrapped by `err`.
async fn read_success(res: Response, err: fn(String) -> SearchError) -> Result<Value, SearchError> {
    let status = res.status_code();
    let body = res.json::<Value>().await.unwrap_or(Value::Null);
    if status.is_success() {
        Ok(body)
    } else {
        Err(err(error_reason(status, &body)))
    }
}

fn first_bulk_failure(body: &Value) -> Option<String> {
    if !body["errors"].as_bool().unwrap_or(false) {
        return None;
    }
    let items = body["items"].as_array()?;
    let failed = items.iter().find_map(|item| {
        let op = &item["index"];
        op.get("error").map(|e| {
            format!(
                "{}: {}",
                op["_id"].as_str().unwrap_or("?"),
                e["reason"].as_str().unwrap_or("unknown")
            )
        })
    });
    Some(failed.unwrap_or_else(|| "bulk request reported errors".into()))
}

#[async_trait]
impl GameSearch for OpenSearchEngine {
    async fn index(&self, game: &Game) -> Result<(), SearchError> {
        self.ensure_index().await?;
        let id = game.id().to_string();
        let res = self
            .client
            .index(IndexParts::IndexId(&self.index, &id))
            .body(GameDocument::from(game))
            .send()
            .await
            .map_err(|e| SearchError::Write(e.to_string()))?;
        read_success(res, SearchError::Write).await.map(|_| ())
    }

    async fn bulk_index(&self, games: &[Game]) -> Result<(), SearchError> {
        if games.is_empty() {
            return Ok(());
        }
        self.ensure_index().await?;
        let body: Vec<JsonBody<Value>> = bulk_body(games).into_iter().map(JsonBody::new).collect();
        let res = self
            .client
            .bulk(BulkParts::Index(&self.index))
            .body(body)
            .refresh(Refresh::WaitFor)
            .send()
            .await
            .map_err(|e| SearchError::Write(e.to_string()))?;
        let body = read_success(res, SearchError::Write).await?;
        match first_bulk_failure(&body) {
            Some(reason) => Err(SearchError::Write(reason)),
            None => Ok(()),
        }
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), SearchError> {
        let id = id.to_string();
        let res = self
            .client
            .delete(DeleteParts::IndexId(&self.index, &id))
            .send()
            .await
            .map_err(|e| SearchError::Write(e.to_string()))?;
        if res.status_code() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        read_success(res, SearchError::Write).await.map(|_| ())
    }

    async fn search(&self, q: &str, page: i64, size: i64) -> Result<SearchPage, SearchError> {
        self.ensure_index().await?;
        let paging = Paging::normalize(page, size, MAX_PAGE_SIZE);
        let res = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(search_body(q, paging))
            .send()
            .await?;
        let body = read_success(res, SearchError::Query).await?;
        let page = parse_search_response(&body)?;
        tracing::debug!(q, total = page.total, "engine search");
        Ok(page)
    }

    async fn metrics(&self) -> Result<GameMetrics, SearchError> {
        self.ensure_index().await?;
        let res = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(metrics_body(&self.policy))
            .send()
            .await?;
        let body = read_success(res, SearchError::Query).await?;
        parse_metrics_response(&self.policy, &body)
    }

    fn backend_name(&self) -> &'static str {
        "opensearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, description: &str, price: f64) -> Value {
        json!({
            "_index": "games",
            "_id": id,
            "_score": null,
            "_source": { "id": id, "title": title, "description": description, "price": price },
            "sort": [title]
        })
    }

    #[test]
    fn mapping_has_keyword_subfields_and_numeric_price() {
        let m = mapping_body();
        let props = &m["mappings"]["properties"];
        assert_eq!(props["title"]["type"], "text");
        assert_eq!(props["title"]["fields"]["keyword"]["type"], "keyword");
        assert_eq!(props["description"]["fields"]["keyword"]["type"], "keyword");
        assert_eq!(props["price"]["type"], "double");
    }

    #[test]
    fn blank_query_is_match_all() {
        let body = search_body("  ", Paging::default());
        assert!(body["query"]["match_all"].is_object());
        assert_eq!(body["from"], 0);
        assert_eq!(body["size"], 10);
        assert_eq!(body["track_total_hits"], true);
    }

    #[test]
    fn text_query_boosts_title_and_sorts_by_keyword() {
        let body = search_body("zelda", Paging { page: 3, size: 20 });
        let mm = &body["query"]["multi_match"];
        assert_eq!(mm["query"], "zelda");
        assert_eq!(mm["fields"], json!(["title^2", "description"]));
        assert_eq!(mm["type"], "best_fields");
        assert_eq!(mm["lenient"], true);
        assert_eq!(body["from"], 40);
        assert_eq!(body["sort"][0]["title.keyword"]["order"], "asc");
    }

    #[test]
    fn pages_past_result_window_fetch_no_hits() {
        let last = search_body("zelda", Paging { page: 100, size: 100 });
        assert_eq!((last["from"].as_i64(), last["size"].as_i64()), (Some(9_900), Some(100)));

        // offset 9_999: only one hit fits in the window
        let straddling = search_body("zelda", Paging { page: 910, size: 11 });
        assert_eq!((straddling["from"].as_i64(), straddling["size"].as_i64()), (Some(9_999), Some(1)));

        let beyond = search_body("", Paging { page: 101, size: 100 });
        assert_eq!(beyond["from"], 0);
        assert_eq!(beyond["size"], 0);
        assert_eq!(beyond["track_total_hits"], true);
    }

    #[test]
    fn bootstrap_accepts_existing_and_concurrently_created_index() {
        assert!(index_exists(StatusCode::OK).unwrap());
        assert!(!index_exists(StatusCode::NOT_FOUND).unwrap());
        assert!(matches!(
            index_exists(StatusCode::INTERNAL_SERVER_ERROR),
            Err(SearchError::Bootstrap(_))
        ));

        assert_eq!(creation_outcome(StatusCode::OK, &Value::Null).unwrap(), Creation::Created);
        let raced = json!({
            "error": {
                "type": "resource_already_exists_exception",
                "reason": "index [games/abc] already exists"
            },
            "status": 400
        });
        assert_eq!(
            creation_outcome(StatusCode::BAD_REQUEST, &raced).unwrap(),
            Creation::AlreadyExisted
        );

        let rejected = json!({
            "error": { "type": "mapper_parsing_exception", "reason": "bad mapping" },
            "status": 400
        });
        match creation_outcome(StatusCode::BAD_REQUEST, &rejected) {
            Err(SearchError::Bootstrap(reason)) => assert!(reason.contains("bad mapping"), "{reason}"),
            other => panic!("expected bootstrap failure, got {other:?}"),
        }
    }

    #[test]
    fn metrics_body_uses_shared_ranges() {
        let body = metrics_body(&BucketPolicy::default());
        let ranges = body["aggs"]["price_ranges"]["range"]["ranges"].as_array().unwrap();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], json!({ "key": "from_0", "from": 0.0, "to": 50.0 }));
        assert_eq!(ranges[3], json!({ "key": "from_200", "from": 200.0 }));
        assert_eq!(body["size"], 0);
    }

    #[test]
    fn bulk_body_pairs_action_and_source() {
        let g = Game::from_input("Hades", "Roguelike dungeon crawler", "24.99".parse().unwrap()).unwrap();
        let body = bulk_body(std::slice::from_ref(&g));
        assert_eq!(body.len(), 2);
        assert_eq!(body[0]["index"]["_id"], g.id().to_string());
        assert_eq!(body[1]["title"], "Hades");
        assert_eq!(body[1]["price"], 24.99);
    }

    #[test]
    fn search_response_restores_ids_and_total() {
        let zelda = Uuid::new_v4().to_string();
        let metroid = Uuid::new_v4().to_string();
        let body = json!({
            "hits": {
                "total": { "value": 2, "relation": "eq" },
                "hits": [
                    doc(&metroid, "Metroid", "A zelda-like exploration game", 40.0),
                    doc(&zelda, "Zelda", "Open world adventure", 59.99),
                ]
            }
        });
        let page = parse_search_response(&body).unwrap();
        assert_eq!(page.total, 2);
        let titles: Vec<_> = page.items.iter().map(|g| g.title().to_string()).collect();
        assert_eq!(titles, ["Metroid", "Zelda"]);
        assert_eq!(page.items[1].id().to_string(), zelda);
        assert_eq!(page.items[1].price().to_string(), "59.99");
    }

    #[test]
    fn search_response_total_is_not_page_size() {
        let body = json!({
            "hits": {
                "total": 57,
                "hits": [doc(&Uuid::new_v4().to_string(), "Celeste", "Climb the mountain", 19.99)]
            }
        });
        let page = parse_search_response(&body).unwrap();
        assert_eq!(page.total, 57);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn invalid_documents_are_reported() {
        let body = json!({
            "hits": { "total": { "value": 1 }, "hits": [doc(&Uuid::new_v4().to_string(), "X", "short", 1.0)] }
        });
        assert!(matches!(parse_search_response(&body), Err(SearchError::Response(_))));
    }

    #[test]
    fn empty_index_metrics_are_normalized() {
        let body = json!({
            "hits": { "total": { "value": 0 }, "hits": [] },
            "aggregations": {
                "total_docs": { "value": 0 },
                "avg_price": { "value": null },
                "min_price": { "value": null },
                "max_price": { "value": null },
                "price_ranges": { "buckets": [] }
            }
        });
        let m = parse_metrics_response(&BucketPolicy::default(), &body).unwrap();
        assert_eq!(m.count, 0);
        assert_eq!((m.avg_price, m.min_price, m.max_price), (None, None, None));
        assert_eq!(m.buckets.len(), 4);
        assert!(m.buckets.iter().all(|b| b.doc_count == 0));
    }

    #[test]
    fn metrics_response_maps_range_buckets() {
        let body = json!({
            "aggregations": {
                "total_docs": { "value": 3 },
                "avg_price": { "value": 70.0 },
                "min_price": { "value": 10.0 },
                "max_price": { "value": 150.0 },
                "price_ranges": { "buckets": [
                    { "key": "from_0", "from": 0.0, "to": 50.0, "doc_count": 1 },
                    { "key": "from_50", "from": 50.0, "to": 100.0, "doc_count": 1 },
                    { "key": "from_100", "from": 100.0, "to": 200.0, "doc_count": 1 },
                    { "key": "from_200", "from": 200.0, "doc_count": 0 }
                ]}
            }
        });
        let m = parse_metrics_response(&BucketPolicy::default(), &body).unwrap();
        assert_eq!(m.count, 3);
        assert_eq!(m.avg_price, Some(Decimal::from(70)));
        assert_eq!(m.max_price, Some(Decimal::from(150)));
        let counts: Vec<u64> = m.buckets.iter().map(|b| b.doc_count).collect();
        assert_eq!(counts, [1, 1, 1, 0]);
    }

    #[test]
    fn bulk_failures_surface_first_reason() {
        let ok = json!({ "errors": false, "items": [] });
        assert_eq!(first_bulk_failure(&ok), None);

        let bad = json!({
            "errors": true,
            "items": [
                { "index": { "_id": "a", "status": 201 } },
                { "index": { "_id": "b", "status": 400, "error": { "type": "mapper_parsing_exception", "reason": "failed to parse" } } }
            ]
        });
        assert_eq!(first_bulk_failure(&bad).unwrap(), "b: failed to parse");
    }

    #[test]
    fn already_exists_is_recognised() {
        let body = json!({ "error": { "type": "resource_already_exists_exception", "reason": "index [games/abc] already exists" }, "status": 400 });
        assert!(is_already_exists(&body));
        assert!(!is_already_exists(&json!({ "error": { "type": "illegal_argument_exception" } })));
    }
}
