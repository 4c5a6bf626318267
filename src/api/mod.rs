//! The service's HTTP surface.
//!
//! | Route                | Purpose                                        |
//! |----------------------|------------------------------------------------|
//! | `GET /health`        | liveness                                       |
//! | `GET /trends`        | the cached snapshot with its age               |
//! | `GET /trends/:code`  | one region's label from the cached snapshot    |
//! | `GET/POST /refresh`  | token-authorized refresh cycle                 |
//!
//! The read routes only ever touch the cache; they never fetch.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::cache::{CacheError, Freshness};
use crate::context::Context;
use crate::feed::FeedSource;
use crate::middleware::LoggerMiddleware;
use crate::router::Router;
use crate::security::presented_token;
use crate::server::{Server, ServerError};
use crate::trends::{TrendLabel, TrendSnapshot};
use crate::trigger::{RefreshTrigger, TriggerError};
use crate::{Request, Response, StatusCode};

/// What the handlers share.
pub struct AppState<S> {
    pub trigger: Arc<RefreshTrigger<S>>,
    pub freshness: Freshness,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            trigger: Arc::clone(&self.trigger),
            freshness: self.freshness,
        }
    }
}

#[derive(Serialize)]
struct TrendsBody<'a> {
    #[serde(serialize_with = "crate::cache::epoch_seconds::serialize")]
    timestamp: DateTime<Utc>,
    age_seconds: i64,
    stale: bool,
    complete: bool,
    trends: &'a TrendSnapshot,
}

#[derive(Serialize)]
struct RegionBody<'a> {
    code: &'a str,
    label: &'a TrendLabel,
    age_seconds: i64,
    stale: bool,
}

/// Registers every route plus request logging.
pub fn router<S>(state: AppState<S>) -> Router
where
    S: FeedSource + 'static,
{
    let mut router = Router::new();
    router.layer(LoggerMiddleware);

    router.get("/health", |_ctx: Context| async { Response::text(StatusCode::Ok, "ok") });

    let shared = state.clone();
    router.get("/trends", move |_ctx: Context| {
        let state = shared.clone();
        async move { trends(&state).await }
    });

    let shared = state.clone();
    router.get("/trends/:code", move |ctx: Context| {
        let state = shared.clone();
        async move { region_trend(&state, &ctx).await }
    });

    let shared = state.clone();
    router.get("/refresh", move |ctx: Context| {
        let state = shared.clone();
        async move { refresh(&state, &ctx).await }
    });

    let shared = state;
    router.post("/refresh", move |ctx: Context| {
        let state = shared.clone();
        async move { refresh(&state, &ctx).await }
    });

    router
}

/// Serves `router` on `server` until `shutdown` resolves.
pub async fn serve(server: Server, router: Router, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
    let router = Arc::new(router);
    server
        .run_until(
            move |request: Request| {
                let router = Arc::clone(&router);
                async move { router.route(request).await }
            },
            shutdown,
        )
        .await
}

async fn trends<S: FeedSource + 'static>(state: &AppState<S>) -> Response {
    let store = state.trigger.store();
    match store.get_snapshot(state.freshness, Utc::now()).await {
        Ok(served) => {
            let complete = served.record.trends.covers(state.trigger.registry());
            if !complete {
                warn!(
                    cached = served.record.trends.len(),
                    expected = state.trigger.registry().len(),
                    "cached snapshot does not cover the region registry"
                );
            }
            Response::json(
                StatusCode::Ok,
                &TrendsBody {
                    timestamp: served.record.timestamp,
                    age_seconds: served.age.num_seconds(),
                    stale: served.stale,
                    complete,
                    trends: &served.record.trends,
                },
            )
        }
        Err(err) => cache_failure(err),
    }
}

async fn region_trend<S: FeedSource + 'static>(state: &AppState<S>, ctx: &Context) -> Response {
    let code = ctx.params().get("code").unwrap_or_default();
    let Some(code) = state.trigger.registry().parse(code) else {
        return Response::json(StatusCode::NotFound, &json!({"error": "unknown region"}));
    };

    let store = state.trigger.store();
    match store.get_snapshot(state.freshness, Utc::now()).await {
        Ok(served) => match served.record.trends.get(code) {
            Some(label) => Response::json(
                StatusCode::Ok,
                &RegionBody {
                    code: code.as_str(),
                    label,
                    age_seconds: served.age.num_seconds(),
                    stale: served.stale,
                },
            ),
            // A record written for a different registry.
            None => Response::json(StatusCode::NotFound, &json!({"error": "region not in cache"})),
        },
        Err(err) => cache_failure(err),
    }
}

fn cache_failure(err: CacheError) -> Response {
    match err {
        CacheError::Unavailable => {
            Response::json(StatusCode::ServiceUnavailable, &json!({"error": "no data available"}))
        }
        CacheError::Stale { age_seconds, .. } => Response::json(
            StatusCode::ServiceUnavailable,
            &json!({"error": "stale", "age_seconds": age_seconds}),
        ),
        other => {
            error!(error = %other, "cache read failed");
            Response::json(StatusCode::InternalServerError, &json!({"error": "cache unreadable"}))
        }
    }
}

async fn refresh<S: FeedSource + 'static>(state: &AppState<S>, ctx: &Context) -> Response {
    let token = presented_token(ctx.request());
    match state.trigger.run_authorized(token).await {
        Ok(ack) => Response::json(StatusCode::Ok, &ack),
        Err(TriggerError::Unauthorized) => Response::text(StatusCode::Unauthorized, "Unauthorized"),
        Err(TriggerError::Busy) => Response::json(StatusCode::Conflict, &json!({"status": "busy"})),
        Err(err) => {
            error!(error = %err, "on-demand refresh failed");
            Response::json(StatusCode::InternalServerError, &json!({"status": "error"}))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::{CacheStore, StalePolicy};
    use crate::feed::testing::{Script, ScriptedSource};
    use crate::feed::{FeedFetcher, FetchPolicy};
    use crate::refresh::BatchRefresher;
    use crate::regions::RegionRegistry;
    use crate::security::SharedSecret;

    fn app(dir: &tempfile::TempDir, freshness: Freshness) -> (Router, Arc<RefreshTrigger<ScriptedSource>>) {
        let registry = Arc::new(RegionRegistry::us_states().subset(["CA", "NY", "TX"]).unwrap());
        let source = ScriptedSource::new()
            .with("CA", Script::Title("trend-A"))
            .with("NY", Script::NetworkError)
            .with("TX", Script::Empty);
        let policy = FetchPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        };
        let trigger = Arc::new(
            RefreshTrigger::new(
                registry,
                BatchRefresher::new(FeedFetcher::new(source, policy), 10),
                CacheStore::new(dir.path().join("trends_cache.json")),
            )
            .with_secret(Some(SharedSecret::new("letmein"))),
        );
        let state = AppState {
            trigger: Arc::clone(&trigger),
            freshness,
        };
        (router(state), trigger)
    }

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn body(response: &Response) -> serde_json::Value {
        serde_json::from_slice(response.body_ref()).unwrap()
    }

    #[tokio::test]
    async fn trends_before_any_refresh_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir, Freshness::default());

        let res = router.route(request("GET /trends HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
        assert_eq!(body(&res), json!({"error": "no data available"}));
    }

    #[tokio::test]
    async fn wrong_token_is_401_without_detail() {
        let dir = tempfile::tempdir().unwrap();
        let (router, trigger) = app(&dir, Freshness::default());

        let res = router.route(request("POST /refresh?token=nope HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::Unauthorized);
        assert_eq!(res.body_ref(), b"Unauthorized");
        assert_eq!(trigger.refresher().fetcher().source().total_calls(), 0);
    }

    #[tokio::test]
    async fn refresh_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir, Freshness::default());

        let res = router
            .route(request("POST /refresh HTTP/1.1\r\nAuthorization: Bearer letmein\r\n\r\n"))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
        let ack = body(&res);
        assert_eq!(ack["status"], "updated");
        assert_eq!(ack["regions"], 3);
        assert_eq!(ack["no_data"], 2);
        assert!(ack["updated"].is_f64());

        let res = router.route(request("GET /trends HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        let served = body(&res);
        assert_eq!(served["stale"], false);
        assert_eq!(served["complete"], true);
        assert_eq!(
            served["trends"],
            json!({"CA": "trend-A", "NY": "No data", "TX": "No data"})
        );
        assert_eq!(served["timestamp"], ack["updated"]);

        let res = router.route(request("GET /trends/CA HTTP/1.1\r\n\r\n")).await;
        assert_eq!(body(&res)["label"], "trend-A");
        let res = router.route(request("GET /trends/ca HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn refuse_policy_reports_stale() {
        let dir = tempfile::tempdir().unwrap();
        let freshness = Freshness {
            max_age: chrono::Duration::seconds(60),
            policy: StalePolicy::Refuse,
        };
        let (router, trigger) = app(&dir, freshness);
        let old = Utc::now() - chrono::Duration::hours(2);
        let snapshot = trigger.refresher().refresh_all(trigger.registry()).await.unwrap();
        trigger.store().write(&snapshot, old).await.unwrap();

        let res = router.route(request("GET /trends HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
        let reply = body(&res);
        assert_eq!(reply["error"], "stale");
        assert!(reply["age_seconds"].as_i64().unwrap() >= 7_200);
    }

    #[tokio::test]
    async fn partial_record_is_served_but_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let (router, trigger) = app(&dir, Freshness::default());
        let stamp = Utc::now().timestamp();
        tokio::fs::write(
            trigger.store().path(),
            format!(r#"{{"timestamp": {stamp}, "trends": {{"CA": "trend-A"}}}}"#),
        )
        .await
        .unwrap();

        let res = router.route(request("GET /trends HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        let served = body(&res);
        assert_eq!(served["complete"], false);
        assert_eq!(served["trends"], json!({"CA": "trend-A"}));

        let res = router.route(request("GET /trends/NY HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(body(&res), json!({"error": "region not in cache"}));
    }

    #[tokio::test]
    async fn health_and_unknown_routes() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir, Freshness::default());

        let res = router.route(request("GET /health HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.body_ref(), b"ok");
        let res = router.route(request("GET /map HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }
}
