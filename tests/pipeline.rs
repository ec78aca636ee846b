//! End-to-end behaviour of the request pipeline, driven through
//! [`App::dispatch`] without a socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{Value, json};

use pipework::logger::{EventHandler, Events, Level, Logger, Record};
use pipework::middleware::{Errors, Logging, Middleware, Next, RecoverPanics, SLOW_REQUEST, Stack};
use pipework::{
    App, BoxFuture, ClientError, Error, ErrorCode, Method, RateLimitConfig, RateLimiter, Request, Response,
    Router, ServerError, StatusCode, TRACE_ID_HEADER, tracer,
};

// ── Harness ───────────────────────────────────────────────────────────────────

type Captured = Arc<Mutex<Vec<Record>>>;

fn capturing_logger() -> (Arc<Logger>, Captured) {
    let seen: Captured = Arc::new(Mutex::new(Vec::new()));
    let hook: EventHandler = {
        let seen = Arc::clone(&seen);
        Arc::new(move |r: &Record| seen.lock().push(r.clone()))
    };
    let events = Events {
        debug: Some(Arc::clone(&hook)),
        info: Some(Arc::clone(&hook)),
        warn: Some(Arc::clone(&hook)),
        error: Some(hook),
    };
    let logger = Logger::new(Level::Debug, "pipeline-test", tracer::trace_id).with_events(events);
    (Arc::new(logger), seen)
}

fn standard_app(router: Router, limiter: RateLimiter) -> (App, Captured) {
    let (logger, seen) = capturing_logger();
    let stack = Stack::standard(Arc::clone(&logger), Arc::new(limiter), SLOW_REQUEST);
    let app = App::new(router, &stack, logger).unwrap();
    (app, seen)
}

fn client(last: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, last)), 50_000)
}

fn get(path: &'static str) -> Request {
    Request::new(Method::GET, path.parse().unwrap(), client(1))
}

fn body(res: &Response) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

fn records_at(seen: &Captured, level: Level) -> Vec<Record> {
    seen.lock().iter().filter(|r| r.level == level).cloned().collect()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn hello(_req: Request) -> Result<Response, Error> {
    Response::success(StatusCode::OK, &json!({"greeting": "hello"}))
}

async fn bad_input(_req: Request) -> Result<Response, Error> {
    Err(ClientError::new(ErrorCode::BadRequest, None, "bad input").into())
}

async fn broken_database(_req: Request) -> Result<Response, Error> {
    let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "db connection refused");
    Err(ServerError::new(ErrorCode::Internal, cause, "internal error").into())
}

async fn untyped_failure(_req: Request) -> Result<Response, Error> {
    let n: u32 = "forty-two".parse().context("parsing the answer")?;
    Response::success(StatusCode::OK, &json!({"n": n}))
}

async fn crash(_req: Request) -> Result<Response, Error> {
    panic!("handler exploded");
}

#[derive(Deserialize)]
struct Signup {
    username: String,
}

async fn signup(req: Request) -> Result<Response, Error> {
    let input: Signup = req.json()?;
    if input.username.len() < 3 {
        return Err(ClientError::new(ErrorCode::FailedValidation, None, "invalid input")
            .with_data(json!({"username": "must be at least 3 characters"}))
            .into());
    }
    Response::success(StatusCode::CREATED, &json!({"user": {"username": input.username}}))
}

// ── Error rendering ───────────────────────────────────────────────────────────

#[tokio::test]
async fn success_envelope_merges_handler_fields() {
    let (app, _) = standard_app(Router::new().on(Method::GET, "/hello", hello), RateLimiter::disabled());

    let res = app.dispatch(get("/hello")).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res), json!({"status": "success", "greeting": "hello"}));
}

#[tokio::test]
async fn client_error_becomes_fail_envelope() {
    let (app, seen) = standard_app(Router::new().on(Method::GET, "/bad", bad_input), RateLimiter::disabled());

    let res = app.dispatch(get("/bad")).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res), json!({"status": "fail", "message": "bad input"}));
    assert!(records_at(&seen, Level::Error).is_empty());
    assert!(
        records_at(&seen, Level::Info)
            .iter()
            .any(|r| r.message == "caught a client error during request")
    );
}

#[tokio::test]
async fn server_error_hides_its_cause_from_the_client() {
    let (app, seen) =
        standard_app(Router::new().on(Method::GET, "/boom", broken_database), RateLimiter::disabled());

    let res = app.dispatch(get("/boom")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res), json!({"status": "error", "message": "internal error"}));
    assert!(!String::from_utf8_lossy(res.body()).contains("refused"));

    let errors = records_at(&seen, Level::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].attr("error"), Some(&json!("db connection refused")));
    let source = errors[0].attr("source").and_then(Value::as_str).unwrap();
    assert!(source.contains("pipeline.rs"), "source was {source}");
}

#[tokio::test]
async fn untyped_error_answers_generic_internal() {
    let (app, seen) =
        standard_app(Router::new().on(Method::GET, "/oops", untyped_failure), RateLimiter::disabled());

    let res = app.dispatch(get("/oops")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body(&res),
        json!({"status": "error", "message": "the server encountered a problem and could not process your request"})
    );
    let errors = records_at(&seen, Level::Error);
    assert_eq!(errors.len(), 1);
    let logged = errors[0].attr("error").and_then(Value::as_str).unwrap();
    assert!(logged.starts_with("parsing the answer: "), "logged {logged}");
}

#[tokio::test]
async fn malformed_json_and_validation_failures() {
    let (app, _) = standard_app(Router::new().on(Method::POST, "/users", signup), RateLimiter::disabled());
    let post = |payload: &'static str| {
        Request::new(Method::POST, "/users".parse().unwrap(), client(1)).with_body(payload)
    };

    let res = app.dispatch(post("")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body(&res),
        json!({
            "status": "fail",
            "message": "the request payload contains malformed JSON",
            "data": "body must not be empty",
        })
    );

    let res = app.dispatch(post(r#"{"username": "al"}"#)).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body(&res),
        json!({
            "status": "fail",
            "message": "invalid input",
            "data": {"username": "must be at least 3 characters"},
        })
    );

    let res = app.dispatch(post(r#"{"username": "alice"}"#)).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(body(&res), json!({"status": "success", "user": {"username": "alice"}}));
}

// ── Panics ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn panicking_handler_answers_500_and_the_app_keeps_serving() {
    let router = Router::new()
        .on(Method::GET, "/crash", crash)
        .on(Method::GET, "/hello", hello);
    let (app, seen) = standard_app(router, RateLimiter::disabled());

    let res = app.dispatch(get("/crash")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res)["status"], "error");

    let errors = records_at(&seen, Level::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].attr("error"), Some(&json!("panic: handler exploded")));

    let res = app.dispatch(get("/hello")).await;
    assert_eq!(res.status(), StatusCode::OK);
}

/// Sits where the rate limiter normally goes and blows up on its first call.
struct ExplodesOnce(AtomicBool);

impl Middleware for ExplodesOnce {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        if !self.0.swap(true, Ordering::SeqCst) {
            panic!("gate exploded");
        }
        next.run(req)
    }
}

#[tokio::test]
async fn panicking_middleware_below_recovery_answers_one_generic_500() {
    let (logger, seen) = capturing_logger();
    let stack = Stack::new()
        .push(Logging::new(Arc::clone(&logger), SLOW_REQUEST))
        .push(Errors::new(Arc::clone(&logger)))
        .push(RecoverPanics)
        .push(ExplodesOnce(AtomicBool::new(false)));
    let app = App::new(Router::new().on(Method::GET, "/hello", hello), &stack, logger).unwrap();

    let res = app.dispatch(get("/hello")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body(&res),
        json!({"status": "error", "message": "the server encountered a problem and could not process your request"})
    );
    let errors = records_at(&seen, Level::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].attr("error"), Some(&json!("panic: gate exploded")));

    let res = app.dispatch(get("/hello")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["greeting"], "hello");
    assert_eq!(records_at(&seen, Level::Error).len(), 1);
}

// ── Rate limiting ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fifth_request_in_a_burst_is_rejected_before_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = {
        let calls = Arc::clone(&calls);
        move |_req: Request| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Response::success(StatusCode::OK, &json!({})) }
        }
    };
    let limiter = RateLimiter::new(RateLimitConfig { rps: 2.0, burst: 4, ..RateLimitConfig::default() }).unwrap();
    let (app, _) = standard_app(Router::new().on(Method::GET, "/", counted), limiter);

    for n in 1..=4 {
        assert_eq!(app.dispatch(get("/")).await.status(), StatusCode::OK, "request {n}");
    }
    let res = app.dispatch(get("/")).await;

    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body(&res), json!({"status": "fail", "message": "rate limit exceeded"}));
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(app.dispatch(get("/")).await.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_clients_all_succeed() {
    let limiter = RateLimiter::new(RateLimitConfig::default()).unwrap();
    let (app, _) = standard_app(Router::new().on(Method::GET, "/hello", hello), limiter);
    let app = Arc::new(app);

    let tasks: Vec<_> = (1..=50u8)
        .map(|n| {
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                let req = Request::new(Method::GET, "/hello".parse().unwrap(), client(n));
                app.dispatch(req).await.status()
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }
}

// ── Request logging ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_requests_complete_at_warn() {
    async fn slow(_req: Request) -> Result<Response, Error> {
        tokio::time::sleep(Duration::from_millis(600)).await;
        Response::success(StatusCode::OK, &json!({}))
    }
    let router = Router::new()
        .on(Method::GET, "/slow", slow)
        .on(Method::GET, "/hello", hello);
    let (app, seen) = standard_app(router, RateLimiter::disabled());

    app.dispatch(get("/slow")).await;

    let warns = records_at(&seen, Level::Warn);
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].message, "request completed (slow)");
    assert_eq!(warns[0].attr("slow"), Some(&json!(true)));
    assert_eq!(warns[0].attr("status"), Some(&json!(200)));
    assert_eq!(warns[0].attr("elapsed_ms"), Some(&json!(600)));

    seen.lock().clear();
    app.dispatch(get("/hello")).await;

    assert!(records_at(&seen, Level::Warn).is_empty());
    let completed: Vec<_> = records_at(&seen, Level::Info)
        .into_iter()
        .filter(|r| r.message == "request completed")
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].attr("path"), Some(&json!("/hello")));
}

#[tokio::test]
async fn completion_record_carries_the_rendered_error_status() {
    let (app, seen) = standard_app(Router::new().on(Method::GET, "/bad", bad_input), RateLimiter::disabled());

    app.dispatch(get("/bad")).await;

    let completed = records_at(&seen, Level::Info)
        .into_iter()
        .find(|r| r.message == "request completed")
        .unwrap();
    assert_eq!(completed.attr("status"), Some(&json!(400)));
    assert_eq!(completed.attr("method"), Some(&json!("GET")));
}

// ── Tracing ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn trace_id_is_echoed_and_matches_the_logs() {
    let (app, seen) = standard_app(Router::new().on(Method::GET, "/hello", hello), RateLimiter::disabled());

    let first = app.dispatch(get("/hello")).await;
    let second = app.dispatch(get("/hello")).await;

    let trace_id = first.headers()[TRACE_ID_HEADER].to_str().unwrap().to_owned();
    let parsed = uuid::Uuid::parse_str(&trace_id).unwrap();
    assert_eq!(parsed.get_version_num(), 7);
    assert_ne!(second.headers()[TRACE_ID_HEADER], first.headers()[TRACE_ID_HEADER]);

    let records = seen.lock();
    assert_eq!(records[0].attr("trace_id"), Some(&json!(trace_id)));
    assert_eq!(records[1].attr("trace_id"), Some(&json!(trace_id)));
}

#[tokio::test]
async fn logs_outside_a_request_use_the_default_trace_id() {
    let (logger, seen) = capturing_logger();

    logger.info("startup", &[]);

    assert_eq!(seen.lock()[0].attr("trace_id"), Some(&json!(tracer::DEFAULT_TRACE_ID)));
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_path_and_wrong_method_rejections() {
    let (app, seen) = standard_app(Router::new().on(Method::GET, "/hello", hello), RateLimiter::disabled());

    let res = app.dispatch(get("/nope")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body(&res),
        json!({"code": "not_found", "message": "the requested resource could not be found"})
    );
    assert!(res.headers().contains_key(TRACE_ID_HEADER));

    let req = Request::new(Method::DELETE, "/hello".parse().unwrap(), client(1));
    let res = app.dispatch(req).await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        body(&res),
        json!({
            "code": "method_not_allowed",
            "message": "the DELETE method is not supported for the requested resource",
        })
    );

    // Rejections bypass the middleware chain entirely.
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn path_params_reach_the_handler() {
    async fn show(req: Request) -> Result<Response, Error> {
        let name = req.param("username").unwrap_or_default().to_owned();
        Response::success(StatusCode::OK, &json!({"user": name}))
    }
    let router = Router::new().group("/v1", |v1| v1.on(Method::GET, "/users/{username}", show));
    let (app, _) = standard_app(router, RateLimiter::disabled());

    let res = app.dispatch(get("/v1/users/alice")).await;

    assert_eq!(body(&res), json!({"status": "success", "user": "alice"}));
}

// ── Safety net ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn errors_escaping_a_bare_stack_still_answer_500() {
    let (logger, seen) = capturing_logger();
    let app = App::new(
        Router::new().on(Method::GET, "/bad", bad_input),
        &Stack::new(),
        logger,
    )
    .unwrap();

    let res = app.dispatch(get("/bad")).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res)["status"], "error");
    let errors = records_at(&seen, Level::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "caught an error propagated through the chain");
}
