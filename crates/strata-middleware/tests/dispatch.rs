//! End-to-end dispatch tests.
//!
//! Every test drives a real `App` over an in-memory `Connection` and waits
//! for the response to finish, so the terminal responder and the deferred
//! final continuation are exercised exactly as the server would.

use http::Method;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{on_finished, Connection, Environment, Error, Request, Response, StrataError};
use strata_middleware::{App, Dispatch, Done, Handler, HandlerArgs, Mountable, ResponderOptions};
use tokio::sync::oneshot;
use tokio::time::timeout;

struct Exchange {
    conn: Connection,
    req: Request,
    res: Response,
}

fn exchange(method: Method, url: &str) -> Exchange {
    let conn = Connection::new();
    let req = Request::with_channel(method, url, Arc::new(conn.clone()));
    req.finish_body();
    let res = Response::with_channel(Arc::new(conn.clone()));
    Exchange { conn, req, res }
}

async fn wait_finished(res: &Response) {
    let (tx, rx) = oneshot::channel();
    on_finished(res, move |_, _: Response| {
        let _ = tx.send(());
    });
    timeout(Duration::from_secs(2), rx)
        .await
        .expect("response never finished")
        .expect("completion callback dropped");
}

async fn request(app: &App, method: Method, url: &str) -> Exchange {
    let ex = exchange(method, url);
    app.handle(ex.req.clone(), ex.res.clone(), None);
    wait_finished(&ex.res).await;
    ex
}

fn body(res: &Response) -> String {
    String::from_utf8(res.body().to_vec()).unwrap()
}

fn error_body(res: &Response) -> String {
    let value: serde_json::Value = serde_json::from_slice(&res.body()).unwrap();
    value["error"].as_str().unwrap().to_string()
}

fn test_app() -> App {
    App::with_environment(Environment::Test)
}

/// A handler that answers with the URL it saw.
fn echo_url() -> Handler {
    Handler::normal(|req, res, _next| {
        res.end_with(req.url());
        Ok(())
    })
}

/// A handler that records the URL it saw and continues.
fn record_url(seen: &Arc<Mutex<Vec<String>>>) -> Handler {
    let seen = Arc::clone(seen);
    Handler::normal(move |req, _res, next| {
        seen.lock().push(req.url());
        next.run();
        Ok(())
    })
}

// ============================================================================
// Mounting
// ============================================================================

#[tokio::test]
async fn test_root_handler_sees_full_url() {
    let app = test_app();
    app.layer(echo_url());

    let ex = request(&app, Method::GET, "/blog/post/1?x=1").await;
    assert_eq!(body(&ex.res), "/blog/post/1?x=1");
}

#[tokio::test]
async fn test_mount_strips_route() {
    let app = test_app();
    app.mount("/blog", echo_url());

    let ex = request(&app, Method::GET, "/blog/post/1").await;
    assert_eq!(body(&ex.res), "/post/1");
    assert_eq!(ex.req.original_url().as_deref(), Some("/blog/post/1"));
}

#[tokio::test]
async fn test_exact_mount_path_becomes_root() {
    let app = test_app();
    app.mount("/blog", echo_url());

    let ex = request(&app, Method::GET, "/blog").await;
    assert_eq!(body(&ex.res), "/");

    let ex = request(&app, Method::GET, "/blog?page=2").await;
    assert_eq!(body(&ex.res), "/?page=2");
}

#[tokio::test]
async fn test_mount_is_case_insensitive() {
    let app = test_app();
    app.mount("/blog", echo_url());

    let ex = request(&app, Method::GET, "/BLOG/Post").await;
    assert_eq!(body(&ex.res), "/Post");
}

#[tokio::test]
async fn test_mount_needs_component_boundary() {
    let app = test_app();
    app.mount("/blog", echo_url());

    let ex = request(&app, Method::GET, "/blog-o-rama/post").await;
    assert_eq!(ex.res.status(), 404);
    assert_eq!(error_body(&ex.res), "Cannot GET /blog-o-rama/post");
}

#[tokio::test]
async fn test_dot_boundary_synthesizes_slash() {
    let app = test_app();
    let seen = Arc::new(Mutex::new(Vec::new()));
    app.mount("/blog", record_url(&seen));
    app.layer(echo_url());

    let ex = request(&app, Method::GET, "/blog.json").await;
    assert_eq!(*seen.lock(), ["/.json"]);
    // restored for the next entry
    assert_eq!(body(&ex.res), "/blog.json");
}

#[tokio::test]
async fn test_trailing_slash_route() {
    let app = test_app();
    app.mount("/blog/", echo_url());

    let ex = request(&app, Method::GET, "/blog/post").await;
    assert_eq!(body(&ex.res), "/post");
}

#[tokio::test]
async fn test_fqdn_url_is_rewritten_after_host() {
    let app = test_app();
    app.mount("/blog", echo_url());

    let ex = request(&app, Method::GET, "http://example.com/blog/post/1").await;
    assert_eq!(body(&ex.res), "http://example.com/post/1");
}

#[tokio::test]
async fn test_fqdn_not_obscured_at_root() {
    let app = test_app();
    app.layer(echo_url());

    let ex = request(&app, Method::GET, "http://example.com/foo").await;
    assert_eq!(body(&ex.res), "http://example.com/foo");
}

#[tokio::test]
async fn test_fqdn_url_restored_between_handlers() {
    let app = test_app();
    let seen = Arc::new(Mutex::new(Vec::new()));
    app.mount("/blog", record_url(&seen));
    app.mount("/blog", record_url(&seen));
    app.layer(echo_url());

    let ex = request(&app, Method::GET, "http://example.com/blog/post/1").await;
    assert_eq!(
        *seen.lock(),
        ["http://example.com/post/1", "http://example.com/post/1"]
    );
    assert_eq!(body(&ex.res), "http://example.com/blog/post/1");
}

#[tokio::test]
async fn test_nested_apps_rewrite_and_restore() {
    let app = test_app();
    let blog = test_app();
    let admin = test_app();
    let seen = Arc::new(Mutex::new(Vec::new()));

    admin.layer(record_url(&seen));
    blog.mount("/admin", admin.clone());
    blog.layer(record_url(&seen));
    app.mount("/blog", blog.clone());
    app.layer(echo_url());

    let ex = request(&app, Method::GET, "/blog/admin/users").await;
    assert_eq!(*seen.lock(), ["/users", "/admin/users"]);
    assert_eq!(body(&ex.res), "/blog/admin/users");
    assert_eq!(ex.req.original_url().as_deref(), Some("/blog/admin/users"));
    assert_eq!(blog.route(), "/blog");
    assert_eq!(admin.route(), "/admin");
}

#[tokio::test]
async fn test_app_as_plain_handler() {
    let app = test_app();
    let inner = test_app();
    inner.mount("/x", echo_url());
    app.layer(inner.as_handler());

    let ex = request(&app, Method::GET, "/x/y").await;
    assert_eq!(body(&ex.res), "/y");
    assert_eq!(inner.route(), "/");
}

#[derive(Clone, Default)]
struct Foreign {
    mounted_at: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicUsize>,
}

impl Dispatch for Foreign {
    fn dispatch(&self, req: Request, _res: Response, done: Option<Done>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        req.set_header("x-foreign", "seen").unwrap();
        if let Some(done) = done {
            done(None);
        }
    }

    fn set_mount_path(&self, path: &str) {
        *self.mounted_at.lock() = Some(path.to_string());
    }
}

#[tokio::test]
async fn test_foreign_dispatcher_is_mounted() {
    let foreign = Foreign::default();
    let app = test_app();
    app.mount("/legacy", Mountable::dispatch(foreign.clone()));
    app.layer(Handler::normal(|req, res, _next| {
        let seen = req.header("x-foreign").is_some();
        res.end_with(if seen { "forwarded" } else { "direct" });
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/legacy/thing").await;
    assert_eq!(body(&ex.res), "forwarded");
    assert_eq!(foreign.calls.load(Ordering::SeqCst), 1);
    assert_eq!(foreign.mounted_at.lock().as_deref(), Some("/legacy"));

    let ex = request(&app, Method::GET, "/other").await;
    assert_eq!(body(&ex.res), "direct");
    assert_eq!(foreign.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Error flow
// ============================================================================

#[tokio::test]
async fn test_state_flows_between_handlers() {
    #[derive(Clone)]
    struct Flag(u32);

    let app = test_app();
    app.layer(Handler::normal(|req, _res, next| {
        req.set_extension(Flag(1));
        next.run();
        Ok(())
    }));
    app.layer(Handler::normal(|req, res, _next| {
        let value = req.extension::<Flag>().map_or(0, |flag| flag.0);
        res.end_with(format!("value:{value}"));
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(body(&ex.res), "value:1");
}

#[tokio::test]
async fn test_error_skips_normal_handlers() {
    let app = test_app();
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&order);
    app.layer(Handler::normal(move |_, _, _| {
        o.lock().push("fail");
        Err(StrataError::message("boom").into())
    }));
    let o = Arc::clone(&order);
    app.layer(Handler::normal(move |_, _, next| {
        o.lock().push("skipped");
        next.run();
        Ok(())
    }));
    let o = Arc::clone(&order);
    app.layer(Handler::error(move |err, _, res, _| {
        o.lock().push("handled");
        res.end_with(format!("caught {err}"));
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(*order.lock(), ["fail", "handled"]);
    assert_eq!(body(&ex.res), "caught boom");
}

#[tokio::test]
async fn test_error_handlers_skipped_without_error() {
    let app = test_app();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    app.layer(Handler::error(move |_, _, _, next| {
        h.fetch_add(1, Ordering::SeqCst);
        next.run();
        Ok(())
    }));
    app.layer(echo_url());

    let ex = request(&app, Method::GET, "/ok").await;
    assert_eq!(body(&ex.res), "/ok");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_error_handler_can_recover() {
    let app = test_app();
    app.layer(Handler::normal(|_, _, next| {
        next.fail(StrataError::message("first"));
        Ok(())
    }));
    app.layer(Handler::error(|_, _, _, next| {
        next.forward(None);
        Ok(())
    }));
    app.layer(Handler::normal(|_, res, _| {
        res.end_with("recovered");
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(ex.res.status(), 200);
    assert_eq!(body(&ex.res), "recovered");
}

#[tokio::test]
async fn test_error_handler_failure_replaces_error() {
    let app = test_app();
    app.layer(Handler::normal(|_, _, _| {
        Err(StrataError::message("first").into())
    }));
    app.layer(Handler::error(|_, _, _, _| {
        Err(StrataError::http(409, "second").into())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(ex.res.status(), 409);
    assert_eq!(error_body(&ex.res), "Error: second");
}

#[tokio::test]
async fn test_panic_becomes_500() {
    let app = test_app();
    app.layer(Handler::normal(|_, _, _| panic!("boom!")));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(ex.res.status(), 500);
    assert_eq!(error_body(&ex.res), "Error: handler panicked: boom!");
}

#[tokio::test]
async fn test_inert_handlers_are_skipped() {
    let app = test_app();
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&order);
    app.layer(Handler::from_arity(3, move |args: HandlerArgs| {
        o.lock().push("1");
        args.next.run();
        Ok(())
    }));
    app.layer(Handler::from_arity(5, |_: HandlerArgs| {
        panic!("inert handler invoked")
    }));
    let o = Arc::clone(&order);
    app.layer(Handler::from_arity(2, move |args: HandlerArgs| {
        o.lock().push("2");
        args.res.end_with(o.lock().join(","));
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(body(&ex.res), "1,2");
}

#[tokio::test]
async fn test_next_twice_is_ignored() {
    let app = test_app();
    let hits = Arc::new(AtomicUsize::new(0));

    app.layer(Handler::normal(|_, _, next| {
        next.clone().run();
        next.run();
        Ok(())
    }));
    let h = Arc::clone(&hits);
    app.layer(Handler::normal(move |_, res, _| {
        h.fetch_add(1, Ordering::SeqCst);
        res.end_with("once");
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/").await;
    tokio::task::yield_now().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(body(&ex.res), "once");
}

#[tokio::test]
async fn test_failure_after_next_does_not_fork() {
    let app = test_app();
    let errors = Arc::new(AtomicUsize::new(0));

    app.layer(Handler::normal(|_, _, next| {
        next.run();
        Err(StrataError::message("late").into())
    }));
    app.layer(echo_url());
    let e = Arc::clone(&errors);
    app.layer(Handler::error(move |_, _, _, _| {
        e.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/x").await;
    assert_eq!(body(&ex.res), "/x");
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_next_from_spawned_task() {
    let app = test_app();
    app.layer(Handler::normal(|req, _, next| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            req.set_header("x-async", "1").unwrap();
            next.run();
        });
        Ok(())
    }));
    app.layer(Handler::normal(|req, res, _| {
        res.end_with(req.header("x-async").is_some().to_string());
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(body(&ex.res), "true");
}

#[tokio::test]
async fn test_custom_done_receives_error() {
    let app = test_app();
    app.layer(Handler::normal(|_, _, _| {
        Err(StrataError::http(418, "teapot").into())
    }));

    let ex = exchange(Method::GET, "/");
    let (tx, rx) = oneshot::channel::<Option<Error>>();
    app.handle(
        ex.req.clone(),
        ex.res.clone(),
        Some(Box::new(move |err: Option<Error>| {
            let _ = tx.send(err);
        })),
    );

    let err = rx.await.unwrap().expect("error passed to done");
    assert_eq!(err.status(), Some(418));
    assert!(!ex.res.finished());
}

#[tokio::test]
async fn test_done_is_deferred() {
    let app = test_app();
    let ex = exchange(Method::GET, "/");
    let called = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&called);
    let (tx, rx) = oneshot::channel();

    app.handle(
        ex.req.clone(),
        ex.res.clone(),
        Some(Box::new(move |_: Option<Error>| {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })),
    );

    assert_eq!(called.load(Ordering::SeqCst), 0);
    rx.await.unwrap();
    assert_eq!(called.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Terminal responder
// ============================================================================

#[tokio::test]
async fn test_404_response_shape() {
    let app = test_app();
    let ex = request(&app, Method::GET, "/foo").await;

    assert_eq!(ex.res.status(), 404);
    assert_eq!(ex.res.status_message().as_deref(), Some("Not Found"));
    assert_eq!(body(&ex.res), r#"{"error":"Cannot GET /foo"}"#);
    assert_eq!(
        ex.res.header("content-type").unwrap(),
        "application/json; charset=utf-8"
    );
    assert_eq!(
        ex.res.header("content-security-policy").unwrap(),
        "default-src 'none'"
    );
    assert_eq!(ex.res.header("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(
        ex.res.header("content-length").unwrap(),
        body(&ex.res).len().to_string().as_str()
    );
}

#[tokio::test]
async fn test_404_escapes_resource() {
    let app = test_app();

    let ex = request(&app, Method::GET, "/<la'me>?q=1").await;
    assert_eq!(error_body(&ex.res), "Cannot GET /%3Cla'me%3E");

    let ex = request(&app, Method::GET, "/%3Cla'me%3E").await;
    assert_eq!(error_body(&ex.res), "Cannot GET /%3Cla'me%3E");
}

#[tokio::test]
async fn test_404_uses_original_url_after_mount() {
    let app = test_app();
    app.mount("/blog", Handler::normal(|_, _, next| {
        next.run();
        Ok(())
    }));

    let ex = request(&app, Method::POST, "/blog/missing").await;
    assert_eq!(error_body(&ex.res), "Cannot POST /blog/missing");
}

#[tokio::test]
async fn test_head_gets_headers_only() {
    let app = test_app();
    let ex = request(&app, Method::HEAD, "/nope").await;

    assert_eq!(ex.res.status(), 404);
    assert!(ex.res.body().is_empty());
    let expected = r#"{"error":"Cannot HEAD /nope"}"#.len().to_string();
    assert_eq!(ex.res.header("content-length").unwrap(), expected.as_str());
}

#[tokio::test]
async fn test_error_status_and_headers_applied() {
    let app = test_app();
    app.layer(Handler::normal(|_, res, _| {
        res.set_header("Content-Encoding", "gzip").unwrap();
        Err(StrataError::http(401, "who are you")
            .with_header("WWW-Authenticate", "Basic")
            .into())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(ex.res.status(), 401);
    assert_eq!(ex.res.header("www-authenticate").unwrap(), "Basic");
    assert!(ex.res.header("content-encoding").is_none());
    assert_eq!(error_body(&ex.res), "Error: who are you");
}

#[tokio::test]
async fn test_error_headers_ignored_without_error_status() {
    let app = test_app();
    app.layer(Handler::normal(|_, res, _| {
        res.set_status(503);
        Err(StrataError::http(200, "not an error status")
            .with_header("X-Ignored", "1")
            .into())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(ex.res.status(), 503);
    assert!(ex.res.header("x-ignored").is_none());
}

#[tokio::test]
async fn test_invalid_response_status_falls_back_to_500() {
    let app = test_app();
    app.layer(Handler::normal(|_, res, _| {
        res.set_status(302);
        Err(StrataError::message("redirect went wrong").into())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(ex.res.status(), 500);
}

#[tokio::test]
async fn test_production_hides_details() {
    let app = App::with_options(ResponderOptions::for_environment(Environment::Production).silent());
    app.layer(Handler::normal(|_, _, _| {
        Err(StrataError::message("secret internals").into())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert_eq!(ex.res.status(), 500);
    assert_eq!(error_body(&ex.res), "Internal Server Error");
}

#[tokio::test]
async fn test_error_reporter_is_called() {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let options = ResponderOptions::for_environment(Environment::Test).with_reporter(
        move |err, req, _res| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send((err.to_string(), req.url()));
            }
        },
    );
    let app = App::with_options(options);
    app.layer(Handler::normal(|_, _, _| {
        Err(StrataError::message("reported").into())
    }));

    let _ex = request(&app, Method::GET, "/r").await;
    let (message, url) = rx.await.unwrap();
    assert_eq!(message, "reported");
    assert_eq!(url, "/r");
}

#[tokio::test]
async fn test_headers_sent_destroys_channel() {
    let app = test_app();
    app.layer(Handler::normal(|_, res, _| {
        res.write("partial");
        Err(StrataError::message("mid-stream failure").into())
    }));

    let ex = request(&app, Method::GET, "/").await;
    assert!(ex.conn.is_destroyed());
    assert!(!ex.res.finished());
    assert_eq!(body(&ex.res), "partial");
}

#[tokio::test]
async fn test_late_error_after_end_is_dropped() {
    let app = test_app();
    app.layer(Handler::normal(|_, res, next| {
        res.end_with("done");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            next.fail(StrataError::message("late"));
        });
        Ok(())
    }));

    let ex = request(&app, Method::GET, "/").await;
    timeout(Duration::from_secs(2), async {
        while !ex.conn.is_destroyed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("responder never ran for the late error");

    assert_eq!(ex.res.status(), 200);
    assert!(ex.res.finished());
    assert_eq!(body(&ex.res), "done");
}

#[tokio::test]
async fn test_no_404_after_headers_sent() {
    let app = test_app();
    app.layer(Handler::normal(|_, res, next| {
        res.write("streaming");
        next.run();
        Ok(())
    }));

    let ex = exchange(Method::GET, "/");
    app.handle(ex.req.clone(), ex.res.clone(), None);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(ex.res.status(), 200);
    assert!(!ex.res.finished());
    assert!(!ex.conn.is_destroyed());
}

#[tokio::test]
async fn test_waits_for_request_body() {
    let app = test_app();
    let conn = Connection::new();
    let req = Request::with_channel(Method::POST, "/upload", Arc::new(conn.clone()));
    let res = Response::with_channel(Arc::new(conn.clone()));
    req.push_chunk("unread body");

    app.handle(req.clone(), res.clone(), None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!res.finished());

    req.push_chunk("more");
    req.finish_body();
    wait_finished(&res).await;

    assert_eq!(res.status(), 404);
    assert!(!req.is_readable());
}
