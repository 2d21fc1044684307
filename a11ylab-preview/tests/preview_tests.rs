use a11ylab_markup::accname::AltState;
use a11ylab_preview::audit::BUNDLED_ENGINE;
use a11ylab_preview::{
    AuditPhase, AuditRunner, ClickOutcome, EngineFetcher, EngineSource, HighlightOutcome,
    ImageLoader, ImageState, LifecycleEvent, PreviewConfig, PreviewSession, PreviewState,
    RenderPhase, RuntimeErrorKind, Severity,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

struct InstantLoader;

#[async_trait]
impl ImageLoader for InstantLoader {
    async fn load(&self, _url: &str) -> ImageState {
        ImageState::Loaded
    }
}

struct StalledLoader;

#[async_trait]
impl ImageLoader for StalledLoader {
    async fn load(&self, _url: &str) -> ImageState {
        std::future::pending().await
    }
}

struct UnreachableFetcher;

#[async_trait]
impl EngineFetcher for UnreachableFetcher {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        Err(format!("{} is unreachable", url))
    }
}

struct BundledFetcher;

#[async_trait]
impl EngineFetcher for BundledFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, String> {
        Ok(BUNDLED_ENGINE.to_string())
    }
}

fn session(config: PreviewConfig) -> PreviewSession {
    let runner = AuditRunner::new(&config);
    PreviewSession::with_parts(config, runner, Arc::new(InstantLoader))
}

async fn settle(session: &PreviewSession) -> PreviewState {
    tokio::time::timeout(Duration::from_secs(10), session.settled())
        .await
        .expect("session did not settle")
}

/// The opening tag of the element whose attributes include `marker`.
fn opening_tag<'a>(html: &'a str, marker: &str) -> &'a str {
    let at = html.find(marker).expect("marker in document");
    let start = html[..at].rfind('<').expect("tag start");
    let end = at + html[at..].find('>').expect("tag end");
    &html[start..=end]
}

fn rule_ids(state: &PreviewState) -> Vec<&str> {
    state.issues.iter().map(|i| i.rule_id.as_str()).collect()
}

#[tokio::test]
async fn test_missing_alt_is_reported_and_marked() {
    let session = session(PreviewConfig::default());
    session
        .submit(r#"<img src="/promo-banner.png" className="hero" />"#, &[])
        .await;
    let state = settle(&session).await;

    assert_eq!(state.render, RenderPhase::Ready);
    assert_eq!(state.audit, AuditPhase::IssuesReady);
    assert!(!state.is_loading);
    assert_eq!(state.runtime_error, None);
    assert_eq!(rule_ids(&state), vec!["image-alt"]);

    let issue = &state.issues[0];
    assert_eq!(issue.severity, Severity::Critical);
    assert_eq!(issue.affected_nodes.len(), 1);
    assert_eq!(issue.affected_nodes[0].selector, "img");
    assert!(issue.affected_nodes[0].matched_html.contains("/promo-banner.png"));

    let image = state
        .snapshot
        .iter()
        .find(|n| n.tag_name == "img")
        .expect("image in snapshot");
    assert_eq!(image.alt, Some(AltState::Missing));

    let html = session.rendered_html().await.expect("live context");
    assert!(html.contains(r#"class="hero""#));
    assert!(opening_tag(&html, "/promo-banner.png").contains(r#"data-a11y-violation="true""#));
    assert!(html.contains("a11ylab-marker-style"));
    session.shutdown().await;
}

#[tokio::test]
async fn test_mark_cap_reaches_every_issue_before_repeats() {
    let config = PreviewConfig {
        violation_mark_cap: 2,
        ..PreviewConfig::default()
    };
    let session = session(config);
    session
        .submit(
            r#"<img src="/a.png" /><img src="/b.png" /><img src="/c.png" />
<input id="q" type="search" />"#,
            &[],
        )
        .await;
    let state = settle(&session).await;
    assert_eq!(rule_ids(&state), vec!["image-alt", "label"]);
    assert_eq!(state.issues[0].affected_nodes.len(), 3);

    let html = session.rendered_html().await.expect("live context");
    let marked = r#"data-a11y-violation="true""#;
    assert_eq!(html.matches(marked).count(), 2);
    assert!(opening_tag(&html, "/a.png").contains(marked));
    assert!(opening_tag(&html, r#"id="q""#).contains(marked));
    assert!(!opening_tag(&html, "/b.png").contains(marked));
    assert!(!opening_tag(&html, "/c.png").contains(marked));
    session.shutdown().await;
}

#[tokio::test]
async fn test_fixed_alt_and_decorative_images_pass() {
    let session = session(PreviewConfig::default());
    session
        .submit(
            r#"<img src="/promo-banner.png" alt="Spring sale, 30% off" />
<img src="/divider.png" alt="" />"#,
            &[],
        )
        .await;
    let state = settle(&session).await;

    assert_eq!(state.audit, AuditPhase::IssuesReady);
    assert!(state.issues.is_empty(), "unexpected issues: {:?}", rule_ids(&state));

    let decorative = state
        .snapshot
        .iter()
        .find(|n| n.alt == Some(AltState::Empty))
        .expect("decorative image kept in the snapshot");
    assert_eq!(decorative.role.as_deref(), Some("presentation"));
    assert_eq!(decorative.accessible_name, "");

    let html = session.rendered_html().await.expect("live context");
    assert!(!html.contains("data-a11y-violation"));
    session.shutdown().await;
}

#[tokio::test]
async fn test_unlabelled_field_and_jsx_label_fix() {
    let session = session(PreviewConfig::default());
    session
        .submit(r#"<input type="email" placeholder="you@example.com" />"#, &[])
        .await;
    let state = settle(&session).await;
    assert_eq!(rule_ids(&state), vec!["label"]);
    assert_eq!(state.issues[0].severity, Severity::Critical);

    session
        .submit(
            r#"<label htmlFor="email">Email</label>
<input id="email" type="email" placeholder="you@example.com" />"#,
            &[],
        )
        .await;
    let state = settle(&session).await;
    assert_eq!(state.cycle, 2);
    assert!(state.issues.is_empty(), "unexpected issues: {:?}", rule_ids(&state));
    let field = state
        .snapshot
        .iter()
        .find(|n| n.selector == "#email")
        .expect("field in snapshot");
    assert_eq!(field.accessible_name, "Email");
    assert!(field.is_focusable);
    session.shutdown().await;
}

#[tokio::test]
async fn test_custom_button_needs_role_and_name() {
    let session = session(PreviewConfig::default());
    session
        .submit(
            r#"<div role="buton" tabIndex={0}></div>"#,
            &[],
        )
        .await;
    let state = settle(&session).await;
    assert_eq!(rule_ids(&state), vec!["aria-roles"]);

    session
        .submit(
            r#"<div role="button" tabIndex={0} aria-label="Subscribe">★</div>"#,
            &[],
        )
        .await;
    let state = settle(&session).await;
    assert!(state.issues.is_empty(), "unexpected issues: {:?}", rule_ids(&state));
    let button = state
        .snapshot
        .iter()
        .find(|n| n.role.as_deref() == Some("button"))
        .expect("custom button in snapshot");
    assert_eq!(button.accessible_name, "Subscribe");
    assert!(button.is_focusable);
    session.shutdown().await;
}

#[tokio::test]
async fn test_click_handler_errors_surface_as_runtime_errors() {
    let session = session(PreviewConfig::default());
    session
        .submit(
            r#"<button id="buy" onclick="error('checkout failed')">Buy</button>"#,
            &[],
        )
        .await;
    let state = settle(&session).await;
    assert_eq!(state.runtime_error, None);
    assert_eq!(state.audit, AuditPhase::IssuesReady);
    assert!(state.issues.is_empty());

    let report = session.click("#buy").await;
    assert_eq!(report.outcome, ClickOutcome::Threw);

    let state = session.state();
    assert_eq!(state.render, RenderPhase::RuntimeError);
    let error = state.runtime_error.expect("runtime error recorded");
    assert_eq!(error.kind, RuntimeErrorKind::Uncaught);
    assert!(error.message.contains("checkout failed"), "{}", error.message);
    // Analysis results survive a later runtime error.
    assert_eq!(state.audit, AuditPhase::IssuesReady);

    let cycle = session.current_cycle().expect("current cycle");
    assert!(cycle.rendered_ok);
    assert!(cycle.runtime_error.is_some());
    session.shutdown().await;
}

#[tokio::test]
async fn test_deferred_failures_are_unhandled_rejections() {
    let session = session(PreviewConfig::default());
    session
        .submit(
            r#"<button id="later" onclick="set_timeout(function() error('deferred boom') end, 0)">Later</button>"#,
            &[],
        )
        .await;
    settle(&session).await;

    let report = session.click("#later").await;
    assert_eq!(report.outcome, ClickOutcome::Handled);

    let error = session.state().runtime_error.expect("rejection recorded");
    assert_eq!(error.kind, RuntimeErrorKind::UnhandledRejection);
    assert!(error.message.contains("deferred boom"), "{}", error.message);
    session.shutdown().await;
}

#[tokio::test]
async fn test_click_outcomes_and_dialogs() {
    let session = session(PreviewConfig::default());
    session
        .submit(
            r#"<button id="hello" onclick="alert('hello')">Hello</button>
<button id="off" disabled onclick="alert('never')">Off</button>
<button id="plain">Plain</button>"#,
            &[],
        )
        .await;
    settle(&session).await;

    let report = session.click("#hello").await;
    assert_eq!(report.outcome, ClickOutcome::Handled);
    assert_eq!(report.dialogs, vec!["hello".to_string()]);
    assert_eq!(session.click("#off").await.outcome, ClickOutcome::Disabled);
    assert_eq!(session.click("#plain").await.outcome, ClickOutcome::NoHandler);
    assert_eq!(session.click("#nowhere").await.outcome, ClickOutcome::Missed);
    assert_eq!(session.state().runtime_error, None);
    session.shutdown().await;
}

#[tokio::test]
async fn test_engine_injection_failure_is_an_analysis_error() {
    let config = PreviewConfig {
        fallback_engine_url: Some("https://cdn.example/axle.luau".to_string()),
        ..PreviewConfig::default()
    };
    let runner = AuditRunner::new(&config)
        .with_engine(EngineSource {
            primary: Some("this is not ( luau".to_string()),
            fallback_url: config.fallback_engine_url.clone(),
        })
        .with_fetcher(Arc::new(UnreachableFetcher));
    let session = PreviewSession::with_parts(config, runner, Arc::new(InstantLoader));

    session.submit(r#"<img src="/promo-banner.png" />"#, &[]).await;
    let state = settle(&session).await;

    assert_eq!(state.render, RenderPhase::Ready);
    assert_eq!(state.audit, AuditPhase::AuditError);
    assert!(!state.is_loading);
    assert!(state.issues.is_empty());
    let message = state.analysis_error.expect("analysis error");
    assert!(message.contains("injection failed"), "{}", message);
    session.shutdown().await;
}

#[tokio::test]
async fn test_fallback_engine_is_used_when_the_primary_fails() {
    let config = PreviewConfig {
        fallback_engine_url: Some("https://cdn.example/axle.luau".to_string()),
        ..PreviewConfig::default()
    };
    let runner = AuditRunner::new(&config)
        .with_engine(EngineSource {
            primary: Some("this is not ( luau".to_string()),
            fallback_url: config.fallback_engine_url.clone(),
        })
        .with_fetcher(Arc::new(BundledFetcher));
    let session = PreviewSession::with_parts(config, runner, Arc::new(InstantLoader));

    session.submit(r#"<img src="/promo-banner.png" />"#, &[]).await;
    let state = settle(&session).await;
    assert_eq!(state.audit, AuditPhase::IssuesReady);
    assert_eq!(rule_ids(&state), vec!["image-alt"]);
    session.shutdown().await;
}

#[tokio::test]
async fn test_runaway_engine_times_out() {
    let config = PreviewConfig {
        audit_timeout_ms: 300,
        ..PreviewConfig::default()
    };
    let runner = AuditRunner::new(&config).with_engine(EngineSource {
        primary: Some("axle = { run = function() while true do end end }".to_string()),
        fallback_url: None,
    });
    let session = PreviewSession::with_parts(config, runner, Arc::new(InstantLoader));

    session.submit("<p>Hello</p>", &[]).await;
    let state = settle(&session).await;
    assert_eq!(state.audit, AuditPhase::AuditError);
    let message = state.analysis_error.expect("analysis error");
    assert!(message.contains("timed out after 300ms"), "{}", message);

    // The context is still usable once the engine has been interrupted.
    assert!(session.rendered_html().await.is_some());
    session.shutdown().await;
}

#[tokio::test]
async fn test_stalled_images_end_at_the_ceiling() {
    let config = PreviewConfig {
        stability_ceiling_ms: 150,
        ..PreviewConfig::default()
    };
    let runner = AuditRunner::new(&config);
    let session = PreviewSession::with_parts(config, runner, Arc::new(StalledLoader));

    session
        .submit(
            r#"<img src="https://cdn.example/slow.png" alt="A slow image" />"#,
            &[],
        )
        .await;
    let state = settle(&session).await;

    let stability = state.stability.expect("stability report");
    assert!(!stability.settled);
    assert_eq!(stability.images, 1);
    assert_eq!(state.audit, AuditPhase::IssuesReady);
    assert!(state.issues.is_empty());
    session.shutdown().await;
}

#[tokio::test]
async fn test_one_live_context_across_submissions() {
    let session = session(PreviewConfig::default());
    for n in 1..=4 {
        let cycle = session.submit(&format!("<p>Attempt {}</p>", n), &[]).await;
        assert_eq!(cycle, n);
        assert!(session.live_contexts() <= 1);
    }
    let state = settle(&session).await;
    assert_eq!(state.cycle, 4);
    assert_eq!(
        session.current_cycle().map(|c| c.source_text),
        Some("<p>Attempt 4</p>".to_string())
    );

    session.shutdown().await;
    assert_eq!(session.live_contexts(), 0);
    assert_eq!(session.state().render, RenderPhase::Idle);

    let events = session.lifecycle();
    assert_eq!(events.len(), 8);
    for pair in events.chunks(2) {
        match pair {
            [LifecycleEvent::Mounted(a), LifecycleEvent::Unmounted(b)] => assert_eq!(a, b),
            other => panic!("unbalanced lifecycle: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_unavailable_context_skips_the_audit() {
    let config = PreviewConfig {
        script_memory_limit_bytes: 1024,
        ..PreviewConfig::default()
    };
    let session = session(config);
    session.submit("<p>Hello</p>", &[]).await;
    let state = settle(&session).await;

    assert_eq!(state.render, RenderPhase::RuntimeError);
    assert_eq!(state.audit, AuditPhase::Skipped);
    assert!(!state.is_loading);
    let error = state.runtime_error.expect("render access error");
    assert_eq!(error.kind, RuntimeErrorKind::RenderAccess);
    assert_eq!(session.live_contexts(), 0);
    assert!(session.lifecycle().is_empty());
    assert_eq!(session.rendered_html().await, None);
}

#[tokio::test]
async fn test_highlight_moves_focus_and_scrolls() {
    let session = session(PreviewConfig::default());
    session
        .submit(
            r#"<label for="email">Email</label>
<input id="email" type="email" />
<button id="go">Go</button>"#,
            &[],
        )
        .await;
    settle(&session).await;

    assert_eq!(
        session.highlight_by_selector("#email").await,
        HighlightOutcome::Applied {
            selector: "#email".to_string()
        }
    );
    assert_eq!(session.scroll_target().await, Some("#email".to_string()));
    let html = session.rendered_html().await.expect("live context");
    assert!(opening_tag(&html, r#"id="email""#).contains(r#"data-a11y-focus="true""#));

    session.highlight_by_selector("#go").await;
    let html = session.rendered_html().await.expect("live context");
    assert_eq!(html.matches("data-a11y-focus").count(), 1);
    assert!(opening_tag(&html, r#"id="go""#).contains(r#"data-a11y-focus="true""#));
    assert_eq!(html.matches(r#"id="a11ylab-marker-style""#).count(), 1);

    assert_eq!(
        session.highlight_by_selector("#missing").await,
        HighlightOutcome::Missed
    );
    assert_eq!(
        session.highlight_by_selector("input[").await,
        HighlightOutcome::Missed
    );
    let html = session.rendered_html().await.expect("live context");
    assert!(!html.contains("data-a11y-focus"));
    session.shutdown().await;
}

#[tokio::test]
async fn test_no_context_means_nothing_to_highlight() {
    let session = session(PreviewConfig::default());
    assert!(session.state().is_settled());
    assert_eq!(
        session.highlight_by_selector("img").await,
        HighlightOutcome::Missed
    );
    assert_eq!(session.click("img").await.outcome, ClickOutcome::Missed);
    assert_eq!(session.scroll_target().await, None);
}
