//! Integration test verifying that `#[instrument]` annotations produce the
//! expected spans along the record access path.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::{Arc, Mutex};

use common::{Harness, content, user};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn recorded(spans: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    spans.lock().expect("lock poisoned").clone()
}

#[tokio::test]
async fn wallet_linking_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let h = Harness::new().await;
    h.link(&user("patient-1")).await;

    let recorded = recorded(&spans);
    assert!(
        recorded.iter().any(|s| s == "link_wallet"),
        "expected a 'link_wallet' span, got: {recorded:?}"
    );
}

#[tokio::test]
async fn granted_read_creates_access_and_audit_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let h = Harness::new().await;
    let (patient, doctor) = (user("patient-1"), user("doctor-1"));
    let p = h.link(&patient).await.address();
    let d = h.link(&doctor).await.address();
    h.ledger.grant(p, d);

    h.service.view_patient_records(&doctor, &patient).await.unwrap();
    h.drain().await;

    let recorded = recorded(&spans);
    for expected in ["view_patient_records", "check_access_detailed", "try_log_access"] {
        assert!(
            recorded.iter().any(|s| s == expected),
            "expected a '{expected}' span, got: {recorded:?}"
        );
    }
}

#[tokio::test]
async fn record_upload_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let h = Harness::new().await;
    h.service.upload_patient_record(&user("patient-1"), content("flu")).await.unwrap();

    let recorded = recorded(&spans);
    assert!(
        recorded.iter().any(|s| s == "upload_patient_record"),
        "expected an 'upload_patient_record' span, got: {recorded:?}"
    );
}
