use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::registry::LookupSpan;

/// A formatting layer writing one flattened JSON object per event to `make_writer`.
///
/// Events carry their target, source location and the innermost span. Filtering is left to the
/// caller, so the layer composes with the same filters and Sentry layer as the text formats.
pub fn json_layer<S, W>(make_writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(true)
        .with_line_number(true)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(make_writer)
        .boxed()
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use serde_json::Value;
    use tracing_subscriber::prelude::*;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_lines() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::registry().with(json_layer(move || writer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("fetch", store = "orders");
            let _guard = span.enter();
            tracing::warn!(count = 2, "Swept expired entries");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1);

        let event: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["message"], "Swept expired entries");
        assert_eq!(event["count"], 2);
        assert_eq!(event["level"], "WARN");
        assert_eq!(event["target"], "shopquery_service::logging::tests");
        assert_eq!(event["span"]["name"], "fetch");
        assert_eq!(event["span"]["store"], "orders");
        assert!(event.get("spans").is_none());
    }
}
