//! Line-oriented sample feed: `<metric> <app|-> <value>` per line.
//!
//! Blank lines and lines starting with `#` are ignored. An app of `-`
//! records the sample without app label.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::recorder::MetricsRecorder;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedLine {
    pub metric: String,
    pub app: Option<String>,
    pub value: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum FeedError {
    #[error("expected `<metric> <app|-> <value>`, got {0} field(s)")]
    FieldCount(usize),

    #[error("invalid value {0:?}")]
    Value(String),
}

/// Parse one feed line; `Ok(None)` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<FeedLine>, FeedError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    let [metric, app, value] = fields.as_slice() else {
        return Err(FeedError::FieldCount(fields.len()));
    };
    let value: f64 = value
        .parse()
        .map_err(|_| FeedError::Value(value.to_string()))?;
    if !value.is_finite() {
        return Err(FeedError::Value(value.to_string()));
    }

    Ok(Some(FeedLine {
        metric: metric.to_string(),
        app: (*app != "-").then(|| app.to_string()),
        value,
    }))
}

/// Record every valid line of `reader` until EOF. Malformed lines are
/// logged and skipped. Returns the number of samples recorded.
pub async fn ingest<R>(reader: R, recorder: &MetricsRecorder) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut recorded = 0;
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_line(&line) {
            Ok(Some(sample)) => {
                recorder
                    .record(&sample.metric, sample.app.as_deref(), sample.value)
                    .await;
                recorded += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(line = line_no, error = %e, "skipping malformed feed line"),
        }
    }
    debug!(recorded, "metrics feed closed");
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlscale_core::MetricsSource;
    use std::time::Duration;

    #[test]
    fn parses_scoped_and_unscoped_lines() {
        assert_eq!(
            parse_line("latency web 120.5").unwrap(),
            Some(FeedLine {
                metric: "latency".to_string(),
                app: Some("web".to_string()),
                value: 120.5,
            })
        );
        assert_eq!(parse_line("  cpu - 0.3 ").unwrap().unwrap().app, None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("# comment").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_line("latency web"), Err(FeedError::FieldCount(2)));
        assert_eq!(
            parse_line("latency web fast"),
            Err(FeedError::Value("fast".to_string()))
        );
        assert!(parse_line("latency web NaN").is_err());
    }

    #[tokio::test]
    async fn ingest_records_valid_lines() {
        let recorder = MetricsRecorder::new(Duration::from_secs(60), Duration::from_secs(60));
        let input: &[u8] = b"latency web 100\nbogus\nlatency web 200\n# done\n";
        let n = ingest(input, &recorder).await.unwrap();
        assert_eq!(n, 2);
        let values = recorder
            .averaged_values("latency", Duration::from_secs(60))
            .await;
        assert_eq!(values, vec![rlscale_core::Metric::new("latency", 150.0, "web")]);
    }
}
