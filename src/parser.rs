//! XML parser for the public prediction feed.

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};
use tracing::{debug, trace};

use crate::error::FeedError;
use crate::prediction::PredictionRecord;

/// Decodes one feed response into zero or more [`PredictionRecord`]s.
///
/// Predictions are emitted in document order. A prediction that is missing any
/// of `epochTime`, `minutes` or `seconds`, or carries a non-integer value in
/// one of them, is skipped without failing the parse. The same goes for
/// `predictions` elements without a `routeTitle` and `direction` elements
/// without a `title`.
///
/// # Errors
///
/// Returns [`FeedError::Parse`] if the payload is not well-formed XML or its
/// root is not `<body>`, and [`FeedError::Upstream`] if the feed answered with
/// an `<Error>` element.
pub fn parse_predictions(bytes: &[u8]) -> Result<Vec<PredictionRecord>, FeedError> {
    let xml = std::str::from_utf8(bytes).map_err(|e| FeedError::Parse(e.to_string()))?;
    let doc = Document::parse(xml)?;

    let body = doc.root_element();
    if !body.has_tag_name("body") {
        return Err(FeedError::Parse(format!(
            "expected <body> root, found <{}>",
            body.tag_name().name()
        )));
    }

    if let Some(error) = body.children().find(|n| n.has_tag_name("Error")) {
        return Err(upstream_error(error));
    }

    let mut results = Vec::new();

    for predictions in body.children().filter(|n| n.has_tag_name("predictions")) {
        let Some(route_title) = predictions.attribute("routeTitle") else {
            continue;
        };

        for direction in predictions.children().filter(|n| n.has_tag_name("direction")) {
            let Some(direction_title) = direction.attribute("title") else {
                continue;
            };

            for prediction in direction.children().filter(|n| n.has_tag_name("prediction")) {
                match parse_prediction(prediction, route_title, direction_title) {
                    Some(record) => results.push(record),
                    None => trace!(route = route_title, "Skipping malformed prediction"),
                }
            }
        }
    }

    debug!(count = results.len(), "Parsed predictions");
    Ok(results)
}

fn parse_prediction(node: Node, route: &str, destination: &str) -> Option<PredictionRecord> {
    let epoch_time: f64 = node.attribute("epochTime")?.trim().parse().ok()?;
    let minutes: i64 = node.attribute("minutes")?.trim().parse().ok()?;
    let seconds: i64 = node.attribute("seconds")?.trim().parse().ok()?;

    // epochTime is documented as seconds but the feed sends milliseconds.
    let arrival_time = epoch_millis_to_utc(epoch_time)?;

    Some(PredictionRecord::new(
        route,
        destination,
        arrival_time,
        minutes,
        seconds,
    ))
}

/// Accepts fractional values such as `1459345200000.0`; sub-millisecond
/// precision is dropped.
fn epoch_millis_to_utc(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(millis.trunc() as i64)
}

fn upstream_error(node: Node) -> FeedError {
    let message = node.text().map(str::trim).unwrap_or_default().to_string();
    let should_retry = node
        .attribute("shouldRetry")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    FeedError::Upstream {
        message,
        should_retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_DIRECTION: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<body copyright="All data copyright MBTA 2016.">
  <predictions agencyTitle="MBTA" routeTitle="1" routeTag="1" stopTitle="Massachusetts Ave @ Holyoke St" stopTag="110">
    <direction title="Harvard via Mass. Ave.">
      <prediction epochTime="1459345200000" seconds="411" minutes="6" isDeparture="false" tripTag="1"/>
      <prediction epochTime="1459345800000" seconds="1011" minutes="16" isDeparture="false" tripTag="2"/>
    </direction>
  </predictions>
</body>"#;

    #[test]
    fn test_parse_single_direction() {
        let records = parse_predictions(SINGLE_DIRECTION.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].route, "1");
        assert_eq!(records[0].destination, "Harvard via Mass. Ave.");
        assert_eq!(records[0].minutes_until_arrival, 6);
        assert_eq!(records[0].seconds_until_arrival, 411);
        assert_eq!(records[1].minutes_until_arrival, 16);
    }

    #[test]
    fn test_epoch_time_is_milliseconds() {
        let records = parse_predictions(SINGLE_DIRECTION.as_bytes()).unwrap();
        assert_eq!(records[0].arrival_time.timestamp(), 1_459_345_200);
        assert_eq!(
            records[0].arrival_time,
            DateTime::from_timestamp(1_459_345_200, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_attribute_same_as_removed() {
        let with_broken = r#"<body>
  <predictions routeTitle="1">
    <direction title="Harvard">
      <prediction epochTime="1459345200000" seconds="411" minutes="6"/>
      <prediction epochTime="1459345500000" minutes="11"/>
      <prediction seconds="900" minutes="15"/>
      <prediction epochTime="1459345800000" seconds="1011"/>
      <prediction epochTime="1459346100000" seconds="1311" minutes="21"/>
    </direction>
  </predictions>
</body>"#;
        let without_broken = r#"<body>
  <predictions routeTitle="1">
    <direction title="Harvard">
      <prediction epochTime="1459345200000" seconds="411" minutes="6"/>
      <prediction epochTime="1459346100000" seconds="1311" minutes="21"/>
    </direction>
  </predictions>
</body>"#;

        assert_eq!(
            parse_predictions(with_broken.as_bytes()).unwrap(),
            parse_predictions(without_broken.as_bytes()).unwrap()
        );
    }

    #[test]
    fn test_non_numeric_values_are_skipped() {
        let xml = r#"<body>
  <predictions routeTitle="1">
    <direction title="Harvard">
      <prediction epochTime="soon" seconds="411" minutes="6"/>
      <prediction epochTime="1459345200000" seconds="4.5" minutes="6"/>
      <prediction epochTime="1459345200000" seconds="411" minutes="six"/>
    </direction>
  </predictions>
</body>"#;

        assert!(parse_predictions(xml.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_fractional_epoch_time_is_accepted() {
        let xml = r#"<body>
  <predictions routeTitle="1">
    <direction title="Harvard">
      <prediction epochTime="1459345200000.0" seconds="411" minutes="6"/>
      <prediction epochTime="NaN" seconds="500" minutes="8"/>
    </direction>
  </predictions>
</body>"#;

        let records = parse_predictions(xml.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].arrival_time.timestamp(), 1_459_345_200);
    }

    #[test]
    fn test_untitled_route_and_direction_are_skipped() {
        let xml = r#"<body>
  <predictions routeTag="1">
    <direction title="Harvard">
      <prediction epochTime="1459345200000" seconds="411" minutes="6"/>
    </direction>
  </predictions>
  <predictions routeTitle="47">
    <direction>
      <prediction epochTime="1459345200000" seconds="411" minutes="6"/>
    </direction>
    <direction title="Central Sq.">
      <prediction epochTime="1459345260000" seconds="471" minutes="7"/>
    </direction>
  </predictions>
</body>"#;

        let records = parse_predictions(xml.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].route, "47");
        assert_eq!(records[0].destination, "Central Sq.");
    }

    #[test]
    fn test_no_predictions_is_empty() {
        let xml = r#"<body><predictions routeTitle="1" dirTitleBecauseNoPredictions="Harvard"/></body>"#;
        assert!(parse_predictions(xml.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_xml_is_parse_error() {
        let result = parse_predictions(b"<body><predictions>");
        assert!(matches!(result, Err(FeedError::Parse(_))));
    }

    #[test]
    fn test_wrong_root_is_parse_error() {
        let result = parse_predictions(b"<html><p>Service unavailable</p></html>");
        assert!(matches!(result, Err(FeedError::Parse(_))));
    }

    #[test]
    fn test_upstream_error_element() {
        let xml = r#"<body><Error shouldRetry="false">
  Agency parameter "a=xyz" is not valid.
</Error></body>"#;

        match parse_predictions(xml.as_bytes()) {
            Err(FeedError::Upstream {
                message,
                should_retry,
            }) => {
                assert_eq!(message, r#"Agency parameter "a=xyz" is not valid."#);
                assert!(!should_retry);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
