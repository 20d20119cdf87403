//! Partial implementation of the [Elastic Common Schema (ECS)](https://www.elastic.co/guide/en/ecs/current/ecs-reference.html) for the [`tracing_forest::Formatter`].
//!
//! Each request passing through the gate produces several events inside a single span. The
//! [`Pretty`](tracing_forest::printer::Pretty) formatter prints them as an indented tree, which is easy to scan
//! locally but unsuitable for production logs where output from several instances is interleaved. This
//! formatter condenses the tree into a single structured JSON ECS event per request, producing a
//! new-line-delimited JSON log.
//!
//! Only the ECS fields Gatehouse actually produces are implemented.

use {
    chrono::{DateTime, Utc},
    quoted_string::spec::{PartialCodePoint, QuotingClass},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    std::fmt,
    tracing_forest::tree::{Event, Span, Tree},
    tracing_forest::Formatter,
};

/// The ECS formatter converts a [`Tree`](tracing_forest::tree::Tree) into a formatted [`String`] to be displayed.
///
/// The formatter expects log messages to be short, known messages emitted by Gatehouse and therefore it is
/// not a reusable component.
///
/// # Example
///
/// This would print log messages in ECS format to stdout.
///
/// ```
/// let layer = tracing_forest::ForestLayer::from(
///     tracing_forest::Printer::new().formatter(EcsFormatter),
/// )
/// ```
#[derive(Debug)]
pub struct EcsFormatter;

impl Formatter for EcsFormatter {
    type Error = fmt::Error;

    fn fmt(&self, tree: &Tree) -> Result<String, fmt::Error> {
        let mut ecs_event = EcsEvent::default();
        EcsFormatter::parse_tree(tree, &mut ecs_event)?;
        // Only the root's level is recorded, otherwise nested events would override it.
        EcsFormatter::parse_level(tree, &mut ecs_event);
        serde_json::to_string(&ecs_event)
            // The newline flushes the writer and delimits the JSON records.
            .map(|json| json.trim().to_string() + "\n")
            .map_err(|_| fmt::Error)
    }
}

impl EcsFormatter {
    fn parse_tree(tree: &Tree, ecs_event: &mut EcsEvent) -> fmt::Result {
        match tree {
            Tree::Event(event) => EcsFormatter::parse_event(event, ecs_event),
            Tree::Span(span) => EcsFormatter::parse_span(span, ecs_event),
        }
    }

    fn parse_level(tree: &Tree, ecs_event: &mut EcsEvent) {
        let level = match tree {
            Tree::Event(event) => event.level(),
            Tree::Span(span) => span.level(),
        };
        let mut log = ecs_event.log.clone().unwrap_or_default();
        log.level = match level {
            tracing::Level::ERROR => String::from("error"),
            tracing::Level::WARN => String::from("warn"),
            tracing::Level::INFO => String::from("info"),
            tracing::Level::DEBUG => String::from("debug"),
            tracing::Level::TRACE => String::from("trace"),
        };
        ecs_event.log = Some(log);
    }

    fn parse_event(event: &Event, ecs_event: &mut EcsEvent) -> fmt::Result {
        ecs_event.timestamp = event.timestamp();

        if let Some(message) = event.message() {
            let message = unquote(message);
            ecs_event.message = message.clone();

            match message.as_str() {
                "load ext_auth" => EcsFormatter::parse_load_ext_auth_event(event, ecs_event),
                "process request" => EcsFormatter::parse_process_request_event(event, ecs_event),
                "verification decision" => {
                    EcsFormatter::parse_verification_decision_event(event, ecs_event)
                }
                "process response" => EcsFormatter::parse_process_response_event(event, ecs_event),
                _ => EcsFormatter::parse_unknown_event(event, ecs_event),
            }
        } else {
            EcsFormatter::parse_unknown_event(event, ecs_event)
        }
    }

    /// Parses `"load ext_auth"` messages emitted when a gate is constructed.
    fn parse_load_ext_auth_event(event: &Event, ecs_event: &mut EcsEvent) -> fmt::Result {
        let mut event_meta = ecs_event.event.clone().unwrap_or_default();
        event_meta.kind = Some(String::from("state"));
        event_meta.category = Some(vec![String::from("configuration")]);
        ecs_event.event = Some(event_meta);

        let mut gatehouse = ecs_event.gatehouse.clone().unwrap_or_default();
        for field in event.fields().iter() {
            match field.key() {
                "endpoint" => {
                    let mut url = ecs_event.url.clone().unwrap_or_default();
                    url.original = unquote(field.value());
                    ecs_event.url = Some(url);
                }
                "addressing" => gatehouse.addressing = Some(unquote(field.value())),
                _ => {}
            }
        }
        ecs_event.gatehouse = Some(gatehouse);

        Ok(())
    }

    /// Parses `"process request"` messages emitted whenever a request reaches the gate.
    fn parse_process_request_event(event: &Event, ecs_event: &mut EcsEvent) -> fmt::Result {
        let mut event_meta = ecs_event.event.clone().unwrap_or_default();
        event_meta.kind = Some(String::from("event"));
        event_meta.category = Some(vec![String::from("web")]);
        ecs_event.event = Some(event_meta);

        for field in event.fields().iter() {
            match field.key() {
                "method" => {
                    let mut http = ecs_event.http.clone().unwrap_or_default();
                    let mut request = http.request.unwrap_or_default();
                    request.method = unquote(field.value());
                    http.request = Some(request);
                    ecs_event.http = Some(http);
                }
                "uri" => {
                    let mut url = ecs_event.url.clone().unwrap_or_default();
                    url.original = unquote(field.value());
                    ecs_event.url = Some(url);
                }
                "user_agent" => {
                    let mut user_agent = ecs_event.user_agent.clone().unwrap_or_default();
                    user_agent.original = unquote(field.value());
                    ecs_event.user_agent = Some(user_agent);
                }
                _ => {}
            }
        }

        ecs_event.message = EcsFormatter::request_summary(ecs_event);

        Ok(())
    }

    /// Parses `"verification decision"` messages emitted once the verification service has been consulted.
    fn parse_verification_decision_event(event: &Event, ecs_event: &mut EcsEvent) -> fmt::Result {
        let mut gatehouse = ecs_event.gatehouse.clone().unwrap_or_default();
        let mut event_meta = ecs_event.event.clone().unwrap_or_default();

        for field in event.fields().iter() {
            match field.key() {
                "outcome" => {
                    let outcome = unquote(field.value());
                    event_meta.type_ = Some(vec![outcome.clone()]);
                    event_meta.outcome = Some(String::from(if outcome == "allowed" {
                        "success"
                    } else {
                        "failure"
                    }));
                    gatehouse.outcome = Some(outcome);
                }
                "reason" => gatehouse.reason = Some(unquote(field.value())),
                "verification_status" => {
                    let status = field.value().parse::<u16>().map_err(|_| fmt::Error)?;
                    // Zero means the verification service never answered.
                    if status != 0 {
                        gatehouse.verification_status = Some(status);
                    }
                }
                "elapsed" => {
                    gatehouse.elapsed = Some(field.value().parse::<f64>().map_err(|_| fmt::Error)?);
                }
                _ => {}
            }
        }

        let mut categories = event_meta.category.clone().unwrap_or_default();
        if !categories.iter().any(|c| c == "authentication") {
            categories.push(String::from("authentication"));
        }
        event_meta.category = Some(categories);
        ecs_event.event = Some(event_meta);
        ecs_event.gatehouse = Some(gatehouse);

        Ok(())
    }

    /// Parses `"process response"` messages emitted whenever a response is produced.
    fn parse_process_response_event(event: &Event, ecs_event: &mut EcsEvent) -> fmt::Result {
        for field in event.fields().iter() {
            if field.key() == "status" {
                let mut http = ecs_event.http.clone().unwrap_or_default();
                let mut response = http.response.unwrap_or_default();
                response.status = str::parse::<i64>(field.value()).map_err(|_| fmt::Error)?;
                http.response = Some(response);
                ecs_event.http = Some(http);
            }
        }

        ecs_event.message = EcsFormatter::request_summary(ecs_event);

        Ok(())
    }

    /// Records unrecognized messages as labels so nothing is silently dropped.
    fn parse_unknown_event(event: &Event, ecs_event: &mut EcsEvent) -> fmt::Result {
        if event.fields().is_empty() {
            return Ok(());
        }
        let mut labels = ecs_event.labels.clone().unwrap_or_default();
        for field in event.fields().iter() {
            labels.insert(
                field.key().to_string(),
                Value::String(unquote(field.value())),
            );
        }
        ecs_event.labels = Some(labels);
        Ok(())
    }

    fn parse_span(span: &Span, ecs_event: &mut EcsEvent) -> fmt::Result {
        for tree in span.nodes() {
            EcsFormatter::parse_tree(tree, ecs_event)?;
        }

        Ok(())
    }

    fn request_summary(ecs_event: &EcsEvent) -> String {
        let http = ecs_event.http.clone().unwrap_or_default();
        let request = http.request.unwrap_or_default();
        let uri = ecs_event.url.clone().unwrap_or_default();
        let response = http.response.unwrap_or_default();
        format!("{} {} [{}]", request.method, uri.original, response.status)
    }
}

/// Removes the double quotes tracing adds around debug-formatted strings, if present.
fn unquote(value: &str) -> String {
    quoted_string::to_content::<TraceQuoteSpec>(value)
        .map(|content| content.to_string())
        .unwrap_or_else(|_| value.to_string())
}

/// Quote spec for parsing the quoted strings emitted as field values by tracing.
#[derive(Copy, Clone, Debug)]
struct TraceQuoteSpec;

impl quoted_string::spec::GeneralQSSpec for TraceQuoteSpec {
    type Quoting = Self;
    type Parsing = TraceParsingImpl;
}

impl quoted_string::spec::QuotingClassifier for TraceQuoteSpec {
    fn classify_for_quoting(pcp: PartialCodePoint) -> QuotingClass {
        if !is_valid_pcp(pcp) {
            QuotingClass::Invalid
        } else {
            match pcp.as_u8() {
                b'"' | b'\\' => QuotingClass::NeedsQuoting,
                _ => QuotingClass::QText,
            }
        }
    }
}

fn is_valid_pcp(pcp: PartialCodePoint) -> bool {
    let bch = pcp.as_u8();
    (b' '..=b'~').contains(&bch)
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
struct TraceParsingImpl;

impl quoted_string::spec::ParsingImpl for TraceParsingImpl {
    fn can_be_quoted(pcp: PartialCodePoint) -> bool {
        is_valid_pcp(pcp)
    }

    fn handle_normal_state(
        pcp: PartialCodePoint,
    ) -> Result<(quoted_string::spec::State<Self>, bool), quoted_string::error::CoreError> {
        if is_valid_pcp(pcp) {
            Ok((quoted_string::spec::State::Normal, true))
        } else {
            Err(quoted_string::error::CoreError::InvalidChar)
        }
    }

    fn advance(
        &self,
        pcp: PartialCodePoint,
    ) -> Result<(quoted_string::spec::State<Self>, bool), quoted_string::error::CoreError> {
        if is_valid_pcp(pcp) {
            Ok((quoted_string::spec::State::Normal, false))
        } else {
            Err(quoted_string::error::CoreError::InvalidChar)
        }
    }
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub(crate) struct EcsEvent {
    /// Date/time when the event originated, formatted as RFC3339.
    #[serde(
        default = "default_timestamp_now",
        rename(serialize = "@timestamp", deserialize = "@timestamp")
    )]
    timestamp: DateTime<Utc>,
    /// The primary message to be logged.
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<EcsLogFieldSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http: Option<EcsHttpFieldSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<EcsUrlFieldSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<EcsUserAgentFieldSet>,
    /// Custom key/value pairs associated with the event. Only string values are emitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<EcsEventFieldSet>,
    /// The custom field values namespaced for Gatehouse.
    #[serde(skip_serializing_if = "Option::is_none")]
    gatehouse: Option<EcsGatehouseFieldSet>,
}

fn default_timestamp_now() -> DateTime<Utc> {
    Utc::now()
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsEventFieldSet {
    /// The highest-level ECS categorization, e.g. `event` or `state`.
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    /// Categories such as `web`, `authentication`, or `configuration`.
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<Vec<String>>,
    /// Sub-buckets within a category. Gatehouse emits `allowed` or `denied`.
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename(serialize = "type", deserialize = "type")
    )]
    type_: Option<Vec<String>>,
    /// `success` or `failure` from the point of view of the requesting client.
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<String>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsLogFieldSet {
    level: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsHttpFieldSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<EcsHttpRequestFieldSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<EcsHttpResponseFieldSet>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsHttpRequestFieldSet {
    method: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsHttpResponseFieldSet {
    status: i64,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsUrlFieldSet {
    original: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsUserAgentFieldSet {
    original: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct EcsGatehouseFieldSet {
    /// `out-of-band` or `path-replicated`.
    #[serde(skip_serializing_if = "Option::is_none")]
    addressing: Option<String>,
    /// `allowed` or `denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<String>,
    /// Why the request was allowed or denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    /// The status the verification service answered with.
    #[serde(skip_serializing_if = "Option::is_none")]
    verification_status: Option<u16>,
    /// Seconds spent consulting the verification service.
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed: Option<f64>,
}
