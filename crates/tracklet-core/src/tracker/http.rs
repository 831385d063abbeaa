use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::level::Level;
use crate::location::SourceLocation;

use super::{to_map, Domain, Tracker};

/// `http` sub-map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpInfo {
    pub status_code: Option<u16>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub url_name: Option<String>,
    pub url_namespace: Option<String>,
    pub query_string: Option<String>,
    /// Milliseconds.
    pub duration: Option<f64>,
}

impl HttpInfo {
    /// `url?query` when a query string is present.
    pub fn full_url(&self) -> String {
        let url = self.url.as_deref().unwrap_or_default();
        match self.query_string.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{}", url, q),
            _ => url.to_string(),
        }
    }
}

/// `request` sub-map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub id: Option<String>,
    pub header: Option<Value>,
    #[serde(rename = "Header")]
    pub header_text: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
    pub params: Option<Value>,
    #[serde(rename = "Params")]
    pub params_text: Option<String>,
}

/// `response` sub-map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub header: Option<Value>,
    #[serde(rename = "Header")]
    pub header_text: Option<String>,
    pub data: Option<Value>,
    #[serde(rename = "Data")]
    pub data_text: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
}

/// `api` sub-map: the envelope code and message of the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiInfo {
    pub code: Option<Value>,
    pub message: Option<Value>,
}

/// Context of an HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpDomain {
    pub http: HttpInfo,
    pub request: RequestInfo,
    pub response: ResponseInfo,
    pub api: ApiInfo,
    pub user: Value,
    pub operator: Value,
    #[serde(skip)]
    pub request_params_tracked: bool,
}

impl Default for HttpDomain {
    fn default() -> Self {
        Self {
            http: HttpInfo::default(),
            request: RequestInfo::default(),
            response: ResponseInfo::default(),
            api: ApiInfo::default(),
            user: Value::Object(Map::new()),
            operator: Value::Object(Map::new()),
            request_params_tracked: false,
        }
    }
}

impl Domain for HttpDomain {
    const CLASS: &'static str = "http";
    const RECORD_TYPE: &'static str = "HTTPTracker";

    fn context(&self) -> Map<String, Value> {
        let mut map = to_map(self);
        map.insert("status_code".to_string(), status_value(&self.http));
        map
    }

    fn identity(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("http".to_string(), Value::Object(to_map(&self.http)));
        map.insert("status_code".to_string(), status_value(&self.http));
        map
    }
}

fn status_value(http: &HttpInfo) -> Value {
    http.status_code.map(Value::from).unwrap_or(Value::Null)
}

/// Request line passed to [`Tracker::set_http_info`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequestInfo {
    pub method: String,
    pub url: String,
    /// Matched route pattern, when the router exposes one.
    pub url_name: Option<String>,
    pub url_namespace: Option<String>,
    pub query_string: Option<String>,
}

/// Whether an API envelope code belongs to the 4xx or 5xx family
/// (`404`, `4003`, `500`, ...).
fn is_failure_code(code: &Value) -> bool {
    let text = match code {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return false,
    };
    text.starts_with('4') || text.starts_with('5')
}

fn display_or_dash(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

impl Tracker<HttpDomain> {
    pub fn set_request_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.console(Level::Debug, &format!("Request ID: {}", id));
        self.update_domain(|d| d.request.id = Some(id));
    }

    pub fn set_http_info(&mut self, info: HttpRequestInfo) {
        self.update_domain(|d| {
            d.http.method = Some(info.method);
            d.http.url = Some(info.url);
            d.http.url_name = info.url_name;
            d.http.url_namespace = info.url_namespace;
            d.http.query_string = info.query_string;
        });
        let http = &self.domain().http;
        let text = format!(
            "{} {} received",
            http.method.as_deref().unwrap_or_default(),
            http.full_url()
        );
        self.console(Level::Info, &text);
    }

    pub fn set_request_headers(&mut self, headers: Value) {
        let (json, text) = self.capture("request.header", "RequestHeader", headers);
        self.update_domain(|d| {
            d.request.header = json;
            d.request.header_text = text;
        });
    }

    pub fn set_request_body(&mut self, body: impl Into<String>) {
        let body = body.into();
        self.console(Level::Debug, &format!("RequestBody: {}", body));
        self.update_domain(|d| d.request.body = Some(body));
    }

    pub fn set_request_params(&mut self, params: Value) {
        let (json, text) = self.capture("request.params", "RequestParams", params);
        self.update_domain(|d| {
            d.request.params = json;
            d.request.params_text = text;
            d.request_params_tracked = true;
        });
    }

    pub fn request_params_tracked(&self) -> bool {
        self.domain().request_params_tracked
    }

    pub fn set_response_headers(&mut self, headers: Value) {
        let (json, text) = self.capture("response.header", "ResponseHeader", headers);
        self.update_domain(|d| {
            d.response.header = json;
            d.response.header_text = text;
        });
    }

    /// Capture the response envelope and its `code`/`message`.
    ///
    /// A 4xx/5xx-family code raises the tracker to WARN; only
    /// `set_error` reaches ERROR.
    pub fn set_response_data(&mut self, data: Value) {
        let code = data.get("code").cloned();
        let message = data.get("message").cloned();
        if code.as_ref().map(is_failure_code).unwrap_or(false) {
            self.raise(Level::Warn);
        }
        let (json, text) = self.capture("response.data", "ResponseData", data);
        self.update_domain(|d| {
            d.api.code = code;
            d.api.message = message;
            d.response.data = json;
            d.response.data_text = text;
        });
    }

    pub fn set_response_body(&mut self, body: impl Into<String>) {
        let body = body.into();
        self.console(Level::Debug, &format!("ResponseBody: {}", body));
        self.update_domain(|d| d.response.body = Some(body));
    }

    /// Record status and duration and write the summary line
    /// `METHOD url duration status api_code api_message`.
    #[track_caller]
    pub fn set_http_result(&mut self, status_code: u16, duration: Duration) {
        let location = SourceLocation::caller();
        let millis = duration.as_secs_f64() * 1000.0;
        self.update_domain(|d| {
            d.http.status_code = Some(status_code);
            d.http.duration = Some(millis);
        });

        let domain = self.domain();
        let text = format!(
            "{} {} {:.1}ms {} {} {}",
            domain.http.method.as_deref().unwrap_or("-"),
            domain.http.full_url(),
            millis,
            status_code,
            display_or_dash(&domain.api.code),
            display_or_dash(&domain.api.message),
        );
        self.summary(location, &text);
    }

    /// Replace the user map. Null or empty values keep the current one.
    pub fn set_user(&mut self, user: Value) {
        if !is_blank(&user) {
            self.update_domain(|d| d.user = user);
        }
        let text = self.domain().user.to_string();
        self.console(Level::Debug, &format!("User: {}", text));
    }

    /// Replace the operator map. Null or empty values keep the current one.
    pub fn set_operator(&mut self, operator: Value) {
        if !is_blank(&operator) {
            self.update_domain(|d| d.operator = operator);
        }
        let text = self.domain().operator.to_string();
        self.console(Level::Debug, &format!("Operator: {}", text));
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
