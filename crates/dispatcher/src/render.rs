//! Event renderers - turn a frozen event into one line of text

use contracts::{AccessEvent, RenderFormat, NA};

/// Strftime layout of the NCSA `[%t]` field
const NCSA_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Pure event-to-text conversion
pub trait EventRenderer: Send + Sync {
    fn render(&self, event: &AccessEvent) -> String;
}

/// NCSA common log format
///
/// `host - - [time] "request line" status bytes`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonRenderer;

impl EventRenderer for CommonRenderer {
    fn render(&self, event: &AccessEvent) -> String {
        format!(
            "{} {} {} [{}] \"{}\" {} {}",
            event.remote_host(),
            NA,
            NA,
            event.timestamp().format(NCSA_TIME_FORMAT),
            event.request_url(),
            status_field(event),
            bytes_field(event)
        )
    }
}

/// NCSA combined log format (common + referer + user agent)
#[derive(Debug, Clone, Copy, Default)]
pub struct CombinedRenderer;

impl EventRenderer for CombinedRenderer {
    fn render(&self, event: &AccessEvent) -> String {
        format!(
            "{} \"{}\" \"{}\"",
            CommonRenderer.render(event),
            event.request_header("referer").unwrap_or(NA),
            event.request_header("user-agent").unwrap_or(NA)
        )
    }
}

/// One JSON object per event
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl EventRenderer for JsonRenderer {
    fn render(&self, event: &AccessEvent) -> String {
        serde_json::to_string(event)
            .unwrap_or_else(|e| serde_json::json!({ "render_error": e.to_string() }).to_string())
    }
}

/// Renderer for a configured format
pub fn renderer_for(format: RenderFormat) -> Box<dyn EventRenderer> {
    match format {
        RenderFormat::Common => Box::new(CommonRenderer),
        RenderFormat::Combined => Box::new(CombinedRenderer),
        RenderFormat::Json => Box::new(JsonRenderer),
    }
}

fn status_field(event: &AccessEvent) -> String {
    if event.is_committed() {
        event.status_code().to_string()
    } else {
        NA.to_string()
    }
}

fn bytes_field(event: &AccessEvent) -> String {
    match event.content_length() {
        n if n < 0 => NA.to_string(),
        n => n.to_string(),
    }
}
