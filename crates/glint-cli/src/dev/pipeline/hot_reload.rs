use async_trait::async_trait;
use axum::http::StatusCode;
use glint_config::LiveReload;

use super::{Handler, Next, ThemeRequest, ThemeResponse};
use crate::dev::broadcast::ReloadBroadcaster;

pub const RELOAD_PATH: &str = "/hot-reload";
pub const SCRIPT_PATH: &str = "/hot-reload.js";

/// Browser side of the reload channel.
pub const CLIENT_SCRIPT: &str = include_str!("../../../assets/hot-reload.js");

/// Serves the reload stream and client, and injects the client into every
/// HTML page that comes back through the rest of the chain.
pub struct HotReloadHandler {
    broadcaster: ReloadBroadcaster,
    live_reload: LiveReload,
}

impl HotReloadHandler {
    pub fn new(broadcaster: ReloadBroadcaster, live_reload: LiveReload) -> Self {
        Self {
            broadcaster,
            live_reload,
        }
    }
}

#[async_trait]
impl Handler for HotReloadHandler {
    fn name(&self) -> &'static str {
        "hot-reload"
    }

    async fn handle(&self, request: ThemeRequest, next: Next<'_>) -> ThemeResponse {
        if self.live_reload == LiveReload::Off {
            return next.run(request).await;
        }

        match request.path() {
            RELOAD_PATH => {
                let stream = self.broadcaster.subscribe(request.query_param("page"));
                return ThemeResponse::events(stream);
            }
            SCRIPT_PATH => {
                return ThemeResponse::new(StatusCode::OK, "application/javascript", CLIENT_SCRIPT);
            }
            _ => {}
        }

        let response = next.run(request).await;
        if !response.is_html() {
            return response;
        }

        let broadcaster = &self.broadcaster;
        response.rewrite_text(&["text/html"], |html| {
            // Fragments (section rendering) have no body to inject into.
            let pos = html.rfind("</body>")?;
            let page = broadcaster.register_page(html);
            Some(inject_script(html, pos, &page))
        })
    }
}

fn inject_script(html: &str, pos: usize, page: &str) -> String {
    let tag = format!(r#"<script src="{SCRIPT_PATH}?page={page}" defer></script>"#);
    let mut result = String::with_capacity(html.len() + tag.len() + 2);
    result.push_str(&html[..pos]);
    result.push_str(&tag);
    result.push('\n');
    result.push_str(&html[pos..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::pipeline::{Handler, Pipeline, ResponseBody};
    use std::sync::Arc;

    struct Page(&'static str, &'static str);

    #[async_trait]
    impl Handler for Page {
        fn name(&self) -> &'static str {
            "page"
        }

        async fn handle(&self, _request: ThemeRequest, _next: Next<'_>) -> ThemeResponse {
            ThemeResponse::new(StatusCode::OK, self.0, self.1)
        }
    }

    fn pipeline(
        broadcaster: &ReloadBroadcaster,
        mode: LiveReload,
        content_type: &'static str,
        body: &'static str,
    ) -> Pipeline {
        Pipeline::from_handlers(vec![
            Arc::new(HotReloadHandler::new(broadcaster.clone(), mode)),
            Arc::new(Page(content_type, body)),
        ])
    }

    fn text(response: &ThemeResponse) -> String {
        String::from_utf8(response.body_bytes().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_injects_before_closing_body() {
        let broadcaster = ReloadBroadcaster::new(4);
        let pipeline = pipeline(
            &broadcaster,
            LiveReload::HotReload,
            "text/html; charset=utf-8",
            r#"<html><body><img src="/assets/a.png"></body></html>"#,
        );

        let html = text(&pipeline.handle(ThemeRequest::get("/")).await);
        let script = html.find("<script src=\"/hot-reload.js?page=").unwrap();
        assert!(script < html.find("</body>").unwrap());

        let page = html[script..]
            .split("page=")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap();
        assert!(broadcaster
            .page_references(page)
            .unwrap()
            .contains("assets/a.png"));
    }

    #[tokio::test]
    async fn test_fragments_and_non_html_untouched() {
        let broadcaster = ReloadBroadcaster::new(4);

        let fragment = pipeline(&broadcaster, LiveReload::HotReload, "text/html", "<div>section</div>");
        assert_eq!(text(&fragment.handle(ThemeRequest::get("/?section_id=x")).await), "<div>section</div>");

        let css = pipeline(&broadcaster, LiveReload::HotReload, "text/css", "body{}</body>");
        assert_eq!(text(&css.handle(ThemeRequest::get("/assets/a.css")).await), "body{}</body>");
    }

    #[tokio::test]
    async fn test_serves_stream_and_script() {
        let broadcaster = ReloadBroadcaster::new(4);
        let pipeline = pipeline(&broadcaster, LiveReload::HotReload, "text/html", "");

        let response = pipeline.handle(ThemeRequest::get("/hot-reload?page=abc")).await;
        assert!(matches!(response.body, ResponseBody::Events(_)));
        assert_eq!(broadcaster.client_count(), 1);
        drop(response);
        assert_eq!(broadcaster.client_count(), 0);

        let response = pipeline.handle(ThemeRequest::get(SCRIPT_PATH)).await;
        assert_eq!(response.content_type(), "application/javascript");
        assert!(text(&response).contains("EventSource"));
    }

    #[tokio::test]
    async fn test_off_mode_is_transparent() {
        let broadcaster = ReloadBroadcaster::new(4);
        let pipeline = pipeline(&broadcaster, LiveReload::Off, "text/html", "<body></body>");

        assert_eq!(text(&pipeline.handle(ThemeRequest::get("/")).await), "<body></body>");
        let response = pipeline.handle(ThemeRequest::get(RELOAD_PATH)).await;
        assert!(matches!(response.body, ResponseBody::Full(_)));
        assert_eq!(broadcaster.client_count(), 0);
    }
}
