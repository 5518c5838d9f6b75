use async_trait::async_trait;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;

use super::{content_type_for, Handler, Next, ThemeRequest, ThemeResponse};
use crate::dev::filter::ChangeFilter;
use crate::error::{CliError, Result};

/// Serves `assets/` straight from the working copy, whatever the sync state.
///
/// Storefront CDN URLs for theme assets are rewritten to `/assets/...` in
/// delegated HTML, CSS and JS so browsers ask this handler for them. Assets
/// that only exist remotely (rendered `.liquid` assets) are fetched from the
/// store's CDN path by the proxy.
pub struct LocalAssetHandler {
    root: PathBuf,
    filter: Arc<dyn ChangeFilter>,
    theme_id: u64,
    cdn_url: Regex,
}

impl LocalAssetHandler {
    pub fn new(
        root: PathBuf,
        filter: Arc<dyn ChangeFilter>,
        store: &str,
        theme_id: u64,
    ) -> Result<Self> {
        let root = root.canonicalize().unwrap_or(root);
        let pattern = format!(
            r#"(?:https?:)?//(?:{}|cdn\.shopify\.com)/(?:cdn/shop|s/files(?:/[0-9]+)+)/t/[0-9]+/assets/"#,
            regex::escape(store)
        );
        let cdn_url = Regex::new(&pattern)
            .map_err(|e| CliError::InvalidArgument(format!("store domain '{store}': {e}")))?;

        Ok(Self {
            root,
            filter,
            theme_id,
            cdn_url,
        })
    }

    /// Decoded asset file name for `/assets/<name>` or
    /// `/cdn/shop/t/<n>/assets/<name>`.
    fn asset_name(path: &str) -> Option<String> {
        let name = match path.strip_prefix("/assets/") {
            Some(name) => name,
            None => {
                let rest = path.strip_prefix("/cdn/shop/t/")?;
                let (version, name) = rest.split_once("/assets/")?;
                if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                name
            }
        };

        let name = urlencoding::decode(name).ok()?;
        let safe = !name.is_empty()
            && !name.contains("..")
            && !name.contains('\\')
            && !name.starts_with('/')
            && !name.contains('\0');
        safe.then(|| name.into_owned())
    }

    /// Existing local file for `name`, confined to the theme root.
    async fn local_file(&self, name: &str) -> Option<PathBuf> {
        let key = format!("assets/{name}");
        if !self.filter.accepts(&key) {
            return None;
        }

        let path = tokio::fs::canonicalize(self.root.join(&key)).await.ok()?;
        if !path.starts_with(&self.root) {
            tracing::warn!(%key, "refusing to serve path outside the theme root");
            return None;
        }
        let meta = tokio::fs::metadata(&path).await.ok()?;
        meta.is_file().then_some(path)
    }

    fn rewrite_cdn_urls(&self, text: &str) -> Option<String> {
        match self.cdn_url.replace_all(text, "/assets/") {
            std::borrow::Cow::Borrowed(_) => None,
            std::borrow::Cow::Owned(rewritten) => Some(rewritten),
        }
    }

    /// Point a `/assets/...` miss at the store CDN so the proxy can fetch it.
    fn to_cdn_request(&self, mut request: ThemeRequest) -> ThemeRequest {
        if let Some(name) = request.path().strip_prefix("/assets/") {
            let target = match request.uri.query() {
                Some(query) => format!("/cdn/shop/t/{}/assets/{}?{}", self.theme_id, name, query),
                None => format!("/cdn/shop/t/{}/assets/{}", self.theme_id, name),
            };
            if let Ok(uri) = target.parse::<Uri>() {
                request.uri = uri;
            }
        }
        request
    }
}

#[async_trait]
impl Handler for LocalAssetHandler {
    fn name(&self) -> &'static str {
        "local-assets"
    }

    async fn handle(&self, request: ThemeRequest, next: Next<'_>) -> ThemeResponse {
        let is_read = request.method == Method::GET || request.method == Method::HEAD;

        if is_read {
            if let Some(name) = Self::asset_name(request.path()) {
                if let Some(path) = self.local_file(&name).await {
                    match tokio::fs::read(&path).await {
                        Ok(content) => {
                            let mut response = ThemeResponse::new(
                                StatusCode::OK,
                                content_type_for(&name),
                                content,
                            );
                            response
                                .headers
                                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                            return response;
                        }
                        Err(err) => tracing::warn!(path = %path.display(), "could not read asset: {}", err),
                    }
                }
            }
        }

        let request = if is_read {
            self.to_cdn_request(request)
        } else {
            request
        };
        next.run(request).await.rewrite_text(
            &["text/html", "text/css", "application/javascript", "text/javascript"],
            |text| self.rewrite_cdn_urls(text),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::filter::IgnoreFilter;
    use crate::dev::pipeline::Pipeline;
    use crate::dev::testing::{write_theme_file, STORE};
    use tempfile::TempDir;

    struct Remote;

    #[async_trait]
    impl Handler for Remote {
        fn name(&self) -> &'static str {
            "remote"
        }

        async fn handle(&self, request: ThemeRequest, _next: Next<'_>) -> ThemeResponse {
            let body = format!(
                r#"<link href="//{STORE}/cdn/shop/t/12/assets/theme.css?v=3"> from {}"#,
                request.uri
            );
            ThemeResponse::new(StatusCode::OK, "text/html", body)
        }
    }

    fn setup(dir: &TempDir, ignore: &[String]) -> Pipeline {
        let filter = Arc::new(IgnoreFilter::from_root(dir.path(), ignore).unwrap());
        Pipeline::from_handlers(vec![
            Arc::new(LocalAssetHandler::new(dir.path().to_path_buf(), filter, STORE, 7).unwrap()),
            Arc::new(Remote),
        ])
    }

    fn text(response: &ThemeResponse) -> String {
        String::from_utf8(response.body_bytes().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_local_file() {
        let dir = TempDir::new().unwrap();
        write_theme_file(dir.path(), "assets/theme.css", "body{color:red}");
        let pipeline = setup(&dir, &[]);

        for path in ["/assets/theme.css?v=1", "/cdn/shop/t/12/assets/theme.css"] {
            let response = pipeline.handle(ThemeRequest::get(path)).await;
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(response.content_type(), "text/css");
            assert_eq!(text(&response), "body{color:red}");
        }
    }

    #[tokio::test]
    async fn test_serves_percent_encoded_name() {
        let dir = TempDir::new().unwrap();
        write_theme_file(dir.path(), "assets/my file.css", "a{}");
        let pipeline = setup(&dir, &[]);

        let response = pipeline.handle(ThemeRequest::get("/assets/my%20file.css")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(text(&response), "a{}");

        let response = pipeline
            .handle(ThemeRequest::get("/assets/%2e%2e/config/settings_data.json"))
            .await;
        assert!(text(&response).contains("from"));
    }

    #[tokio::test]
    async fn test_missing_asset_goes_to_store_cdn() {
        let dir = TempDir::new().unwrap();
        let pipeline = setup(&dir, &[]);

        let response = pipeline.handle(ThemeRequest::get("/assets/base.css?v=9")).await;
        assert!(text(&response).ends_with("from /cdn/shop/t/7/assets/base.css?v=9"));
    }

    #[tokio::test]
    async fn test_refuses_traversal_and_ignored() {
        let dir = TempDir::new().unwrap();
        write_theme_file(dir.path(), "config/settings_data.json", "{}");
        write_theme_file(dir.path(), "assets/secret.css", "x");
        let pipeline = setup(&dir, &["assets/secret.css".to_string()]);

        let response = pipeline
            .handle(ThemeRequest::get("/assets/../config/settings_data.json"))
            .await;
        assert!(text(&response).contains("from"));

        let response = pipeline.handle(ThemeRequest::get("/assets/secret.css")).await;
        assert!(text(&response).contains("from"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refuses_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("passwd"), "root").unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("passwd"),
            dir.path().join("assets/link.css"),
        )
        .unwrap();
        let pipeline = setup(&dir, &[]);

        let response = pipeline.handle(ThemeRequest::get("/assets/link.css")).await;
        assert!(!text(&response).contains("root"));
    }

    #[tokio::test]
    async fn test_rewrites_cdn_urls_in_delegated_html() {
        let dir = TempDir::new().unwrap();
        let pipeline = setup(&dir, &[]);

        let response = pipeline.handle(ThemeRequest::get("/products/shoe")).await;
        let html = text(&response);
        assert!(html.contains(r#"href="/assets/theme.css?v=3""#), "{html}");
    }
}
