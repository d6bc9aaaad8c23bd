//! Chromium control over the Chrome `DevTools` Protocol.
//!
//! With the `browser` feature, [`ChromiumSession`] launches Chromium through
//! chromiumoxide and opens one browser context per scenario. Requests of each
//! context are paused with the CDP `Fetch` domain and handed to that context's
//! [`Interceptor`](crate::Interceptor) in the order Chromium reports them.
//!
//! [`BrowserConfig`] and the DOM snapshot script are always compiled so the CLI
//! and unit tests can use them without a browser.

use crate::locator::DomQuery;
use crate::result::{FreezeError, FreezeResult};
use base64::Engine;

/// Browser configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Attribute used to address snapshotted elements
pub const REF_ATTRIBUTE: &str = "data-freezeframe-ref";

/// Elements that can carry an ARIA role implicitly or explicitly
const ROLE_CANDIDATES: &str = "[role],a[href],area[href],button,input,textarea,select,\
h1,h2,h3,h4,h5,h6,li,ul,ol,img,nav,main,table,tr,td,th,dialog,option,progress";

/// Page function returning `JSON.stringify(ElementSnapshot[])` for `(kind, arg)`
const SNAPSHOT_FN: &str = r#"(kind, arg, roleCandidates, refAttr) => {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const ownText = (el) => Array.from(el.childNodes)
    .filter((n) => n.nodeType === Node.TEXT_NODE)
    .map((n) => n.textContent)
    .join('');
  let nodes;
  if (kind === 'css') {
    nodes = Array.from(document.querySelectorAll(arg));
  } else if (kind === 'role') {
    nodes = Array.from(document.querySelectorAll(roleCandidates));
  } else {
    const needle = norm(arg).toLowerCase();
    nodes = Array.from(document.querySelectorAll('body *'))
      .filter((el) => needle && norm(ownText(el)).toLowerCase().includes(needle));
  }
  window.__freezeframeNextRef = window.__freezeframeNextRef || 1;
  const skip = new Set(['role', 'type', 'aria-label', 'alt', 'title', 'disabled', refAttr]);
  return JSON.stringify(nodes.map((el) => {
    if (!el.hasAttribute(refAttr)) {
      el.setAttribute(refAttr, String(window.__freezeframeNextRef++));
    }
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    const labelledby = (el.getAttribute('aria-labelledby') || '')
      .split(/\s+/)
      .map((id) => id && document.getElementById(id))
      .filter(Boolean)
      .map((n) => n.textContent)
      .join(' ');
    const labels = el.labels ? Array.from(el.labels).map((l) => l.textContent).join(' ') : '';
    const attributes = {};
    for (const attr of Array.from(el.attributes)) {
      if (!skip.has(attr.name)) attributes[attr.name] = attr.value;
    }
    return {
      refId: Number(el.getAttribute(refAttr)),
      tag: el.tagName.toLowerCase(),
      roleAttr: el.getAttribute('role'),
      typeAttr: el.getAttribute('type'),
      hasHref: el.hasAttribute('href'),
      ariaLabel: el.getAttribute('aria-label'),
      labelledbyText: labelledby || null,
      labelText: labels || null,
      alt: el.getAttribute('alt'),
      title: el.getAttribute('title'),
      text: el.textContent || '',
      ownText: ownText(el),
      visible: rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden' && style.display !== 'none',
      disabled: el.disabled === true || el.getAttribute('aria-disabled') === 'true',
      attributes,
    };
  }));
}"#;

/// Expression that snapshots the candidates of `query`
pub fn snapshot_script(query: &DomQuery) -> FreezeResult<String> {
    let (kind, arg) = match query {
        DomQuery::Css(selector) => ("css", selector.as_str()),
        DomQuery::Role(role) => ("role", role.as_str()),
        DomQuery::Text(text) => ("text", text.as_str()),
    };
    Ok(format!(
        "({SNAPSHOT_FN})({}, {}, {}, {})",
        serde_json::to_string(kind)?,
        serde_json::to_string(arg)?,
        serde_json::to_string(ROLE_CANDIDATES)?,
        serde_json::to_string(REF_ATTRIBUTE)?,
    ))
}

/// Selector addressing a snapshotted element
#[must_use]
pub fn ref_selector(ref_id: u64) -> String {
    format!("[{REF_ATTRIBUTE}=\"{ref_id}\"]")
}

/// Reassemble a paused request's body from the base64 chunks CDP reports
/// for it. `None` when there are no chunks.
pub fn decode_post_data<'a>(chunks: impl IntoIterator<Item = &'a str>) -> FreezeResult<Option<String>> {
    let mut bytes = Vec::new();
    let mut any = false;
    for chunk in chunks {
        any = true;
        base64::engine::general_purpose::STANDARD
            .decode_vec(chunk, &mut bytes)
            .map_err(|e| FreezeError::transport(format!("undecodable request body: {e}")))?;
    }
    Ok(any.then(|| String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(feature = "browser")]
#[allow(clippy::significant_drop_tightening, clippy::missing_errors_doc)]
mod cdp {
    use super::{decode_post_data, ref_selector, snapshot_script, BrowserConfig};
    use crate::dom::ElementSnapshot;
    use crate::driver::{ContextFactory, PageDriver, ScenarioContext};
    use crate::fixture::FixtureResponse;
    use crate::fulfill::NetworkTransport;
    use crate::interceptor::Interceptor;
    use crate::locator::{DomQuery, ElementRef};
    use crate::network::{HttpMethod, InterceptedRequest};
    use crate::result::{FreezeError, FreezeResult};
    use async_trait::async_trait;
    use base64::Engine;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
    use chromiumoxide::cdp::browser_protocol::fetch::{
        ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
        FailRequestParams, FulfillRequestParams, HeaderEntry, RequestId as FetchRequestId,
        RequestPattern, RequestStage,
    };
    use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
    use chromiumoxide::cdp::browser_protocol::page::{
        CaptureScreenshotFormat, CaptureScreenshotParams,
    };
    use chromiumoxide::cdp::browser_protocol::target::{
        CreateBrowserContextParams, CreateTargetParams,
    };
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    fn launch_error(e: impl std::fmt::Display) -> FreezeError {
        FreezeError::BrowserLaunch {
            message: e.to_string(),
        }
    }

    fn page_error(e: impl std::fmt::Display) -> FreezeError {
        FreezeError::page(e.to_string())
    }

    fn transport_error(e: impl std::fmt::Display) -> FreezeError {
        FreezeError::transport(e.to_string())
    }

    /// A running Chromium instance
    #[derive(Debug)]
    pub struct ChromiumSession {
        config: BrowserConfig,
        inner: Arc<Mutex<CdpBrowser>>,
        handle: JoinHandle<()>,
    }

    impl ChromiumSession {
        /// Launch Chromium
        pub async fn launch(config: BrowserConfig) -> FreezeResult<Self> {
            let mut builder = CdpConfig::builder().window_size(config.viewport_width, config.viewport_height);

            if !config.headless {
                builder = builder.with_head();
            }

            if !config.sandbox {
                builder = builder.no_sandbox();
            }

            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }

            let cdp_config = builder.build().map_err(launch_error)?;
            let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(launch_error)?;

            let handle = tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            info!(headless = config.headless, "chromium launched");
            Ok(Self {
                config,
                inner: Arc::new(Mutex::new(browser)),
                handle,
            })
        }

        /// Get the browser configuration
        #[must_use]
        pub const fn config(&self) -> &BrowserConfig {
            &self.config
        }

        /// Close the browser
        pub async fn close(self) -> FreezeResult<()> {
            let mut browser = self.inner.lock().await;
            browser.close().await.map_err(launch_error)?;
            self.handle.abort();
            Ok(())
        }
    }

    #[async_trait]
    impl ContextFactory for ChromiumSession {
        async fn open_context(&self) -> FreezeResult<ScenarioContext> {
            let (context_id, page) = {
                let mut browser = self.inner.lock().await;
                let context_id = browser
                    .create_browser_context(CreateBrowserContextParams::default())
                    .await
                    .map_err(page_error)?;
                let params = CreateTargetParams::builder()
                    .url("about:blank")
                    .browser_context_id(context_id.clone())
                    .build()
                    .map_err(page_error)?;
                let page = browser.new_page(params).await.map_err(page_error)?;
                (context_id, page)
            };

            let pattern = RequestPattern::builder()
                .url_pattern("*")
                .request_stage(RequestStage::Request)
                .build();
            page.execute(FetchEnableParams::builder().pattern(pattern).build())
                .await
                .map_err(page_error)?;
            let mut paused = page
                .event_listener::<EventRequestPaused>()
                .await
                .map_err(page_error)?;

            let interceptor = Interceptor::new(Arc::new(CdpTransport { page: page.clone() }));
            let dispatcher = interceptor.clone();
            let pump = tokio::spawn(async move {
                while let Some(event) = paused.next().await {
                    let chunks = event
                        .request
                        .post_data_entries
                        .iter()
                        .flatten()
                        .filter_map(|entry| entry.bytes.as_ref())
                        .map(AsRef::<str>::as_ref);
                    let body = decode_post_data(chunks).unwrap_or_else(|e| {
                        dispatcher.record_fault(e);
                        None
                    });
                    let request = InterceptedRequest {
                        id: crate::network::RequestId(event.request_id.inner().clone()),
                        method: HttpMethod::parse(&event.request.method),
                        url: event.request.url.clone(),
                        body,
                    };
                    if let Err(e) = dispatcher.dispatch(request) {
                        dispatcher.record_fault(e);
                    }
                }
                debug!("request pump finished");
            });

            debug!(context = ?context_id, "browser context opened");
            Ok(ScenarioContext {
                page: Arc::new(ChromiumPage {
                    page,
                    context_id,
                    browser: Arc::clone(&self.inner),
                    pump,
                }),
                interceptor,
            })
        }
    }

    /// One page in its own browser context
    #[derive(Debug)]
    pub struct ChromiumPage {
        page: CdpPage,
        context_id: BrowserContextId,
        browser: Arc<Mutex<CdpBrowser>>,
        pump: JoinHandle<()>,
    }

    async fn bounded<T, E: std::fmt::Display>(
        url: &str,
        timeout: Duration,
        fut: impl std::future::Future<Output = Result<T, E>> + Send,
    ) -> FreezeResult<()> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(FreezeError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(FreezeError::Navigation {
                url: url.to_string(),
                message: format!("timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    #[async_trait]
    impl PageDriver for ChromiumPage {
        async fn goto(&self, url: &str, timeout: Duration) -> FreezeResult<()> {
            debug!(url, "navigating");
            bounded(url, timeout, self.page.goto(url)).await
        }

        async fn reload(&self, timeout: Duration) -> FreezeResult<()> {
            let url = self.current_url().await.unwrap_or_default();
            bounded(&url, timeout, self.page.reload()).await
        }

        async fn snapshot(&self, query: &DomQuery) -> FreezeResult<Vec<ElementSnapshot>> {
            let json: String = self
                .page
                .evaluate(snapshot_script(query)?)
                .await
                .map_err(page_error)?
                .into_value()
                .map_err(page_error)?;
            Ok(serde_json::from_str(&json)?)
        }

        async fn click(&self, element: &ElementRef) -> FreezeResult<()> {
            self.page
                .find_element(ref_selector(element.snapshot.ref_id))
                .await
                .map_err(|e| FreezeError::page(format!("{element}: {e}")))?
                .click()
                .await
                .map_err(|e| FreezeError::page(format!("click on {element}: {e}")))?;
            Ok(())
        }

        async fn screenshot(&self) -> FreezeResult<Vec<u8>> {
            let params = CaptureScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build();
            let screenshot = self
                .page
                .execute(params)
                .await
                .map_err(|e| FreezeError::Screenshot {
                    message: e.to_string(),
                })?;
            base64::engine::general_purpose::STANDARD
                .decode(&screenshot.data)
                .map_err(|e| FreezeError::Screenshot {
                    message: e.to_string(),
                })
        }

        async fn current_url(&self) -> FreezeResult<String> {
            Ok(self
                .page
                .url()
                .await
                .map_err(page_error)?
                .unwrap_or_else(|| "about:blank".to_string()))
        }

        async fn close(&self) -> FreezeResult<()> {
            self.pump.abort();
            if let Err(e) = self.page.clone().close().await {
                warn!("page close failed: {e}");
            }
            let mut browser = self.browser.lock().await;
            browser
                .dispose_browser_context(self.context_id.clone())
                .await
                .map_err(page_error)?;
            debug!(context = ?self.context_id, "browser context disposed");
            Ok(())
        }
    }

    /// Answers paused requests through `Fetch` commands on one page
    #[derive(Debug)]
    pub struct CdpTransport {
        page: CdpPage,
    }

    impl CdpTransport {
        fn request_id(request: &InterceptedRequest) -> FetchRequestId {
            FetchRequestId::new(request.id.0.clone())
        }
    }

    #[async_trait]
    impl NetworkTransport for CdpTransport {
        async fn fulfill(
            &self,
            request: &InterceptedRequest,
            response: &FixtureResponse,
        ) -> FreezeResult<()> {
            let body = base64::engine::general_purpose::STANDARD.encode(response.body());
            let params = FulfillRequestParams::builder()
                .request_id(Self::request_id(request))
                .response_code(i64::from(response.status()))
                .response_headers(vec![HeaderEntry::new(
                    "Content-Type",
                    response.content_type(),
                )])
                .body(body)
                .build()
                .map_err(transport_error)?;
            self.page
                .execute(params)
                .await
                .map_err(transport_error)?;
            Ok(())
        }

        async fn continue_request(&self, request: &InterceptedRequest) -> FreezeResult<()> {
            self.page
                .execute(ContinueRequestParams::new(Self::request_id(request)))
                .await
                .map_err(transport_error)?;
            Ok(())
        }

        async fn abort(&self, request: &InterceptedRequest) -> FreezeResult<()> {
            self.page
                .execute(FailRequestParams::new(
                    Self::request_id(request),
                    ErrorReason::Aborted,
                ))
                .await
                .map_err(transport_error)?;
            Ok(())
        }
    }
}

#[cfg(feature = "browser")]
pub use cdp::{CdpTransport, ChromiumPage, ChromiumSession};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_headless() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert!(config.sandbox);
        assert!(config.chromium_path.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = BrowserConfig::default()
            .with_headless(false)
            .with_viewport(800, 600)
            .with_chromium_path("/usr/bin/chromium")
            .with_no_sandbox();
        assert!(!config.headless);
        assert_eq!((config.viewport_width, config.viewport_height), (800, 600));
        assert_eq!(config.chromium_path.as_deref(), Some("/usr/bin/chromium"));
        assert!(!config.sandbox);
    }

    #[test]
    fn test_snapshot_script_escapes_arguments() {
        let script = snapshot_script(&DomQuery::Css("a[href=\"/cases\"]".to_string())).unwrap();
        assert!(script.contains(r#""css", "a[href=\"/cases\"]""#));
        assert!(script.contains(REF_ATTRIBUTE));

        let text = snapshot_script(&DomQuery::Text("No cases yet".to_string())).unwrap();
        assert!(text.contains(r#""text", "No cases yet""#));
    }

    #[test]
    fn test_post_data_chunks_are_joined() {
        // "{\"title\":" + "\"x\"}"
        let body = decode_post_data(["eyJ0aXRsZSI6", "IngifQ=="]).unwrap();
        assert_eq!(body.as_deref(), Some(r#"{"title":"x"}"#));
    }

    #[test]
    fn test_post_data_absent_or_broken() {
        assert_eq!(decode_post_data(std::iter::empty()).unwrap(), None);
        assert_eq!(decode_post_data([""]).unwrap().as_deref(), Some(""));
        let err = decode_post_data(["not base64!"]).unwrap_err();
        assert_eq!(err.kind(), "TransportError");
    }

    #[test]
    fn test_ref_selector() {
        assert_eq!(ref_selector(7), "[data-freezeframe-ref=\"7\"]");
    }
}
