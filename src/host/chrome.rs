use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use headless_chrome::util::Timeout;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info};

use super::{DocumentHost, Element, PathQuery, Session, TextMatch, TextQuery};
use crate::rows::{decode_rows, Row};
use crate::settings::BrowserSettings;

/// Collects elements for an XPath or CSS query and stamps each with a stable
/// `data-reveal-handle` so later calls can find it again.
const COLLECT_JS: &str = r#"
(() => {
    const query = __QUERY__;
    const found = [];
    if (query.xpath) {
        const snap = document.evaluate(query.xpath, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
        for (let i = 0; i < snap.snapshotLength; i++) found.push(snap.snapshotItem(i));
    } else {
        found.push(...document.querySelectorAll(query.css));
    }
    return JSON.stringify(found.map((el) => {
        if (!el.dataset.revealHandle) {
            window.__revealSeq = (window.__revealSeq || 0) + 1;
            el.dataset.revealHandle = String(window.__revealSeq);
        }
        return {
            handle: Number(el.dataset.revealHandle),
            text: (el.innerText || el.textContent || '').trim(),
            href: el.getAttribute('href'),
        };
    }));
})()
"#;

/// Runs `__ACTION__` against the stamped element; false when it is gone.
const ON_ELEMENT_JS: &str = r#"
(() => {
    const el = document.querySelector(__SELECTOR__);
    if (!el) return false;
    __ACTION__;
    return true;
})()
"#;

/// Rendered body rows only; rows hidden by the page have no client rects.
const ROWS_JS: &str = r#"
(() => JSON.stringify(
    Array.from(document.querySelectorAll('table tbody tr'))
        .filter((row) => row.getClientRects().length > 0)
        .map((row) => ({
            cells: Array.from(row.querySelectorAll('td')).map((cell) => {
                const link = cell.querySelector('a');
                return {
                    text: (cell.innerText || '').trim(),
                    link: link ? { href: link.getAttribute('href') || '', text: (link.innerText || '').trim() } : null,
                };
            }),
        }))
))()
"#;

/// Button by text, then by accessible label, then any `accept`-classed one.
const CONSENT_JS: &str = r#"
(() => {
    const label = __LABEL__;
    const buttons = Array.from(document.querySelectorAll('button'));
    const button = buttons.find((b) => (b.textContent || '').includes(label))
        || buttons.find((b) => b.getAttribute('aria-label') === label)
        || document.querySelector("button[class*='accept']");
    if (!button) return false;
    button.scrollIntoView(true);
    button.click();
    return true;
})()
"#;

const MASK_WEBDRIVER_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

/// A live headless Chrome session with one tab.
///
/// The browser process is released when the host is dropped, so every exit
/// path out of a run closes it.
pub struct ChromeHost {
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

impl ChromeHost {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let settings = settings.clone();
        let (browser, tab) = tokio::task::spawn_blocking(move || -> Result<(Browser, Arc<Tab>)> {
            let options = LaunchOptions::default_builder()
                .headless(settings.headless)
                .sandbox(false)
                .window_size(Some((settings.window_width, settings.window_height)))
                .idle_browser_timeout(Duration::from_secs(settings.idle_timeout_secs))
                .args(vec![OsStr::new("--disable-blink-features=AutomationControlled")])
                .build()
                .map_err(|e| anyhow!("Invalid browser options: {e}"))?;
            let browser = Browser::new(options).context("Failed to launch Chrome")?;
            let tab = browser.new_tab().context("Failed to open a tab")?;
            Ok((browser, tab))
        })
        .await
        .context("Browser launch task aborted")??;

        info!(headless = settings.headless, "Browser started");
        Ok(ChromeHost {
            browser: Some(browser),
            tab,
        })
    }

    /// Navigate and wait for the load to finish.
    pub async fn open(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        info!(%url, "Loading page");
        self.with_tab(move |tab| {
            tab.navigate_to(&url)
                .with_context(|| format!("Failed to navigate to {url}"))?
                .wait_until_navigated()
                .with_context(|| format!("Navigation to {url} did not finish"))?;
            tab.evaluate(MASK_WEBDRIVER_JS, false)?;
            Ok(())
        })
        .await
    }

    async fn with_tab<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .context("Browser task aborted")?
    }

    async fn eval(&self, script: String) -> Result<serde_json::Value> {
        self.with_tab(move |tab| {
            let remote = tab.evaluate(&script, false)?;
            Ok(remote.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }

    async fn collect(&self, query: serde_json::Value) -> Result<Vec<Element>> {
        let script = COLLECT_JS.replace("__QUERY__", &query.to_string());
        let value = self.eval(script).await?;
        let json = value
            .as_str()
            .ok_or_else(|| anyhow!("Element query returned {value}"))?;
        serde_json::from_str(json).context("Malformed element query result")
    }

    async fn on_element(&self, element: &Element, action: &str) -> Result<()> {
        let selector = serde_json::Value::from(handle_selector(element)).to_string();
        let script = ON_ELEMENT_JS
            .replace("__SELECTOR__", &selector)
            .replace("__ACTION__", action);
        match self.eval(script).await? {
            serde_json::Value::Bool(true) => Ok(()),
            _ => bail!("Element {} is no longer attached", element.handle.0),
        }
    }
}

impl Session for ChromeHost {
    fn close(&mut self) {
        if let Some(browser) = self.browser.take() {
            drop(browser);
            info!("Browser closed");
        }
    }
}

impl Drop for ChromeHost {
    fn drop(&mut self) {
        self.close();
    }
}

fn consent_script(label: &str) -> String {
    CONSENT_JS.replace("__LABEL__", &serde_json::Value::from(label).to_string())
}

/// A wait that ran out is an answer; anything else means the tab is broken.
fn presence<T>(outcome: Result<T>) -> Result<bool> {
    match outcome {
        Ok(_) => Ok(true),
        Err(e) if e.is::<Timeout>() => Ok(false),
        Err(e) => Err(e.context("Readiness wait failed")),
    }
}

fn handle_selector(element: &Element) -> String {
    format!("[data-reveal-handle=\"{}\"]", element.handle.0)
}

/// XPath 1.0 string literal; `concat()` when both quote kinds occur.
fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn text_xpath(query: &TextQuery) -> String {
    let needle = xpath_literal(&query.needle);
    let mut predicate = match query.matching {
        TextMatch::Exact => format!("normalize-space(.)={needle}"),
        TextMatch::Contains => format!("contains(., {needle})"),
    };
    if let Some(href) = &query.href {
        predicate = format!("@href={} and {predicate}", xpath_literal(href));
    }
    format!("//a[{predicate}]")
}

#[async_trait]
impl DocumentHost for ChromeHost {
    async fn find_by_text(&self, query: &TextQuery) -> Result<Vec<Element>> {
        let xpath = text_xpath(query);
        debug!(%xpath, "find by text");
        self.collect(serde_json::json!({ "xpath": xpath })).await
    }

    async fn find_by_path(&self, query: PathQuery) -> Result<Vec<Element>> {
        let query = match query {
            PathQuery::XPath(xpath) => serde_json::json!({ "xpath": xpath }),
            PathQuery::Css(css) => serde_json::json!({ "css": css }),
        };
        self.collect(query).await
    }

    async fn scroll_into_view(&self, element: &Element) -> Result<()> {
        self.on_element(element, "el.scrollIntoView({block: 'center'})").await
    }

    async fn script_click(&self, element: &Element) -> Result<()> {
        self.on_element(element, "el.click()").await
    }

    async fn native_click(&self, element: &Element) -> Result<()> {
        let selector = handle_selector(element);
        self.with_tab(move |tab| {
            tab.find_element(&selector)?.click()?;
            Ok(())
        })
        .await
    }

    async fn move_and_click(&self, element: &Element) -> Result<()> {
        let selector = handle_selector(element);
        self.with_tab(move |tab| {
            let el = tab.find_element(&selector)?;
            el.move_mouse_over()?;
            let point = el.get_midpoint()?;
            tab.click_point(point)?;
            Ok(())
        })
        .await
    }

    async fn evaluate_script(&self, script: &str) -> Result<serde_json::Value> {
        self.eval(script.to_string()).await
    }

    async fn wait_until_present(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let selector = selector.to_string();
        self.with_tab(move |tab| {
            presence(tab.wait_for_element_with_custom_timeout(&selector, timeout))
        })
        .await
    }

    async fn snapshot_rows(&self) -> Result<Vec<Row>> {
        let value = self.eval(ROWS_JS.to_string()).await?;
        let json = value
            .as_str()
            .ok_or_else(|| anyhow!("Row snapshot returned {value}"))?;
        let parsed: serde_json::Value =
            serde_json::from_str(json).context("Malformed row snapshot")?;
        Ok(decode_rows(parsed))
    }

    async fn dismiss_consent(&self, label: &str) -> Result<bool> {
        Ok(matches!(
            self.eval(consent_script(label)).await?,
            serde_json::Value::Bool(true)
        ))
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ElementRef;

    #[test]
    fn literal_quoting() {
        assert_eq!(xpath_literal("rozwiń"), "'rozwiń'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(xpath_literal("a'b\"c"), "concat('a', \"'\", 'b\"c')");
    }

    #[test]
    fn text_queries_become_anchor_xpaths() {
        assert_eq!(
            text_xpath(&TextQuery::exact("rozwiń")),
            "//a[normalize-space(.)='rozwiń']"
        );
        assert_eq!(
            text_xpath(&TextQuery::contains("rozwiń").with_href("#")),
            "//a[@href='#' and contains(., 'rozwiń')]"
        );
    }

    #[test]
    fn scripts_are_filled_with_json_literals() {
        let query = serde_json::json!({ "css": "table a" }).to_string();
        let script = COLLECT_JS.replace("__QUERY__", &query);
        assert!(script.contains(r#"const query = {"css":"table a"};"#));

        let el = Element {
            handle: ElementRef(7),
            text: "rozwiń".into(),
            href: Some("#".into()),
        };
        assert_eq!(handle_selector(&el), r#"[data-reveal-handle="7"]"#);
    }

    #[test]
    fn consent_falls_back_to_label_and_class() {
        let script = consent_script("Akceptuję");
        assert!(script.contains(r#"const label = "Akceptuję";"#));
        assert!(script.contains("getAttribute('aria-label') === label"));
        assert!(script.contains("button[class*='accept']"));
    }

    #[test]
    fn only_timeouts_mean_absent() {
        assert!(presence(Ok(())).unwrap());
        assert!(!presence::<()>(Err(anyhow::Error::new(Timeout))).unwrap());
        let broken = presence::<()>(Err(anyhow!("websocket closed"))).unwrap_err();
        assert!(format!("{broken:#}").contains("websocket closed"));
    }
}
