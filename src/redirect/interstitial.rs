use anyhow::{anyhow, Context, Result};
use handlebars::Handlebars;
use rust_embed::RustEmbed;
use serde::Serialize;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

const TEMPLATE_FILE: &str = "interstitial.hbs";
const TEMPLATE_NAME: &str = "interstitial";
const SKIP_LABEL: &str = "Continue now";

#[derive(Serialize)]
struct InterstitialPage<'a> {
    message: &'a str,
    seconds: u64,
    target_url: &'a str,
    /// JSON string literal, safe to place inside a script block
    target_json: String,
    skip_label: &'a str,
}

/// Countdown page shown when a redirect delay is configured.
pub struct InterstitialRenderer {
    registry: Handlebars<'static>,
}

impl InterstitialRenderer {
    pub fn new() -> Result<Self> {
        let file = Templates::get(TEMPLATE_FILE)
            .ok_or_else(|| anyhow!("embedded template {TEMPLATE_FILE} is missing"))?;
        let source = std::str::from_utf8(&file.data).context("interstitial template is not UTF-8")?;

        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(TEMPLATE_NAME, source)
            .context("failed to compile interstitial template")?;
        Ok(Self { registry })
    }

    /// Renders the page for an already validated target, embedded exactly as stored.
    /// The countdown starts at `ceil(delay_secs)`, never below one.
    pub fn render(&self, target_url: &str, delay_secs: f64, message: &str) -> Result<String> {
        let target_json = serde_json::to_string(target_url)?.replace("</", "<\\/");
        let page = InterstitialPage {
            message,
            seconds: countdown_seconds(delay_secs),
            target_url,
            target_json,
            skip_label: SKIP_LABEL,
        };
        self.registry
            .render(TEMPLATE_NAME, &page)
            .context("failed to render interstitial")
    }
}

fn countdown_seconds(delay_secs: f64) -> u64 {
    if delay_secs.is_finite() && delay_secs > 1.0 {
        delay_secs.ceil() as u64
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_rounds_up() {
        assert_eq!(countdown_seconds(0.2), 1);
        assert_eq!(countdown_seconds(1.0), 1);
        assert_eq!(countdown_seconds(2.1), 3);
        assert_eq!(countdown_seconds(f64::NAN), 1);
    }

    #[test]
    fn test_render_escapes_message_and_embeds_target() {
        let renderer = InterstitialRenderer::new().unwrap();
        let html = renderer
            .render("https://www.coupang.com/vp/products/1?itemId=2&q=a", 2.5, "<b>Hold on</b>")
            .unwrap();

        assert!(html.contains(r#"<span id="countdown">3</span>"#));
        assert!(html.contains("var seconds = 3;"));
        assert!(html.contains(r#"var targetUrl = "https://www.coupang.com/vp/products/1?itemId=2&q=a";"#));
        assert!(html.contains("window.location.href = targetUrl"));
        assert!(html.contains("&lt;b&gt;Hold on&lt;/b&gt;"));
        assert!(!html.contains("<b>Hold on</b>"));
    }

    #[test]
    fn test_render_keeps_target_bytes() {
        let renderer = InterstitialRenderer::new().unwrap();
        let html = renderer.render("https://Temu.com", 1.0, "wait").unwrap();
        assert!(html.contains(r#"var targetUrl = "https://Temu.com";"#));
        assert!(!html.contains("https://temu.com/"));
    }

    #[test]
    fn test_script_breakout_is_neutralised() {
        let renderer = InterstitialRenderer::new().unwrap();
        let html = renderer
            .render("https://temu.com/a</script><script>x()", 1.0, "wait")
            .unwrap();
        assert!(!html.contains("</script><script>x()"));
    }
}
