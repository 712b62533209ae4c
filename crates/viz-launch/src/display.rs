//! Rendering links back into the notebook.
//!
//! The hosting integration decides which display capabilities exist and
//! injects them into the [`DisplayDispatcher`]. Nothing is discovered
//! implicitly; with no renderer the dispatcher reports [`DisplayUnavailable`]
//! and the caller falls back to plain text.

use std::io::Write;
use std::sync::{Arc, Mutex};

use log::debug;
use serde_json::json;

use crate::error::DisplayUnavailable;
use crate::HostKind;

/// A display capability able to show an HTML fragment inline.
pub trait Renderer: Send + Sync {
    fn render_html(&self, html: &str) -> Result<(), DisplayUnavailable>;

    /// Render a link. `text` is its plain-text form for outputs that carry one.
    fn render_link(&self, html: &str, _text: &str) -> Result<(), DisplayUnavailable> {
        self.render_html(html)
    }
}

/// A writable output stream shared between renderers and the launcher.
pub type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn stdout_sink() -> Sink {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

fn write_to(sink: &Sink, text: &str) -> Result<(), DisplayUnavailable> {
    let mut out = sink
        .lock()
        .map_err(|_| DisplayUnavailable("output stream lock poisoned".into()))?;
    out.write_all(text.as_bytes())
        .and_then(|_| out.flush())
        .map_err(|e| DisplayUnavailable(format!("failed to write output: {}", e)))
}

/// Emits an evcxr `text/html` content block, which notebook kernels that
/// host Rust code turn into rich output.
pub struct HtmlRenderer {
    sink: Sink,
}

impl HtmlRenderer {
    pub fn new(sink: Sink) -> Self {
        Self { sink }
    }

    pub fn stdout() -> Self {
        Self::new(stdout_sink())
    }
}

impl Renderer for HtmlRenderer {
    fn render_html(&self, html: &str) -> Result<(), DisplayUnavailable> {
        write_to(
            &self.sink,
            &format!("EVCXR_BEGIN_CONTENT text/html\n{}\nEVCXR_END_CONTENT\n", html),
        )
    }
}

/// Emits a Jupyter `display_data` output as one JSON line.
pub struct DisplayDataRenderer {
    sink: Sink,
}

impl DisplayDataRenderer {
    pub fn new(sink: Sink) -> Self {
        Self { sink }
    }

    pub fn stdout() -> Self {
        Self::new(stdout_sink())
    }
}

impl Renderer for DisplayDataRenderer {
    fn render_html(&self, html: &str) -> Result<(), DisplayUnavailable> {
        self.render_link(html, html)
    }

    fn render_link(&self, html: &str, text: &str) -> Result<(), DisplayUnavailable> {
        let output = json!({
            "output_type": "display_data",
            "data": {
                "text/html": html,
                "text/plain": text
            },
            "metadata": {}
        });
        write_to(&self.sink, &format!("{}\n", output))
    }
}

/// Never renders.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render_html(&self, _html: &str) -> Result<(), DisplayUnavailable> {
        Err(DisplayUnavailable("no renderer configured".into()))
    }
}

/// Chooses the display capability for a host.
///
/// Local kernels use the rich-display renderer when one is set; every other
/// host, and local kernels without one, use the HTML renderer.
#[derive(Default)]
pub struct DisplayDispatcher {
    html: Option<Box<dyn Renderer>>,
    rich: Option<Box<dyn Renderer>>,
}

impl DisplayDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.html = Some(Box::new(renderer));
        self
    }

    pub fn with_rich_display(mut self, renderer: impl Renderer + 'static) -> Self {
        self.rich = Some(Box::new(renderer));
        self
    }

    pub fn render_link(
        &self,
        kind: HostKind,
        html: &str,
        text: &str,
    ) -> Result<(), DisplayUnavailable> {
        let renderer = match (kind, &self.rich, &self.html) {
            (HostKind::LocalKernel, Some(rich), _) => rich,
            (_, _, Some(fallback)) => fallback,
            _ => {
                debug!("[display] No renderer for {} host", kind);
                return Err(DisplayUnavailable(format!("no renderer for {} host", kind)));
            }
        };
        renderer.render_link(html, text)
    }
}

/// An in-memory sink, for hosts that forward output themselves.
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> Sink {
        Arc::new(Mutex::new(Box::new(self.clone())))
    }

    pub fn contents(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut bytes = self
            .0
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "buffer lock poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
