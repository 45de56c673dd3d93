//! HTML rendering of log digests.

use anyhow::Context;
use handlebars::Handlebars;
use pmdigest_core::digest::{Digest, DigestRenderer, RenderError};
use std::path::Path;

const DIGEST_TEMPLATE: &str = "digest";

/// Renders digests through a Handlebars template.
///
/// Section names and texts are HTML-escaped by the registry.
pub struct HtmlRenderer {
    registry: Handlebars<'static>,
}

impl HtmlRenderer {
    /// Build the renderer from `template`, or the built-in layout when `None`.
    pub fn new(template: Option<&Path>) -> anyhow::Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);

        match template {
            Some(path) => registry
                .register_template_file(DIGEST_TEMPLATE, path)
                .with_context(|| format!("registering digest template {}", path.display()))?,
            None => registry
                .register_template_string(
                    DIGEST_TEMPLATE,
                    include_str!("../templates/digest.html.hbs"),
                )
                .context("registering built-in digest template")?,
        }

        Ok(Self { registry })
    }
}

impl DigestRenderer for HtmlRenderer {
    fn render(&self, digest: &Digest) -> Result<String, RenderError> {
        self.registry
            .render(DIGEST_TEMPLATE, digest)
            .map_err(|e| RenderError::Template(e.to_string()))
    }
}
