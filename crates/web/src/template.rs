//! Template engine integration.
//!
//! The router does not render templates itself; a [`TemplateEngine`]
//! implementation (handlebars, tera, ...) plugs in behind the trait and a
//! [`TemplateHandler`] route renders whatever data model earlier handlers
//! stashed under the [`TEMPLATE_DATA`] attribute.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::context::RoutingContext;
use crate::error::WebError;
use crate::handler::Handler;

/// Attribute key under which handlers publish the template data model.
pub const TEMPLATE_DATA: &str = "template.data";

/// Renders a named template against a JSON data model.
#[async_trait]
pub trait TemplateEngine: Send + Sync {
    async fn render(&self, template: &str, data: &Value) -> Result<Bytes, WebError>;

    /// Content type of rendered output, `text/html` unless overridden.
    fn content_type(&self) -> &str {
        "text/html; charset=utf-8"
    }
}

/// Terminal handler that renders one template and ends the response.
///
/// The data model is taken from the [`TEMPLATE_DATA`] attribute; an absent
/// attribute renders against an empty object.
pub struct TemplateHandler {
    engine: Arc<dyn TemplateEngine>,
    template: String,
}

impl TemplateHandler {
    pub fn new(engine: Arc<dyn TemplateEngine>, template: impl Into<String>) -> Self {
        Self { engine, template: template.into() }
    }
}

#[async_trait]
impl Handler for TemplateHandler {
    async fn handle(&self, ctx: RoutingContext) -> Result<(), WebError> {
        let data = ctx
            .get::<Value>(TEMPLATE_DATA)
            .map(|value| value.as_ref().clone())
            .unwrap_or_else(|| Value::Object(Default::default()));

        let rendered = self.engine.render(&self.template, &data).await?;

        let response = ctx.response();
        response.put_header(http::header::CONTENT_TYPE, self.engine.content_type())?;
        response.end_with(rendered)?;
        Ok(())
    }
}
