use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::config::GatewayConfig;

use super::GatewayError;

/// Handler a selector value is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// Fan the message out to every registered channel
    Broadcast,
    /// Answer the sender with a pong
    Ping,
}

/// An inbound frame resolved to its route
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    pub route: String,
    pub kind: RouteKind,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    selector: String,
    routes: HashMap<String, RouteKind>,
}

impl RouteTable {
    pub fn new(selector: impl Into<String>, routes: HashMap<String, RouteKind>) -> Self {
        Self {
            selector: selector.into(),
            routes,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.route_selector.clone(), config.routes.clone())
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Parse a text frame and look up its selector.
    ///
    /// The frame must be a JSON object with a string selector field;
    /// anything else is `InvalidMessage`. A selector with no route is
    /// `UnknownRoute`.
    pub fn resolve(&self, text: &str) -> Result<RoutedMessage, GatewayError> {
        let body: Value =
            serde_json::from_str(text).map_err(|e| GatewayError::InvalidMessage(e.to_string()))?;

        let route = body
            .as_object()
            .ok_or_else(|| GatewayError::InvalidMessage("expected a JSON object".to_string()))?
            .get(&self.selector)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::InvalidMessage(format!(
                    "missing string field '{}'",
                    self.selector
                ))
            })?
            .to_string();

        match self.routes.get(&route) {
            Some(kind) => Ok(RoutedMessage {
                route,
                kind: *kind,
                body,
            }),
            None => Err(GatewayError::UnknownRoute(route)),
        }
    }
}
